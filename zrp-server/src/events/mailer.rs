//! Email dispatch.
//!
//! A background worker consumes mailable bus events (`eco_approved`,
//! `low_stock`, `overdue_wo`, `po_received`) after the producing
//! transaction has committed. Delivery is at-most-once per logical event:
//! the producer created the notification row, and the worker claims its
//! `emailed` flag before sending. Outcomes land in `email_log`; failures
//! are logged, never propagated.
//!
//! [`Mailer`] is the seam to the external SMTP collaborator. The default
//! wiring logs the message instead of speaking SMTP.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{AppEvent, EventBus, notifications, recv_next};
use crate::db::Db;
use crate::utils::{AppResult, now_millis};

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), String>;
}

/// Development mailer: writes the message to the log and succeeds.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), String> {
        tracing::info!(to, subject, "Email (log mailer, not sent)");
        Ok(())
    }
}

async fn record_outcome(
    db: &Db,
    notification_id: i64,
    recipient: &str,
    subject: &str,
    outcome: &Result<(), String>,
) -> AppResult<()> {
    let (status, error) = match outcome {
        Ok(()) => ("sent", None),
        Err(e) => ("failed", Some(e.as_str())),
    };
    sqlx::query(
        "INSERT INTO email_log (notification_id, recipient, subject, status, error, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(notification_id)
    .bind(recipient)
    .bind(subject)
    .bind(status)
    .bind(error)
    .bind(now_millis())
    .execute(&db.pool)
    .await?;
    Ok(())
}

/// Map a bus event to its notification id and subject, when mailable.
fn mailable(event: &AppEvent) -> Option<(Option<i64>, String)> {
    match event {
        AppEvent::EcoApproved { eco_id, notification_id } => {
            Some((*notification_id, format!("ECO approved: {eco_id}")))
        }
        AppEvent::LowStock { ipn, notification_id } => {
            Some((*notification_id, format!("Low stock: {ipn}")))
        }
        AppEvent::OverdueWo { wo_id, notification_id } => {
            Some((*notification_id, format!("Work order overdue: {wo_id}")))
        }
        AppEvent::PoReceived { po_id, notification_id } => {
            Some((*notification_id, format!("Purchase order received: {po_id}")))
        }
        _ => None,
    }
}

/// Worker loop. `recipient` is the company inbox from the environment.
pub async fn run_email_worker(
    db: Db,
    bus: EventBus,
    mailer: std::sync::Arc<dyn Mailer>,
    recipient: String,
    shutdown: CancellationToken,
) {
    let mut rx = bus.subscribe();
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = recv_next(&bus, &mut rx) => match event {
                Some(e) => e,
                None => break,
            },
        };

        let Some((notification_id, subject)) = mailable(&event) else {
            continue;
        };
        let Some(notification_id) = notification_id else {
            // Producer's notification was deduplicated; nothing to send.
            continue;
        };

        match notifications::claim_for_email(&db, notification_id).await {
            Ok(true) => {}
            Ok(false) => continue, // already delivered
            Err(e) => {
                tracing::error!(error = %e, notification_id, "Email claim failed");
                continue;
            }
        }

        let body = match notifications::get(&db, notification_id).await {
            Ok(Some(n)) => n.message,
            _ => subject.clone(),
        };

        let outcome = mailer.send(&recipient, &subject, &body).await;
        if let Err(ref e) = outcome {
            tracing::error!(error = %e, subject, "Email send failed");
        }
        if let Err(e) = record_outcome(&db, notification_id, &recipient, &subject, &outcome).await {
            tracing::error!(error = %e, "Failed to write email log");
        }
    }
    tracing::debug!("Email worker stopped");
}
