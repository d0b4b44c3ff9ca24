//! Periodic condition scanner.
//!
//! Every five minutes: low stock, overdue work orders, aging NCRs, fresh
//! RMAs. Each candidate is keyed by `(kind, record_id)` and suppressed
//! inside the 24-hour dedup window. The same pass also purges expired
//! sessions and enforces audit retention. All writes go through the same
//! notification/audit paths the synchronous handlers use.

use tokio_util::sync::CancellationToken;

use super::{AppEvent, EventBus, notifications};
use crate::audit::{self, AuditStorage};
use crate::db::Db;
use crate::inventory;
use crate::utils::{AppResult, now_millis, time};

pub const SCAN_INTERVAL_SECS: u64 = 5 * 60;

/// NCRs still open after this many days are flagged.
const NCR_AGING_DAYS: i64 = 14;

pub async fn run_scanner(db: Db, bus: EventBus, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(SCAN_INTERVAL_SECS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = scan_once(&db, &bus).await {
                    tracing::error!(error = %e, "Periodic scan failed");
                }
            }
        }
    }
    tracing::debug!("Scanner stopped");
}

/// One full scan pass. Public for tests and for a manual trigger endpoint.
pub async fn scan_once(db: &Db, bus: &EventBus) -> AppResult<()> {
    scan_low_stock(db, bus).await?;
    scan_overdue_work_orders(db, bus).await?;
    scan_aging_ncrs(db, bus).await?;
    scan_new_rmas(db, bus).await?;
    housekeeping(db).await?;
    Ok(())
}

async fn scan_low_stock(db: &Db, bus: &EventBus) -> AppResult<()> {
    for item in inventory::low_stock(db).await? {
        let notification_id = notifications::insert_dedup(
            db,
            "low_stock",
            "warning",
            &format!("Low stock: {}", item.ipn),
            &format!(
                "{} is at {} on hand (reorder point {})",
                item.ipn, item.qty_on_hand, item.reorder_point
            ),
            Some("inventory"),
            Some(&item.ipn),
        )
        .await?;
        if notification_id.is_some() {
            bus.emit(AppEvent::LowStock {
                ipn: item.ipn.clone(),
                notification_id,
            });
        }
    }
    Ok(())
}

async fn scan_overdue_work_orders(db: &Db, bus: &EventBus) -> AppResult<()> {
    let today = time::today();
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT id, due_date FROM work_orders \
         WHERE due_date IS NOT NULL AND due_date < ? \
         AND status NOT IN ('completed', 'cancelled')",
    )
    .bind(&today)
    .fetch_all(&db.pool)
    .await?;

    for (wo_id, due_date) in rows {
        let notification_id = notifications::insert_dedup(
            db,
            "overdue_wo",
            "warning",
            &format!("Work order overdue: {wo_id}"),
            &format!("{wo_id} was due {due_date} and is still open"),
            Some("workorders"),
            Some(&wo_id),
        )
        .await?;
        if notification_id.is_some() {
            bus.emit(AppEvent::OverdueWo {
                wo_id,
                notification_id,
            });
        }
    }
    Ok(())
}

async fn scan_aging_ncrs(db: &Db, bus: &EventBus) -> AppResult<()> {
    let cutoff = now_millis() - NCR_AGING_DAYS * time::DAY_MS;
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT id FROM ncrs WHERE status = 'open' AND created_at < ?")
            .bind(cutoff)
            .fetch_all(&db.pool)
            .await?;

    for (ncr_id,) in rows {
        let inserted = notifications::insert_dedup(
            db,
            "aging_ncr",
            "warning",
            &format!("NCR open for more than {NCR_AGING_DAYS} days: {ncr_id}"),
            &format!("{ncr_id} has been open for more than {NCR_AGING_DAYS} days"),
            Some("ncrs"),
            Some(&ncr_id),
        )
        .await?;
        if inserted.is_some() {
            bus.emit(AppEvent::AgingNcr { ncr_id });
        }
    }
    Ok(())
}

async fn scan_new_rmas(db: &Db, bus: &EventBus) -> AppResult<()> {
    let cutoff = now_millis() - time::HOUR_MS;
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT id, customer FROM rmas WHERE created_at > ?")
            .bind(cutoff)
            .fetch_all(&db.pool)
            .await?;

    for (rma_id, customer) in rows {
        let inserted = notifications::insert_dedup(
            db,
            "new_rma",
            "info",
            &format!("New RMA: {rma_id}"),
            &format!("{rma_id} opened for {customer}"),
            Some("rmas"),
            Some(&rma_id),
        )
        .await?;
        if inserted.is_some() {
            bus.emit(AppEvent::NewRma { rma_id });
        }
    }
    Ok(())
}

/// Session purge and audit retention.
async fn housekeeping(db: &Db) -> AppResult<()> {
    let purged = crate::auth::session::purge_expired(db).await?;
    if purged > 0 {
        tracing::debug!(purged, "Expired sessions removed");
    }

    let retention_days: i64 = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(audit::RETENTION_SETTING)
        .fetch_optional(&db.pool)
        .await?
        .and_then(|v: String| v.parse().ok())
        .unwrap_or(audit::DEFAULT_RETENTION_DAYS);

    let removed = AuditStorage::new(db.pool.clone()).cleanup(retention_days).await?;
    if removed > 0 {
        tracing::info!(removed, retention_days, "Audit retention cleanup");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    #[tokio::test]
    async fn low_stock_notified_once_per_window() {
        let (db, _dir) = test_db().await;
        let bus = EventBus::new(16);

        let mut tx = db.begin().await.unwrap();
        inventory::receive(&mut tx, "RES-001", 5, None, None).await.unwrap();
        inventory::update_settings(&mut tx, "RES-001", Some(10), None).await.unwrap();
        tx.commit().await.unwrap();

        scan_once(&db, &bus).await.unwrap();
        scan_once(&db, &bus).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE kind = 'low_stock' AND record_id = 'RES-001'",
        )
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn overdue_wo_flagged() {
        let (db, _dir) = test_db().await;
        let bus = EventBus::new(16);

        sqlx::query(
            "INSERT INTO work_orders (id, assembly_ipn, qty, status, due_date, created_at) \
             VALUES ('WO-2026-0001', 'ASY-001', 5, 'open', '2020-01-01', ?)",
        )
        .bind(now_millis())
        .execute(&db.pool)
        .await
        .unwrap();

        scan_once(&db, &bus).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE kind = 'overdue_wo'",
        )
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
    }
}
