//! Campaign progress streams (server-sent events).
//!
//! A subscriber gets the current enrollment snapshot immediately, then a
//! frame every two seconds until every enrollment is `updated` or
//! `failed` (one final terminal frame is sent before the stream closes).

use axum::response::sse::Event;
use futures::Stream;
use serde::Serialize;
use std::convert::Infallible;

use crate::db::Db;
use crate::utils::AppResult;

pub const FRAME_INTERVAL_MS: u64 = 2000;

#[derive(Debug, Clone, Serialize)]
pub struct CampaignProgress {
    pub campaign_id: i64,
    pub total: i64,
    pub pending: i64,
    pub sent: i64,
    pub updated: i64,
    pub failed: i64,
    pub done: bool,
}

/// Aggregate enrollment counts for one campaign.
pub async fn progress(db: &Db, campaign_id: i64) -> AppResult<CampaignProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM campaign_enrollments \
         WHERE campaign_id = ? GROUP BY status",
    )
    .bind(campaign_id)
    .fetch_all(&db.pool)
    .await?;

    let mut p = CampaignProgress {
        campaign_id,
        total: 0,
        pending: 0,
        sent: 0,
        updated: 0,
        failed: 0,
        done: false,
    };
    for (status, count) in rows {
        p.total += count;
        match status.as_str() {
            "pending" => p.pending = count,
            "sent" => p.sent = count,
            "updated" => p.updated = count,
            "failed" => p.failed = count,
            _ => {}
        }
    }
    // An empty campaign is trivially done.
    p.done = p.pending == 0 && p.sent == 0;
    Ok(p)
}

/// Frame stream for one campaign: snapshot first, then periodic frames,
/// closing after the terminal frame.
pub fn campaign_stream(
    db: Db,
    campaign_id: i64,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold((db, false, false), move |(db, mut sent_first, finished)| {
        async move {
            if finished {
                return None;
            }
            if sent_first {
                tokio::time::sleep(std::time::Duration::from_millis(FRAME_INTERVAL_MS)).await;
            }
            sent_first = true;

            let frame = match progress(&db, campaign_id).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(error = %e, campaign_id, "Campaign progress query failed");
                    return None;
                }
            };
            let done = frame.done;
            let event = Event::default().data(serde_json::to_string(&frame).unwrap_or_default());
            Some((Ok(event), (db, sent_first, done)))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;
    use crate::utils::now_millis;

    async fn seed_campaign(db: &Db) -> i64 {
        let campaign_id: i64 = sqlx::query_scalar(
            "INSERT INTO firmware_campaigns (name, target_version, status, created_at) \
             VALUES ('fleet-update', '2.1.0', 'active', ?) RETURNING id",
        )
        .bind(now_millis())
        .fetch_one(&db.pool)
        .await
        .unwrap();

        for (serial, status) in [("SN-001", "updated"), ("SN-002", "sent"), ("SN-003", "failed")] {
            sqlx::query("INSERT INTO devices (serial_number, created_at) VALUES (?, ?)")
                .bind(serial)
                .bind(now_millis())
                .execute(&db.pool)
                .await
                .unwrap();
            sqlx::query(
                "INSERT INTO campaign_enrollments (campaign_id, serial_number, status) \
                 VALUES (?, ?, ?)",
            )
            .bind(campaign_id)
            .bind(serial)
            .bind(status)
            .execute(&db.pool)
            .await
            .unwrap();
        }
        campaign_id
    }

    #[tokio::test]
    async fn progress_counts_by_status() {
        let (db, _dir) = test_db().await;
        let campaign_id = seed_campaign(&db).await;

        let p = progress(&db, campaign_id).await.unwrap();
        assert_eq!(p.total, 3);
        assert_eq!(p.updated, 1);
        assert_eq!(p.sent, 1);
        assert_eq!(p.failed, 1);
        assert!(!p.done);

        // Finish the in-flight enrollment; the campaign becomes terminal.
        sqlx::query("UPDATE campaign_enrollments SET status = 'updated' WHERE serial_number = 'SN-002'")
            .execute(&db.pool)
            .await
            .unwrap();
        let p = progress(&db, campaign_id).await.unwrap();
        assert!(p.done);
    }

    #[tokio::test]
    async fn stream_ends_after_terminal_frame() {
        use futures::StreamExt;

        let (db, _dir) = test_db().await;
        let campaign_id = seed_campaign(&db).await;
        sqlx::query("UPDATE campaign_enrollments SET status = 'updated'")
            .execute(&db.pool)
            .await
            .unwrap();

        let frames: Vec<_> = campaign_stream(db.clone(), campaign_id).collect().await;
        // Terminal on the first frame: exactly one frame, then close.
        assert_eq!(frames.len(), 1);
    }
}
