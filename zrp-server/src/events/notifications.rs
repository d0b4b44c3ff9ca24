//! Notification rows.
//!
//! Writers go through [`insert_dedup`]: for a given `(kind, record_id)` at
//! most one notification is created per 24-hour window. The check and the
//! insert run inside one transaction so concurrent scanners cannot double
//! up.

use serde::Serialize;

use crate::db::Db;
use crate::utils::{AppResult, now_millis, time::DAY_MS};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub kind: String,
    pub severity: String,
    pub title: String,
    pub message: String,
    pub module: Option<String>,
    pub record_id: Option<String>,
    pub read_at: Option<i64>,
    pub emailed: bool,
    pub created_at: i64,
}

/// Insert unless an identical `(kind, record_id)` notification exists in
/// the past 24 hours. Returns the new row id, or `None` when suppressed.
pub async fn insert_dedup(
    db: &Db,
    kind: &str,
    severity: &str,
    title: &str,
    message: &str,
    module: Option<&str>,
    record_id: Option<&str>,
) -> AppResult<Option<i64>> {
    let mut tx = db.begin().await?;
    let window_start = now_millis() - DAY_MS;

    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications \
         WHERE kind = ? AND record_id IS ? AND created_at > ?",
    )
    .bind(kind)
    .bind(record_id)
    .bind(window_start)
    .fetch_one(&mut *tx)
    .await?;
    if existing > 0 {
        return Ok(None);
    }

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO notifications (kind, severity, title, message, module, record_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(kind)
    .bind(severity)
    .bind(title)
    .bind(message)
    .bind(module)
    .bind(record_id)
    .bind(now_millis())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(id))
}

/// Claim a notification for email delivery. Returns true exactly once per
/// row.
pub async fn claim_for_email(db: &Db, notification_id: i64) -> AppResult<bool> {
    let result = sqlx::query("UPDATE notifications SET emailed = 1 WHERE id = ? AND emailed = 0")
        .bind(notification_id)
        .execute(&db.pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn get(db: &Db, id: i64) -> AppResult<Option<Notification>> {
    let row = sqlx::query_as::<_, Notification>(
        "SELECT id, kind, severity, title, message, module, record_id, read_at, emailed, created_at \
         FROM notifications WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&db.pool)
    .await?;
    Ok(row)
}

pub async fn list(
    db: &Db,
    unread_only: bool,
    offset: i64,
    limit: i64,
) -> AppResult<(Vec<Notification>, i64)> {
    let filter = if unread_only {
        " WHERE read_at IS NULL"
    } else {
        ""
    };
    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM notifications{filter}"))
        .fetch_one(&db.pool)
        .await?;
    let rows = sqlx::query_as::<_, Notification>(&format!(
        "SELECT id, kind, severity, title, message, module, record_id, read_at, emailed, created_at \
         FROM notifications{filter} ORDER BY id DESC LIMIT ? OFFSET ?"
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(&db.pool)
    .await?;
    Ok((rows, total))
}

pub async fn mark_read(db: &Db, id: i64) -> AppResult<bool> {
    let result = sqlx::query("UPDATE notifications SET read_at = ? WHERE id = ? AND read_at IS NULL")
        .bind(now_millis())
        .bind(id)
        .execute(&db.pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_all_read(db: &Db) -> AppResult<u64> {
    let result = sqlx::query("UPDATE notifications SET read_at = ? WHERE read_at IS NULL")
        .bind(now_millis())
        .execute(&db.pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    #[tokio::test]
    async fn dedup_suppresses_within_window() {
        let (db, _dir) = test_db().await;

        let first = insert_dedup(&db, "low_stock", "warning", "Low stock", "RES-001 low", Some("inventory"), Some("RES-001"))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = insert_dedup(&db, "low_stock", "warning", "Low stock", "RES-001 low", Some("inventory"), Some("RES-001"))
            .await
            .unwrap();
        assert!(second.is_none());

        // Different record id is not suppressed.
        let other = insert_dedup(&db, "low_stock", "warning", "Low stock", "CAP-001 low", Some("inventory"), Some("CAP-001"))
            .await
            .unwrap();
        assert!(other.is_some());
    }

    #[tokio::test]
    async fn dedup_allows_after_window() {
        let (db, _dir) = test_db().await;
        let id = insert_dedup(&db, "overdue_wo", "warning", "Overdue", "WO overdue", Some("workorders"), Some("WO-2026-0001"))
            .await
            .unwrap()
            .unwrap();

        // Age the row past 24 h.
        sqlx::query("UPDATE notifications SET created_at = created_at - ? WHERE id = ?")
            .bind(25 * crate::utils::time::HOUR_MS)
            .bind(id)
            .execute(&db.pool)
            .await
            .unwrap();

        let again = insert_dedup(&db, "overdue_wo", "warning", "Overdue", "WO overdue", Some("workorders"), Some("WO-2026-0001"))
            .await
            .unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn claim_is_exactly_once() {
        let (db, _dir) = test_db().await;
        let id = insert_dedup(&db, "eco_approved", "info", "ECO approved", "ECO-2026-001", Some("ecos"), Some("ECO-2026-001"))
            .await
            .unwrap()
            .unwrap();
        assert!(claim_for_email(&db, id).await.unwrap());
        assert!(!claim_for_email(&db, id).await.unwrap());
    }

    #[tokio::test]
    async fn read_flags() {
        let (db, _dir) = test_db().await;
        let id = insert_dedup(&db, "new_rma", "info", "New RMA", "RMA-2026-001", Some("rmas"), Some("RMA-2026-001"))
            .await
            .unwrap()
            .unwrap();

        let (unread, total) = list(&db, true, 0, 50).await.unwrap();
        assert_eq!((unread.len(), total), (1, 1));

        assert!(mark_read(&db, id).await.unwrap());
        let (unread, _) = list(&db, true, 0, 50).await.unwrap();
        assert!(unread.is_empty());
    }
}
