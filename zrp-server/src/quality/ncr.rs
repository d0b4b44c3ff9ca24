//! Non-conformance reports.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use super::forward_transition;
use crate::db::{Db, ids};
use crate::history::{self, ChangeOp};
use crate::utils::bulk::BulkOutcome;
use crate::utils::validation::{MAX_NAME_LEN, MAX_NOTE_LEN, MAX_SHORT_TEXT_LEN, Validator};
use crate::utils::{AppError, AppResult, now_millis};

const STATES: [&str; 4] = ["open", "investigating", "resolved", "closed"];
const SEVERITIES: [&str; 3] = ["minor", "major", "critical"];

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Ncr {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub ipn: Option<String>,
    pub defect_type: String,
    pub severity: String,
    pub status: String,
    pub po_id: Option<String>,
    pub disposition: Option<String>,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewNcr {
    pub title: String,
    pub description: Option<String>,
    pub ipn: Option<String>,
    #[serde(default = "default_defect_type")]
    pub defect_type: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    pub po_id: Option<String>,
}

fn default_defect_type() -> String {
    "other".to_string()
}

fn default_severity() -> String {
    "minor".to_string()
}

pub(crate) async fn load(conn: &mut SqliteConnection, id: &str) -> AppResult<Ncr> {
    let row: Option<Ncr> = sqlx::query_as(
        "SELECT id, title, description, ipn, defect_type, severity, status, po_id, disposition, \
         created_by, created_at, resolved_at FROM ncrs WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    row.ok_or_else(|| AppError::not_found(format!("NCR {id}")))
}

/// Create an NCR inside the caller's transaction. Used directly by the
/// receiving-inspection failure path.
pub async fn create_ncr_tx(conn: &mut SqliteConnection, user: &str, req: &NewNcr) -> AppResult<Ncr> {
    let mut v = Validator::new();
    v.require_text(&req.title, "title", MAX_NAME_LEN)
        .optional_text(req.description.as_deref(), "description", MAX_NOTE_LEN)
        .optional_text(req.ipn.as_deref(), "ipn", MAX_SHORT_TEXT_LEN)
        .one_of(&req.severity, &SEVERITIES, "severity");
    v.finish()?;

    let id = ids::next_id(&mut *conn, ids::IdFamily::Ncr).await?;
    sqlx::query(
        "INSERT INTO ncrs (id, title, description, ipn, defect_type, severity, status, po_id, created_by, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, 'open', ?, ?, ?)",
    )
    .bind(&id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(&req.ipn)
    .bind(&req.defect_type)
    .bind(&req.severity)
    .bind(&req.po_id)
    .bind(user)
    .bind(now_millis())
    .execute(&mut *conn)
    .await?;

    let ncr = load(&mut *conn, &id).await?;
    history::record_change(
        conn,
        user,
        "ncrs",
        &id,
        ChangeOp::Create,
        None,
        Some(&serde_json::to_value(&ncr)?),
    )
    .await?;
    Ok(ncr)
}

pub async fn create(db: &Db, user: &str, req: &NewNcr) -> AppResult<Ncr> {
    let mut tx = db.begin().await?;
    let ncr = create_ncr_tx(&mut tx, user, req).await?;
    tx.commit().await?;
    Ok(ncr)
}

pub async fn get(db: &Db, id: &str) -> AppResult<Ncr> {
    let mut conn = db.pool.acquire().await?;
    load(&mut conn, id).await
}

pub async fn list(
    db: &Db,
    status: Option<&str>,
    offset: i64,
    limit: i64,
) -> AppResult<(Vec<Ncr>, i64)> {
    let filter = if status.is_some() { " WHERE status = ?" } else { "" };
    let count_sql = format!("SELECT COUNT(*) FROM ncrs{filter}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(s) = status {
        count_query = count_query.bind(s);
    }
    let total = count_query.fetch_one(&db.pool).await?;

    let select_sql = format!(
        "SELECT id, title, description, ipn, defect_type, severity, status, po_id, disposition, \
         created_by, created_at, resolved_at FROM ncrs{filter} ORDER BY id DESC LIMIT ? OFFSET ?"
    );
    let mut select_query = sqlx::query_as::<_, Ncr>(&select_sql);
    if let Some(s) = status {
        select_query = select_query.bind(s);
    }
    let rows = select_query.bind(limit).bind(offset).fetch_all(&db.pool).await?;
    Ok((rows, total))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NcrUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub severity: Option<String>,
    pub disposition: Option<String>,
}

pub async fn update(db: &Db, user: &str, id: &str, req: &NcrUpdate) -> AppResult<Ncr> {
    let mut v = Validator::new();
    v.optional_text(req.title.as_deref(), "title", MAX_NAME_LEN)
        .optional_text(req.description.as_deref(), "description", MAX_NOTE_LEN);
    if let Some(ref s) = req.severity {
        v.one_of(s, &SEVERITIES, "severity");
    }
    v.finish()?;

    let mut tx = db.begin().await?;
    let before = load(&mut tx, id).await?;

    sqlx::query(
        "UPDATE ncrs SET title = COALESCE(?, title), description = COALESCE(?, description), \
         severity = COALESCE(?, severity), disposition = COALESCE(?, disposition) WHERE id = ?",
    )
    .bind(&req.title)
    .bind(&req.description)
    .bind(&req.severity)
    .bind(&req.disposition)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let updated = load(&mut tx, id).await?;
    history::record_change(
        &mut tx,
        user,
        "ncrs",
        id,
        ChangeOp::Update,
        Some(&serde_json::to_value(&before)?),
        Some(&serde_json::to_value(&updated)?),
    )
    .await?;
    tx.commit().await?;
    Ok(updated)
}

/// Forward-only status transition; `resolved` and `closed` stamp
/// `resolved_at`.
pub async fn transition(db: &Db, user: &str, id: &str, new_status: &str) -> AppResult<Ncr> {
    let mut tx = db.begin().await?;
    let before = load(&mut tx, id).await?;
    forward_transition(&STATES, &before.status, new_status, "NCR")?;

    let resolved_at = if matches!(new_status, "resolved" | "closed") {
        before.resolved_at.or(Some(now_millis()))
    } else {
        before.resolved_at
    };
    sqlx::query("UPDATE ncrs SET status = ?, resolved_at = ? WHERE id = ?")
        .bind(new_status)
        .bind(resolved_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let updated = load(&mut tx, id).await?;
    history::record_change(
        &mut tx,
        user,
        "ncrs",
        id,
        ChangeOp::Update,
        Some(&serde_json::to_value(&before)?),
        Some(&serde_json::to_value(&updated)?),
    )
    .await?;
    tx.commit().await?;
    Ok(updated)
}

pub async fn delete(db: &Db, user: &str, id: &str) -> AppResult<()> {
    let mut tx = db.begin().await?;
    let ncr = load(&mut tx, id).await?;
    let snapshot = serde_json::to_value(&ncr)?;
    sqlx::query("DELETE FROM ncrs WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    history::record_change(&mut tx, user, "ncrs", id, ChangeOp::Delete, Some(&snapshot), None)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Per-item bulk transition; no transaction spans items.
pub async fn bulk_transition(
    db: &Db,
    user: &str,
    ids: &[String],
    new_status: &str,
) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    for id in ids {
        match transition(db, user, id, new_status).await {
            Ok(_) => outcome.ok(),
            Err(e) => outcome.fail(id, e),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    fn new_ncr(title: &str) -> NewNcr {
        NewNcr {
            title: title.into(),
            description: None,
            ipn: Some("RES-001".into()),
            defect_type: "other".into(),
            severity: "minor".into(),
            po_id: None,
        }
    }

    #[tokio::test]
    async fn lifecycle_stamps_resolved_at() {
        let (db, _dir) = test_db().await;
        let ncr = create(&db, "alice", &new_ncr("Solder bridging")).await.unwrap();
        assert!(ncr.id.starts_with("NCR-"));
        assert_eq!(ncr.status, "open");

        let ncr = transition(&db, "alice", &ncr.id, "investigating").await.unwrap();
        assert!(ncr.resolved_at.is_none());
        let ncr = transition(&db, "alice", &ncr.id, "resolved").await.unwrap();
        assert!(ncr.resolved_at.is_some());
        let resolved_at = ncr.resolved_at;
        let ncr = transition(&db, "alice", &ncr.id, "closed").await.unwrap();
        // First stamp wins.
        assert_eq!(ncr.resolved_at, resolved_at);

        // Terminal.
        let err = transition(&db, "alice", &ncr.id, "open").await.unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn bulk_accumulates_errors() {
        let (db, _dir) = test_db().await;
        let a = create(&db, "alice", &new_ncr("A")).await.unwrap();
        let b = create(&db, "alice", &new_ncr("B")).await.unwrap();
        transition(&db, "alice", &b.id, "closed").await.unwrap();

        let outcome = bulk_transition(
            &db,
            "alice",
            &[a.id.clone(), b.id.clone(), "NCR-2026-999".into()],
            "closed",
        )
        .await;
        assert_eq!(outcome.success, 1);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.errors.len(), 2);
    }
}
