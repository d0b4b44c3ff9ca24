//! Engineering change orders.
//!
//! Approval stamps `approved_by`/`approved_at` and emits `eco_approved`
//! on the bus (with its notification row for the email dispatcher).
//! Implementation records the affected-IPN list for downstream sync; the
//! externally owned parts library itself is never mutated here.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use super::forward_transition;
use crate::db::{Db, ids};
use crate::events::{AppEvent, EventBus, notifications};
use crate::history::{self, ChangeOp};
use crate::utils::validation::{MAX_NAME_LEN, MAX_NOTE_LEN, Validator};
use crate::utils::{AppError, AppResult, now_millis};

const STATES: [&str; 4] = ["draft", "review", "approved", "implemented"];
const TERMINAL: [&str; 2] = ["implemented", "rejected"];

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Eco {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub reason: Option<String>,
    pub ncr_id: Option<String>,
    pub status: String,
    /// JSON array of IPNs this change touches.
    pub affected_ipns: Option<String>,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub approved_by: Option<String>,
    pub approved_at: Option<i64>,
    pub implemented_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEco {
    pub title: String,
    pub description: Option<String>,
    pub reason: Option<String>,
    /// Source NCR, when this change originates from a non-conformance.
    pub ncr_id: Option<String>,
    #[serde(default)]
    pub affected_ipns: Vec<String>,
}

async fn load(conn: &mut SqliteConnection, id: &str) -> AppResult<Eco> {
    let row: Option<Eco> = sqlx::query_as(
        "SELECT id, title, description, reason, ncr_id, status, affected_ipns, created_by, \
         created_at, approved_by, approved_at, implemented_at FROM ecos WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    row.ok_or_else(|| AppError::not_found(format!("ECO {id}")))
}

pub async fn create(db: &Db, user: &str, req: &NewEco) -> AppResult<Eco> {
    let mut v = Validator::new();
    v.require_text(&req.title, "title", MAX_NAME_LEN)
        .optional_text(req.description.as_deref(), "description", MAX_NOTE_LEN)
        .optional_text(req.reason.as_deref(), "reason", MAX_NOTE_LEN);
    v.finish()?;

    let mut tx = db.begin().await?;

    if let Some(ref ncr_id) = req.ncr_id {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ncrs WHERE id = ?")
            .bind(ncr_id)
            .fetch_one(&mut *tx)
            .await?;
        if exists == 0 {
            return Err(AppError::not_found(format!("NCR {ncr_id}")));
        }
    }

    let id = ids::next_id(&mut tx, ids::IdFamily::Eco).await?;
    let affected = if req.affected_ipns.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&req.affected_ipns)?)
    };
    sqlx::query(
        "INSERT INTO ecos (id, title, description, reason, ncr_id, status, affected_ipns, created_by, created_at) \
         VALUES (?, ?, ?, ?, ?, 'draft', ?, ?, ?)",
    )
    .bind(&id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(&req.reason)
    .bind(&req.ncr_id)
    .bind(&affected)
    .bind(user)
    .bind(now_millis())
    .execute(&mut *tx)
    .await?;

    let eco = load(&mut tx, &id).await?;
    history::record_change(
        &mut tx,
        user,
        "ecos",
        &id,
        ChangeOp::Create,
        None,
        Some(&serde_json::to_value(&eco)?),
    )
    .await?;
    tx.commit().await?;
    Ok(eco)
}

pub async fn get(db: &Db, id: &str) -> AppResult<Eco> {
    let mut conn = db.pool.acquire().await?;
    load(&mut conn, id).await
}

pub async fn list(
    db: &Db,
    status: Option<&str>,
    offset: i64,
    limit: i64,
) -> AppResult<(Vec<Eco>, i64)> {
    let filter = if status.is_some() { " WHERE status = ?" } else { "" };
    let count_sql = format!("SELECT COUNT(*) FROM ecos{filter}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(s) = status {
        count_query = count_query.bind(s);
    }
    let total = count_query.fetch_one(&db.pool).await?;

    let select_sql = format!(
        "SELECT id, title, description, reason, ncr_id, status, affected_ipns, created_by, \
         created_at, approved_by, approved_at, implemented_at \
         FROM ecos{filter} ORDER BY id DESC LIMIT ? OFFSET ?"
    );
    let mut select_query = sqlx::query_as::<_, Eco>(&select_sql);
    if let Some(s) = status {
        select_query = select_query.bind(s);
    }
    let rows = select_query.bind(limit).bind(offset).fetch_all(&db.pool).await?;
    Ok((rows, total))
}

/// Status transition. Forward-only through
/// `draft → review → approved → implemented`; `rejected` is reachable
/// from any non-terminal state.
pub async fn transition(
    db: &Db,
    bus: &EventBus,
    user: &str,
    id: &str,
    new_status: &str,
) -> AppResult<Eco> {
    let mut tx = db.begin().await?;
    let before = load(&mut tx, id).await?;

    if TERMINAL.contains(&before.status.as_str()) {
        return Err(AppError::conflict(format!(
            "ECO {id} is {} and cannot change state",
            before.status
        )));
    }
    if new_status != "rejected" {
        forward_transition(&STATES, &before.status, new_status, "ECO")?;
    }

    let (approved_by, approved_at) = if new_status == "approved" {
        (Some(user.to_string()), Some(now_millis()))
    } else {
        (before.approved_by.clone(), before.approved_at)
    };
    let implemented_at = if new_status == "implemented" {
        Some(now_millis())
    } else {
        before.implemented_at
    };

    sqlx::query(
        "UPDATE ecos SET status = ?, approved_by = ?, approved_at = ?, implemented_at = ? WHERE id = ?",
    )
    .bind(new_status)
    .bind(&approved_by)
    .bind(approved_at)
    .bind(implemented_at)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let updated = load(&mut tx, id).await?;
    history::record_change(
        &mut tx,
        user,
        "ecos",
        id,
        ChangeOp::Update,
        Some(&serde_json::to_value(&before)?),
        Some(&serde_json::to_value(&updated)?),
    )
    .await?;
    tx.commit().await?;

    if new_status == "approved" {
        let notification_id = notifications::insert_dedup(
            db,
            "eco_approved",
            "info",
            &format!("ECO approved: {id}"),
            &format!("{} was approved by {user}", updated.title),
            Some("ecos"),
            Some(id),
        )
        .await?;
        bus.emit(AppEvent::EcoApproved {
            eco_id: id.to_string(),
            notification_id,
        });
    }
    Ok(updated)
}

pub async fn delete(db: &Db, user: &str, id: &str) -> AppResult<()> {
    let mut tx = db.begin().await?;
    let eco = load(&mut tx, id).await?;
    let snapshot = serde_json::to_value(&eco)?;
    sqlx::query("DELETE FROM ecos WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    history::record_change(&mut tx, user, "ecos", id, ChangeOp::Delete, Some(&snapshot), None)
        .await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    fn new_eco(title: &str) -> NewEco {
        NewEco {
            title: title.into(),
            description: None,
            reason: Some("DFM".into()),
            ncr_id: None,
            affected_ipns: vec!["RES-001".into()],
        }
    }

    #[tokio::test]
    async fn approval_stamps_and_emits() {
        let (db, _dir) = test_db().await;
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let eco = create(&db, "alice", &new_eco("Swap resistor vendor")).await.unwrap();
        transition(&db, &bus, "alice", &eco.id, "review").await.unwrap();
        let eco = transition(&db, &bus, "bob", &eco.id, "approved").await.unwrap();

        assert_eq!(eco.approved_by.as_deref(), Some("bob"));
        assert!(eco.approved_at.is_some());

        let event = crate::events::recv_next(&bus, &mut rx).await.unwrap();
        match event {
            AppEvent::EcoApproved { eco_id, notification_id } => {
                assert_eq!(eco_id, eco.id);
                assert!(notification_id.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_from_any_nonterminal() {
        let (db, _dir) = test_db().await;
        let bus = EventBus::new(16);

        let eco = create(&db, "alice", &new_eco("A")).await.unwrap();
        let eco = transition(&db, &bus, "alice", &eco.id, "rejected").await.unwrap();
        assert_eq!(eco.status, "rejected");

        // Terminal now.
        let err = transition(&db, &bus, "alice", &eco.id, "review").await.unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn ncr_link_must_exist() {
        let (db, _dir) = test_db().await;
        let mut req = new_eco("Linked");
        req.ncr_id = Some("NCR-2026-001".into());
        let err = create(&db, "alice", &req).await.unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::NotFound);
    }
}
