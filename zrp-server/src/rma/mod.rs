//! Return merchandise authorizations.
//!
//! Lifecycle: `open → received → repaired → returned → closed`
//! (forward-only, `closed` terminal). Receiving a returned unit back into
//! stock writes a `return` ledger transaction when restock is requested.
//! The periodic scanner surfaces RMAs opened within the last hour.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::db::{Db, ids};
use crate::history::{self, ChangeOp};
use crate::inventory;
use crate::quality::forward_transition;
use crate::utils::validation::{MAX_NAME_LEN, MAX_NOTE_LEN, MAX_SHORT_TEXT_LEN, Validator};
use crate::utils::{AppError, AppResult, now_millis};

const STATES: [&str; 5] = ["open", "received", "repaired", "returned", "closed"];

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Rma {
    pub id: String,
    pub customer: String,
    pub serial_number: Option<String>,
    pub ipn: Option<String>,
    pub reason: Option<String>,
    pub status: String,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub closed_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRma {
    pub customer: String,
    pub serial_number: Option<String>,
    pub ipn: Option<String>,
    pub reason: Option<String>,
}

async fn load(conn: &mut SqliteConnection, id: &str) -> AppResult<Rma> {
    let row: Option<Rma> = sqlx::query_as(
        "SELECT id, customer, serial_number, ipn, reason, status, created_by, created_at, closed_at \
         FROM rmas WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    row.ok_or_else(|| AppError::not_found(format!("RMA {id}")))
}

pub async fn create(db: &Db, user: &str, req: &NewRma) -> AppResult<Rma> {
    let mut v = Validator::new();
    v.require_text(&req.customer, "customer", MAX_NAME_LEN)
        .optional_text(req.serial_number.as_deref(), "serial_number", MAX_SHORT_TEXT_LEN)
        .optional_text(req.ipn.as_deref(), "ipn", MAX_SHORT_TEXT_LEN)
        .optional_text(req.reason.as_deref(), "reason", MAX_NOTE_LEN);
    v.finish()?;

    let mut tx = db.begin().await?;
    let id = ids::next_id(&mut tx, ids::IdFamily::Rma).await?;
    sqlx::query(
        "INSERT INTO rmas (id, customer, serial_number, ipn, reason, status, created_by, created_at) \
         VALUES (?, ?, ?, ?, ?, 'open', ?, ?)",
    )
    .bind(&id)
    .bind(&req.customer)
    .bind(&req.serial_number)
    .bind(&req.ipn)
    .bind(&req.reason)
    .bind(user)
    .bind(now_millis())
    .execute(&mut *tx)
    .await?;

    let rma = load(&mut tx, &id).await?;
    history::record_change(
        &mut tx,
        user,
        "rmas",
        &id,
        ChangeOp::Create,
        None,
        Some(&serde_json::to_value(&rma)?),
    )
    .await?;
    tx.commit().await?;
    Ok(rma)
}

pub async fn get(db: &Db, id: &str) -> AppResult<Rma> {
    let mut conn = db.pool.acquire().await?;
    load(&mut conn, id).await
}

pub async fn list(
    db: &Db,
    status: Option<&str>,
    offset: i64,
    limit: i64,
) -> AppResult<(Vec<Rma>, i64)> {
    let filter = if status.is_some() { " WHERE status = ?" } else { "" };
    let count_sql = format!("SELECT COUNT(*) FROM rmas{filter}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(s) = status {
        count_query = count_query.bind(s);
    }
    let total = count_query.fetch_one(&db.pool).await?;

    let select_sql = format!(
        "SELECT id, customer, serial_number, ipn, reason, status, created_by, created_at, closed_at \
         FROM rmas{filter} ORDER BY id DESC LIMIT ? OFFSET ?"
    );
    let mut select_query = sqlx::query_as::<_, Rma>(&select_sql);
    if let Some(s) = status {
        select_query = select_query.bind(s);
    }
    let rows = select_query.bind(limit).bind(offset).fetch_all(&db.pool).await?;
    Ok((rows, total))
}

/// Forward-only transition. Moving to `received` with `restock = true`
/// returns the unit to stock through the ledger (requires an IPN on the
/// RMA).
pub async fn transition(
    db: &Db,
    user: &str,
    id: &str,
    new_status: &str,
    restock: bool,
) -> AppResult<Rma> {
    let mut tx = db.begin().await?;
    let before = load(&mut tx, id).await?;
    forward_transition(&STATES, &before.status, new_status, "RMA")?;

    if new_status == "received" && restock {
        let ipn = before.ipn.clone().ok_or_else(|| {
            AppError::precondition("RMA has no IPN; cannot restock the returned unit")
        })?;
        inventory::return_stock(&mut tx, &ipn, 1, Some(id), Some(user)).await?;
    }

    let closed_at = if new_status == "closed" {
        Some(now_millis())
    } else {
        before.closed_at
    };
    sqlx::query("UPDATE rmas SET status = ?, closed_at = ? WHERE id = ?")
        .bind(new_status)
        .bind(closed_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let updated = load(&mut tx, id).await?;
    history::record_change(
        &mut tx,
        user,
        "rmas",
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
    let rma = load(&mut tx, id).await?;
    let snapshot = serde_json::to_value(&rma)?;
    sqlx::query("DELETE FROM rmas WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    history::record_change(&mut tx, user, "rmas", id, ChangeOp::Delete, Some(&snapshot), None)
        .await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    #[tokio::test]
    async fn restock_writes_return_txn() {
        let (db, _dir) = test_db().await;
        let rma = create(
            &db,
            "alice",
            &NewRma {
                customer: "Initech".into(),
                serial_number: Some("SN-100".into()),
                ipn: Some("ASY-001".into()),
                reason: Some("dead on arrival".into()),
            },
        )
        .await
        .unwrap();
        assert!(rma.id.starts_with("RMA-"));

        transition(&db, "alice", &rma.id, "received", true).await.unwrap();

        let item = inventory::get(&db, "ASY-001").await.unwrap().unwrap();
        assert_eq!(item.qty_on_hand, 1);
        let txn_type: String = sqlx::query_scalar(
            "SELECT txn_type FROM inventory_txns WHERE ipn = 'ASY-001' ORDER BY id DESC LIMIT 1",
        )
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(txn_type, "return");
    }

    #[tokio::test]
    async fn restock_without_ipn_rejected() {
        let (db, _dir) = test_db().await;
        let rma = create(
            &db,
            "alice",
            &NewRma {
                customer: "Initech".into(),
                serial_number: None,
                ipn: None,
                reason: None,
            },
        )
        .await
        .unwrap();

        let err = transition(&db, "alice", &rma.id, "received", true).await.unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::Precondition);

        // Without restock the transition goes through.
        let rma = transition(&db, "alice", &rma.id, "received", false).await.unwrap();
        assert_eq!(rma.status, "received");
    }

    #[tokio::test]
    async fn closed_is_terminal() {
        let (db, _dir) = test_db().await;
        let rma = create(
            &db,
            "alice",
            &NewRma {
                customer: "Initech".into(),
                serial_number: None,
                ipn: None,
                reason: None,
            },
        )
        .await
        .unwrap();
        let rma = transition(&db, "alice", &rma.id, "closed", false).await.unwrap();
        assert!(rma.closed_at.is_some());
        assert!(transition(&db, "alice", &rma.id, "open", false).await.is_err());
    }
}
