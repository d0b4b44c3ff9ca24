//! Corrective and preventive actions.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use super::forward_transition;
use crate::db::{Db, ids};
use crate::history::{self, ChangeOp};
use crate::utils::validation::{MAX_NAME_LEN, MAX_NOTE_LEN, Validator};
use crate::utils::{AppError, AppResult, now_millis};

const STATES: [&str; 4] = ["open", "in_progress", "verified", "closed"];

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Capa {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub ncr_id: Option<String>,
    pub eco_id: Option<String>,
    pub status: String,
    pub owner: Option<String>,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub closed_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCapa {
    pub title: String,
    pub description: Option<String>,
    pub ncr_id: Option<String>,
    pub eco_id: Option<String>,
    pub owner: Option<String>,
}

async fn load(conn: &mut SqliteConnection, id: &str) -> AppResult<Capa> {
    let row: Option<Capa> = sqlx::query_as(
        "SELECT id, title, description, ncr_id, eco_id, status, owner, created_by, created_at, closed_at \
         FROM capas WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    row.ok_or_else(|| AppError::not_found(format!("CAPA {id}")))
}

pub async fn create(db: &Db, user: &str, req: &NewCapa) -> AppResult<Capa> {
    let mut v = Validator::new();
    v.require_text(&req.title, "title", MAX_NAME_LEN)
        .optional_text(req.description.as_deref(), "description", MAX_NOTE_LEN);
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
    if let Some(ref eco_id) = req.eco_id {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ecos WHERE id = ?")
            .bind(eco_id)
            .fetch_one(&mut *tx)
            .await?;
        if exists == 0 {
            return Err(AppError::not_found(format!("ECO {eco_id}")));
        }
    }

    let id = ids::next_id(&mut tx, ids::IdFamily::Capa).await?;
    sqlx::query(
        "INSERT INTO capas (id, title, description, ncr_id, eco_id, status, owner, created_by, created_at) \
         VALUES (?, ?, ?, ?, ?, 'open', ?, ?, ?)",
    )
    .bind(&id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(&req.ncr_id)
    .bind(&req.eco_id)
    .bind(&req.owner)
    .bind(user)
    .bind(now_millis())
    .execute(&mut *tx)
    .await?;

    let capa = load(&mut tx, &id).await?;
    history::record_change(
        &mut tx,
        user,
        "capas",
        &id,
        ChangeOp::Create,
        None,
        Some(&serde_json::to_value(&capa)?),
    )
    .await?;
    tx.commit().await?;
    Ok(capa)
}

pub async fn get(db: &Db, id: &str) -> AppResult<Capa> {
    let mut conn = db.pool.acquire().await?;
    load(&mut conn, id).await
}

pub async fn list(
    db: &Db,
    status: Option<&str>,
    offset: i64,
    limit: i64,
) -> AppResult<(Vec<Capa>, i64)> {
    let filter = if status.is_some() { " WHERE status = ?" } else { "" };
    let count_sql = format!("SELECT COUNT(*) FROM capas{filter}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(s) = status {
        count_query = count_query.bind(s);
    }
    let total = count_query.fetch_one(&db.pool).await?;

    let select_sql = format!(
        "SELECT id, title, description, ncr_id, eco_id, status, owner, created_by, created_at, closed_at \
         FROM capas{filter} ORDER BY id DESC LIMIT ? OFFSET ?"
    );
    let mut select_query = sqlx::query_as::<_, Capa>(&select_sql);
    if let Some(s) = status {
        select_query = select_query.bind(s);
    }
    let rows = select_query.bind(limit).bind(offset).fetch_all(&db.pool).await?;
    Ok((rows, total))
}

pub async fn transition(db: &Db, user: &str, id: &str, new_status: &str) -> AppResult<Capa> {
    let mut tx = db.begin().await?;
    let before = load(&mut tx, id).await?;
    forward_transition(&STATES, &before.status, new_status, "CAPA")?;

    let closed_at = if new_status == "closed" {
        Some(now_millis())
    } else {
        before.closed_at
    };
    sqlx::query("UPDATE capas SET status = ?, closed_at = ? WHERE id = ?")
        .bind(new_status)
        .bind(closed_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let updated = load(&mut tx, id).await?;
    history::record_change(
        &mut tx,
        user,
        "capas",
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
    let capa = load(&mut tx, id).await?;
    let snapshot = serde_json::to_value(&capa)?;
    sqlx::query("DELETE FROM capas WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    history::record_change(&mut tx, user, "capas", id, ChangeOp::Delete, Some(&snapshot), None)
        .await?;
    tx.commit().await?;
    Ok(())
}
