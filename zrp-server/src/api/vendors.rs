//! Vendor endpoints.
//!
//! Deleting a vendor referenced by purchase orders or RFQs is refused by
//! the foreign-key RESTRICT and surfaces as a 409.

use axum::extract::{Extension, Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::{ClientMeta, CurrentUser};
use crate::core::ServerState;
use crate::db::ids;
use crate::history::{self, ChangeOp};
use crate::utils::envelope::PageQuery;
use crate::utils::validation::{MAX_NAME_LEN, MAX_NOTE_LEN, Validator};
use crate::utils::{ApiResponse, AppError, AppResult, created, now_millis, ok, ok_list};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/vendors", get(list).post(create))
        .route(
            "/api/v1/vendors/{id}",
            get(get_one).put(update).delete(remove),
        )
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Vendor {
    pub id: String,
    pub name: String,
    pub contact: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub lead_time_days: i64,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: i64,
}

const STATUSES: [&str; 3] = ["active", "preferred", "inactive"];

async fn load(state: &ServerState, id: &str) -> AppResult<Vendor> {
    let row: Option<Vendor> = sqlx::query_as(
        "SELECT id, name, contact, email, phone, lead_time_days, status, notes, created_at \
         FROM vendors WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await?;
    row.ok_or_else(|| AppError::not_found(format!("Vendor {id}")))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    q: Option<String>,
}

async fn list(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<Vendor>>>> {
    let page = page.clamped();
    let mut conditions = Vec::new();
    if query.status.is_some() {
        conditions.push("status = ?");
    }
    if query.q.is_some() {
        conditions.push("(name LIKE ? OR id LIKE ?)");
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    let like = query.q.as_ref().map(|q| format!("%{q}%"));

    let count_sql = format!("SELECT COUNT(*) FROM vendors{where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(ref s) = query.status {
        count_query = count_query.bind(s);
    }
    if let Some(ref l) = like {
        count_query = count_query.bind(l).bind(l);
    }
    let total = count_query.fetch_one(&state.db.pool).await?;

    let select_sql = format!(
        "SELECT id, name, contact, email, phone, lead_time_days, status, notes, created_at \
         FROM vendors{where_clause} ORDER BY id LIMIT ? OFFSET ?"
    );
    let mut select_query = sqlx::query_as::<_, Vendor>(&select_sql);
    if let Some(ref s) = query.status {
        select_query = select_query.bind(s);
    }
    if let Some(ref l) = like {
        select_query = select_query.bind(l).bind(l);
    }
    let rows = select_query
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&state.db.pool)
        .await?;
    Ok(ok_list(rows, total, page.page, page.limit))
}

async fn get_one(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Vendor>>> {
    Ok(ok(load(&state, &id).await?))
}

#[derive(Debug, Deserialize)]
struct VendorBody {
    name: String,
    contact: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    #[serde(default)]
    lead_time_days: i64,
    #[serde(default = "default_status")]
    status: String,
    notes: Option<String>,
}

fn default_status() -> String {
    "active".to_string()
}

fn validate_body(body: &VendorBody) -> AppResult<()> {
    let mut v = Validator::new();
    v.require_text(&body.name, "name", MAX_NAME_LEN)
        .non_negative(body.lead_time_days, "lead_time_days")
        .one_of(&body.status, &STATUSES, "status")
        .optional_text(body.notes.as_deref(), "notes", MAX_NOTE_LEN);
    v.finish()
}

async fn create(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(body): Json<VendorBody>,
) -> AppResult<axum::response::Response> {
    validate_body(&body)?;

    let mut tx = state.db.begin().await?;
    let id = ids::next_id(&mut tx, ids::IdFamily::Vendor).await?;
    sqlx::query(
        "INSERT INTO vendors (id, name, contact, email, phone, lead_time_days, status, notes, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&body.name)
    .bind(&body.contact)
    .bind(&body.email)
    .bind(&body.phone)
    .bind(body.lead_time_days)
    .bind(&body.status)
    .bind(&body.notes)
    .bind(now_millis())
    .execute(&mut *tx)
    .await?;

    let vendor: Vendor = sqlx::query_as(
        "SELECT id, name, contact, email, phone, lead_time_days, status, notes, created_at \
         FROM vendors WHERE id = ?",
    )
    .bind(&id)
    .fetch_one(&mut *tx)
    .await?;
    history::record_change(
        &mut tx,
        &user.username,
        "vendors",
        &id,
        ChangeOp::Create,
        None,
        Some(&serde_json::to_value(&vendor)?),
    )
    .await?;
    tx.commit().await?;

    state.audit.log(
        Some(&user),
        Some(&meta),
        "create",
        "vendors",
        &id,
        format!("Created vendor {}", vendor.name),
    );
    Ok(created(vendor))
}

async fn update(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
    Json(body): Json<VendorBody>,
) -> AppResult<Json<ApiResponse<Vendor>>> {
    validate_body(&body)?;
    let before = load(&state, &id).await?;

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "UPDATE vendors SET name = ?, contact = ?, email = ?, phone = ?, lead_time_days = ?, \
         status = ?, notes = ? WHERE id = ?",
    )
    .bind(&body.name)
    .bind(&body.contact)
    .bind(&body.email)
    .bind(&body.phone)
    .bind(body.lead_time_days)
    .bind(&body.status)
    .bind(&body.notes)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    let after: Vendor = sqlx::query_as(
        "SELECT id, name, contact, email, phone, lead_time_days, status, notes, created_at \
         FROM vendors WHERE id = ?",
    )
    .bind(&id)
    .fetch_one(&mut *tx)
    .await?;
    history::record_change(
        &mut tx,
        &user.username,
        "vendors",
        &id,
        ChangeOp::Update,
        Some(&serde_json::to_value(&before)?),
        Some(&serde_json::to_value(&after)?),
    )
    .await?;
    tx.commit().await?;

    state.audit.log_with_snapshots(
        Some(&user),
        Some(&meta),
        "update",
        "vendors",
        &id,
        format!("Updated vendor {}", after.name),
        Some(serde_json::to_value(&before)?),
        Some(serde_json::to_value(&after)?),
    );
    Ok(ok(after))
}

async fn remove(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let vendor = load(&state, &id).await?;
    let snapshot = serde_json::to_value(&vendor)?;

    let mut tx = state.db.begin().await?;
    // FK RESTRICT turns references from POs/RFQs into a conflict here.
    sqlx::query("DELETE FROM vendors WHERE id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    history::record_change(
        &mut tx,
        &user.username,
        "vendors",
        &id,
        ChangeOp::Delete,
        Some(&snapshot),
        None,
    )
    .await?;
    tx.commit().await?;

    state.audit.log(
        Some(&user),
        Some(&meta),
        "delete",
        "vendors",
        &id,
        format!("Deleted vendor {}", vendor.name),
    );
    Ok(ok(serde_json::json!({"deleted": true})))
}
