//! Device registry endpoints.

use axum::extract::{Extension, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::{ClientMeta, CurrentUser};
use crate::core::ServerState;
use crate::events::AppEvent;
use crate::history::{self, ChangeOp};
use crate::utils::envelope::PageQuery;
use crate::utils::{ApiResponse, AppError, AppResult, created, now_millis, ok, ok_list};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/devices", get(list).post(create))
        .route(
            "/api/v1/devices/{serial}",
            get(get_one).put(update).delete(remove),
        )
        .route("/api/v1/devices/{serial}/checkin", post(checkin))
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Device {
    pub serial_number: String,
    pub ipn: Option<String>,
    pub hw_rev: Option<String>,
    pub fw_version: Option<String>,
    pub customer: Option<String>,
    pub notes: Option<String>,
    pub created_at: i64,
    pub last_seen_at: Option<i64>,
}

async fn load(state: &ServerState, serial: &str) -> AppResult<Device> {
    let row: Option<Device> = sqlx::query_as(
        "SELECT serial_number, ipn, hw_rev, fw_version, customer, notes, created_at, last_seen_at \
         FROM devices WHERE serial_number = ?",
    )
    .bind(serial)
    .fetch_optional(&state.db.pool)
    .await?;
    row.ok_or_else(|| AppError::not_found(format!("Device {serial}")))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    q: Option<String>,
}

async fn list(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<Device>>>> {
    let page = page.clamped();
    let filter = if query.q.is_some() {
        " WHERE serial_number LIKE ? OR customer LIKE ?"
    } else {
        ""
    };
    let like = query.q.as_ref().map(|q| format!("%{q}%"));

    let count_sql = format!("SELECT COUNT(*) FROM devices{filter}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(ref l) = like {
        count_query = count_query.bind(l).bind(l);
    }
    let total = count_query.fetch_one(&state.db.pool).await?;

    let select_sql = format!(
        "SELECT serial_number, ipn, hw_rev, fw_version, customer, notes, created_at, last_seen_at \
         FROM devices{filter} ORDER BY serial_number LIMIT ? OFFSET ?"
    );
    let mut select_query = sqlx::query_as::<_, Device>(&select_sql);
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
    Path(serial): Path<String>,
) -> AppResult<Json<ApiResponse<Device>>> {
    Ok(ok(load(&state, &serial).await?))
}

#[derive(Debug, Deserialize)]
struct DeviceBody {
    serial_number: Option<String>,
    ipn: Option<String>,
    hw_rev: Option<String>,
    fw_version: Option<String>,
    customer: Option<String>,
    notes: Option<String>,
}

async fn create(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(body): Json<DeviceBody>,
) -> AppResult<axum::response::Response> {
    let serial = body
        .serial_number
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::validation("serial_number must not be empty"))?
        .to_string();

    // Duplicate serials surface as 409 through the primary key.
    sqlx::query(
        "INSERT INTO devices (serial_number, ipn, hw_rev, fw_version, customer, notes, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&serial)
    .bind(&body.ipn)
    .bind(&body.hw_rev)
    .bind(&body.fw_version)
    .bind(&body.customer)
    .bind(&body.notes)
    .bind(now_millis())
    .execute(&state.db.pool)
    .await?;

    state.audit.log(
        Some(&user),
        Some(&meta),
        "create",
        "devices",
        &serial,
        "Registered device",
    );
    Ok(created(load(&state, &serial).await?))
}

async fn update(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Path(serial): Path<String>,
    Json(body): Json<DeviceBody>,
) -> AppResult<Json<ApiResponse<Device>>> {
    let before = load(&state, &serial).await?;
    sqlx::query(
        "UPDATE devices SET ipn = COALESCE(?, ipn), hw_rev = COALESCE(?, hw_rev), \
         fw_version = COALESCE(?, fw_version), customer = COALESCE(?, customer), \
         notes = COALESCE(?, notes) WHERE serial_number = ?",
    )
    .bind(&body.ipn)
    .bind(&body.hw_rev)
    .bind(&body.fw_version)
    .bind(&body.customer)
    .bind(&body.notes)
    .bind(&serial)
    .execute(&state.db.pool)
    .await?;

    let after = load(&state, &serial).await?;
    state.audit.log_with_snapshots(
        Some(&user),
        None,
        "update",
        "devices",
        &serial,
        "Updated device",
        Some(serde_json::to_value(&before)?),
        Some(serde_json::to_value(&after)?),
    );
    Ok(ok(after))
}

async fn remove(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(serial): Path<String>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let device = load(&state, &serial).await?;
    let snapshot = serde_json::to_value(&device)?;

    let mut tx = state.db.begin().await?;
    sqlx::query("DELETE FROM devices WHERE serial_number = ?")
        .bind(&serial)
        .execute(&mut *tx)
        .await?;
    history::record_change(
        &mut tx,
        &user.username,
        "devices",
        &serial,
        ChangeOp::Delete,
        Some(&snapshot),
        None,
    )
    .await?;
    tx.commit().await?;

    state
        .audit
        .log(Some(&user), Some(&meta), "delete", "devices", &serial, "Deleted device");
    Ok(ok(serde_json::json!({"deleted": true})))
}

#[derive(Debug, Deserialize)]
struct CheckinBody {
    fw_version: Option<String>,
    campaign_id: Option<i64>,
    /// Enrollment outcome reported by the device: `updated` or `failed`.
    campaign_result: Option<String>,
}

/// Device check-in: stamps `last_seen_at`, records the running firmware,
/// and moves the campaign enrollment to its reported terminal state.
async fn checkin(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Path(serial): Path<String>,
    Json(body): Json<CheckinBody>,
) -> AppResult<Json<ApiResponse<Device>>> {
    load(&state, &serial).await?;

    sqlx::query(
        "UPDATE devices SET last_seen_at = ?, fw_version = COALESCE(?, fw_version) \
         WHERE serial_number = ?",
    )
    .bind(now_millis())
    .bind(&body.fw_version)
    .bind(&serial)
    .execute(&state.db.pool)
    .await?;

    if let (Some(campaign_id), Some(result)) = (body.campaign_id, body.campaign_result.as_deref()) {
        if !matches!(result, "updated" | "failed") {
            return Err(AppError::validation("campaign_result must be 'updated' or 'failed'"));
        }
        let changed = sqlx::query(
            "UPDATE campaign_enrollments SET status = ?, updated_at = ? \
             WHERE campaign_id = ? AND serial_number = ? AND status IN ('pending', 'sent')",
        )
        .bind(result)
        .bind(now_millis())
        .bind(campaign_id)
        .bind(&serial)
        .execute(&state.db.pool)
        .await?;
        if changed.rows_affected() > 0 {
            state.bus.emit(AppEvent::CampaignProgress { campaign_id });
        }
    }

    state.audit.log(
        Some(&user),
        None,
        "checkin",
        "devices",
        &serial,
        "Device checked in",
    );
    Ok(ok(load(&state, &serial).await?))
}
