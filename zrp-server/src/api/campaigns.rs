//! Firmware campaign endpoints, including the SSE progress stream.

use axum::extract::{Extension, Path, State};
use axum::response::sse::{KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::{ClientMeta, CurrentUser};
use crate::core::ServerState;
use crate::events::sse::{self, CampaignProgress};
use crate::utils::{ApiResponse, AppError, AppResult, created, now_millis, ok};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/campaigns", get(list).post(create))
        .route("/api/v1/campaigns/{id}", get(get_one).delete(remove))
        .route("/api/v1/campaigns/{id}/enroll", post(enroll))
        .route("/api/v1/campaigns/{id}/start", post(start))
        .route("/api/v1/campaigns/{id}/progress", get(progress))
        .route("/api/v1/campaigns/{id}/stream", get(stream))
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub target_version: String,
    pub status: String,
    pub created_at: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Enrollment {
    pub id: i64,
    pub campaign_id: i64,
    pub serial_number: String,
    pub status: String,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CampaignDetail {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub enrollments: Vec<Enrollment>,
}

async fn load(state: &ServerState, id: i64) -> AppResult<Campaign> {
    let row: Option<Campaign> = sqlx::query_as(
        "SELECT id, name, target_version, status, created_at FROM firmware_campaigns WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await?;
    row.ok_or_else(|| AppError::not_found(format!("Campaign {id}")))
}

async fn list(State(state): State<ServerState>) -> AppResult<Json<ApiResponse<Vec<Campaign>>>> {
    let rows = sqlx::query_as::<_, Campaign>(
        "SELECT id, name, target_version, status, created_at \
         FROM firmware_campaigns ORDER BY id DESC",
    )
    .fetch_all(&state.db.pool)
    .await?;
    Ok(ok(rows))
}

async fn get_one(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<CampaignDetail>>> {
    let campaign = load(&state, id).await?;
    let enrollments = sqlx::query_as::<_, Enrollment>(
        "SELECT id, campaign_id, serial_number, status, updated_at \
         FROM campaign_enrollments WHERE campaign_id = ? ORDER BY serial_number",
    )
    .bind(id)
    .fetch_all(&state.db.pool)
    .await?;
    Ok(ok(CampaignDetail {
        campaign,
        enrollments,
    }))
}

#[derive(Debug, Deserialize)]
struct CreateBody {
    name: String,
    target_version: String,
}

async fn create(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(body): Json<CreateBody>,
) -> AppResult<axum::response::Response> {
    if body.name.trim().is_empty() || body.target_version.trim().is_empty() {
        return Err(AppError::validation("name and target_version are required"));
    }
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO firmware_campaigns (name, target_version, status, created_at) \
         VALUES (?, ?, 'draft', ?) RETURNING id",
    )
    .bind(&body.name)
    .bind(&body.target_version)
    .bind(now_millis())
    .fetch_one(&state.db.pool)
    .await?;

    state.audit.log(
        Some(&user),
        Some(&meta),
        "create",
        "campaigns",
        &id.to_string(),
        format!("Created campaign '{}' targeting {}", body.name, body.target_version),
    );
    Ok(created(load(&state, id).await?))
}

#[derive(Debug, Deserialize)]
struct EnrollBody {
    serial_numbers: Vec<String>,
}

async fn enroll(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(body): Json<EnrollBody>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let campaign = load(&state, id).await?;
    if campaign.status == "completed" {
        return Err(AppError::conflict("Campaign is already completed"));
    }

    let mut enrolled = 0;
    for serial in &body.serial_numbers {
        let exists: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM devices WHERE serial_number = ?")
                .bind(serial)
                .fetch_one(&state.db.pool)
                .await?;
        if exists == 0 {
            return Err(AppError::not_found(format!("Device {serial}")));
        }
        let result = sqlx::query(
            "INSERT OR IGNORE INTO campaign_enrollments (campaign_id, serial_number, status) \
             VALUES (?, ?, 'pending')",
        )
        .bind(id)
        .bind(serial)
        .execute(&state.db.pool)
        .await?;
        enrolled += result.rows_affected() as i64;
    }

    state.audit.log(
        Some(&user),
        None,
        "enroll",
        "campaigns",
        &id.to_string(),
        format!("Enrolled {enrolled} device(s)"),
    );
    Ok(ok(serde_json::json!({"enrolled": enrolled})))
}

/// `draft → active`; pending enrollments are marked `sent` (the fleet
/// delivery itself is the external updater's job).
async fn start(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<Campaign>>> {
    let campaign = load(&state, id).await?;
    if campaign.status != "draft" {
        return Err(AppError::conflict(format!(
            "Cannot start a {} campaign",
            campaign.status
        )));
    }

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE firmware_campaigns SET status = 'active' WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "UPDATE campaign_enrollments SET status = 'sent', updated_at = ? \
         WHERE campaign_id = ? AND status = 'pending'",
    )
    .bind(now_millis())
    .bind(id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    state.audit.log(
        Some(&user),
        Some(&meta),
        "start",
        "campaigns",
        &id.to_string(),
        "Started campaign",
    );
    state
        .bus
        .emit(crate::events::AppEvent::CampaignProgress { campaign_id: id });
    Ok(ok(load(&state, id).await?))
}

async fn progress(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<CampaignProgress>>> {
    load(&state, id).await?;
    Ok(ok(sse::progress(&state.db, id).await?))
}

/// SSE progress stream: one frame immediately, then every two seconds
/// until all enrollments are terminal.
async fn stream(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> AppResult<Sse<impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>>>
{
    load(&state, id).await?;
    let stream = sse::campaign_stream(state.db.clone(), id);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn remove(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let result = sqlx::query("DELETE FROM firmware_campaigns WHERE id = ?")
        .bind(id)
        .execute(&state.db.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("Campaign {id}")));
    }
    state.audit.log(
        Some(&user),
        Some(&meta),
        "delete",
        "campaigns",
        &id.to_string(),
        "Deleted campaign",
    );
    Ok(ok(serde_json::json!({"deleted": true})))
}
