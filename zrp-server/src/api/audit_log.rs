//! Audit log endpoints: filtered reads, CSV export, retention policy.

use axum::extract::{Extension, Query, State};
use axum::http::header;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::audit::{self, AuditEntry, AuditQuery};
use crate::auth::{ClientMeta, CurrentUser, require_admin};
use crate::core::ServerState;
use crate::utils::{ApiResponse, AppError, AppResult, ok, ok_list};

pub fn router() -> Router<ServerState> {
    let admin_routes = Router::new()
        .route("/api/v1/audit/retention", get(get_retention).put(set_retention))
        .route("/api/v1/audit/cleanup", post(run_cleanup))
        .layer(middleware::from_fn(require_admin));

    Router::new()
        .route("/api/v1/audit", get(list))
        .route("/api/v1/audit/export", get(export_csv))
        .merge(admin_routes)
}

async fn list(
    State(state): State<ServerState>,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<ApiResponse<Vec<AuditEntry>>>> {
    let (rows, total) = state.audit.storage().query(&query).await?;
    let limit = query.limit;
    let page = if limit > 0 { query.offset / limit + 1 } else { 1 };
    Ok(ok_list(rows, total, page, limit))
}

async fn export_csv(
    State(state): State<ServerState>,
    Query(query): Query<AuditQuery>,
) -> AppResult<Response> {
    let csv = state.audit.storage().export_csv(&query).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"audit_log.csv\"".to_string(),
            ),
        ],
        csv,
    )
        .into_response())
}

async fn get_retention(
    State(state): State<ServerState>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let days: i64 = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(audit::RETENTION_SETTING)
        .fetch_optional(&state.db.pool)
        .await?
        .and_then(|v: String| v.parse().ok())
        .unwrap_or(audit::DEFAULT_RETENTION_DAYS);
    Ok(ok(serde_json::json!({"retention_days": days})))
}

#[derive(Debug, Deserialize)]
struct RetentionBody {
    retention_days: i64,
}

async fn set_retention(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(body): Json<RetentionBody>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    if body.retention_days < 1 {
        return Err(AppError::validation("retention_days must be at least 1"));
    }
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?) \
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
    )
    .bind(audit::RETENTION_SETTING)
    .bind(body.retention_days.to_string())
    .execute(&state.db.pool)
    .await?;

    state.audit.log(
        Some(&user),
        Some(&meta),
        "update",
        "settings",
        audit::RETENTION_SETTING,
        format!("Audit retention set to {} days", body.retention_days),
    );
    Ok(ok(serde_json::json!({"retention_days": body.retention_days})))
}

async fn run_cleanup(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let days: i64 = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(audit::RETENTION_SETTING)
        .fetch_optional(&state.db.pool)
        .await?
        .and_then(|v: String| v.parse().ok())
        .unwrap_or(audit::DEFAULT_RETENTION_DAYS);

    let removed = state.audit.storage().cleanup(days).await?;
    state.audit.log(
        Some(&user),
        None,
        "cleanup",
        "audit_log",
        "-",
        format!("Removed {removed} audit rows older than {days} days"),
    );
    Ok(ok(serde_json::json!({"removed": removed})))
}
