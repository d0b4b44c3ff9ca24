//! Notification endpoints.

use axum::extract::{Extension, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::events::notifications::{self, Notification};
use crate::utils::envelope::PageQuery;
use crate::utils::{ApiResponse, AppError, AppResult, ok, ok_list};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/notifications", get(list))
        .route("/api/v1/notifications/{id}/read", post(mark_read))
        .route("/api/v1/notifications/read-all", post(mark_all_read))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    unread: bool,
}

async fn list(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<Notification>>>> {
    let page = page.clamped();
    let (rows, total) =
        notifications::list(&state.db, query.unread, page.offset(), page.limit).await?;
    Ok(ok_list(rows, total, page.page, page.limit))
}

async fn mark_read(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    if !notifications::mark_read(&state.db, id).await? {
        return Err(AppError::not_found(format!("Unread notification {id}")));
    }
    state.audit.log(
        Some(&user),
        None,
        "read",
        "notifications",
        &id.to_string(),
        "Marked notification read",
    );
    Ok(ok(serde_json::json!({"read": true})))
}

async fn mark_all_read(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let count = notifications::mark_all_read(&state.db).await?;
    state.audit.log(
        Some(&user),
        None,
        "read_all",
        "notifications",
        "-",
        format!("Marked {count} notifications read"),
    );
    Ok(ok(serde_json::json!({"read": count})))
}
