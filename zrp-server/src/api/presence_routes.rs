//! Presence endpoints: who is viewing or editing a record.

use axum::extract::{Extension, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::events::presence::PresenceUser;
use crate::utils::{ApiResponse, AppResult, ok};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/presence/touch", post(touch))
        .route("/api/v1/presence/leave", post(leave))
        .route("/api/v1/presence/{module}/{record_id}", get(snapshot))
}

#[derive(Debug, Deserialize)]
struct PresenceBody {
    module: String,
    record_id: String,
    #[serde(default)]
    editing: bool,
}

async fn touch(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<PresenceBody>,
) -> AppResult<Json<ApiResponse<Vec<PresenceUser>>>> {
    state
        .presence
        .touch(&body.module, &body.record_id, &user.username, body.editing);
    Ok(ok(state.presence.snapshot(&body.module, &body.record_id)))
}

async fn leave(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<PresenceBody>,
) -> AppResult<Json<ApiResponse<Vec<PresenceUser>>>> {
    state.presence.leave(&body.module, &body.record_id, &user.username);
    Ok(ok(state.presence.snapshot(&body.module, &body.record_id)))
}

async fn snapshot(
    State(state): State<ServerState>,
    Path((module, record_id)): Path<(String, String)>,
) -> AppResult<Json<ApiResponse<Vec<PresenceUser>>>> {
    Ok(ok(state.presence.snapshot(&module, &record_id)))
}
