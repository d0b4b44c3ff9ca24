//! Health endpoint (public).

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::core::ServerState;
use crate::utils::{ApiResponse, AppResult, now_millis, ok};

pub fn router() -> Router<ServerState> {
    Router::new().route("/healthz", get(healthz))
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    db: &'static str,
    uptime_seconds: i64,
    version: &'static str,
    dropped_events: u64,
}

async fn healthz(State(state): State<ServerState>) -> AppResult<Json<ApiResponse<Health>>> {
    let db = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db.pool)
        .await
    {
        Ok(_) => "ok",
        Err(_) => "error",
    };
    Ok(ok(Health {
        status: if db == "ok" { "ok" } else { "degraded" },
        db,
        uptime_seconds: (now_millis() - state.started_at) / 1000,
        version: env!("CARGO_PKG_VERSION"),
        dropped_events: state.bus.dropped(),
    }))
}
