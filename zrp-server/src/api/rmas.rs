//! RMA endpoints.

use axum::extract::{Extension, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::{ClientMeta, CurrentUser};
use crate::core::ServerState;
use crate::events::AppEvent;
use crate::rma::{self, NewRma, Rma};
use crate::utils::envelope::PageQuery;
use crate::utils::{ApiResponse, AppResult, created, ok, ok_list};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/rmas", get(list).post(create))
        .route("/api/v1/rmas/{id}", get(get_one).delete(remove))
        .route("/api/v1/rmas/{id}/status", post(transition))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn list(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<Rma>>>> {
    let page = page.clamped();
    let (rows, total) =
        rma::list(&state.db, query.status.as_deref(), page.offset(), page.limit).await?;
    Ok(ok_list(rows, total, page.page, page.limit))
}

async fn get_one(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Rma>>> {
    Ok(ok(rma::get(&state.db, &id).await?))
}

async fn create(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(body): Json<NewRma>,
) -> AppResult<axum::response::Response> {
    let row = rma::create(&state.db, &user.username, &body).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "create",
        "rmas",
        &row.id,
        format!("Opened RMA for {}", row.customer),
    );
    state.bus.emit(AppEvent::NewRma { rma_id: row.id.clone() });
    Ok(created(row))
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
    #[serde(default)]
    restock: bool,
}

async fn transition(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> AppResult<Json<ApiResponse<Rma>>> {
    let row = rma::transition(&state.db, &user.username, &id, &body.status, body.restock).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "transition",
        "rmas",
        &id,
        format!("RMA moved to {}", body.status),
    );
    Ok(ok(row))
}

async fn remove(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    rma::delete(&state.db, &user.username, &id).await?;
    state
        .audit
        .log(Some(&user), Some(&meta), "delete", "rmas", &id, "Deleted RMA");
    Ok(ok(serde_json::json!({"deleted": true})))
}
