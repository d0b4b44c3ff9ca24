//! Quality endpoints: NCRs, ECOs, CAPAs.

use axum::extract::{Extension, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::{ClientMeta, CurrentUser};
use crate::core::ServerState;
use crate::quality::{capa, eco, ncr};
use crate::utils::bulk::BulkOutcome;
use crate::utils::envelope::PageQuery;
use crate::utils::{ApiResponse, AppResult, created, ok, ok_list};

pub fn router() -> Router<ServerState> {
    Router::new()
        // NCRs
        .route("/api/v1/ncrs", get(list_ncrs).post(create_ncr))
        .route("/api/v1/ncrs/{id}", get(get_ncr).put(update_ncr).delete(delete_ncr))
        .route("/api/v1/ncrs/{id}/status", post(transition_ncr))
        .route("/api/v1/ncrs/bulk/status", post(bulk_ncr_status))
        // ECOs
        .route("/api/v1/ecos", get(list_ecos).post(create_eco))
        .route("/api/v1/ecos/{id}", get(get_eco).delete(delete_eco))
        .route("/api/v1/ecos/{id}/status", post(transition_eco))
        // CAPAs
        .route("/api/v1/capas", get(list_capas).post(create_capa))
        .route("/api/v1/capas/{id}", get(get_capa).delete(delete_capa))
        .route("/api/v1/capas/{id}/status", post(transition_capa))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

// ── NCRs ────────────────────────────────────────────────────────────

async fn list_ncrs(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<ncr::Ncr>>>> {
    let page = page.clamped();
    let (rows, total) =
        ncr::list(&state.db, query.status.as_deref(), page.offset(), page.limit).await?;
    Ok(ok_list(rows, total, page.page, page.limit))
}

async fn get_ncr(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<ncr::Ncr>>> {
    Ok(ok(ncr::get(&state.db, &id).await?))
}

async fn create_ncr(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(body): Json<ncr::NewNcr>,
) -> AppResult<axum::response::Response> {
    let row = ncr::create(&state.db, &user.username, &body).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "create",
        "ncrs",
        &row.id,
        format!("Opened NCR: {}", row.title),
    );
    state.bus.emit(crate::events::AppEvent::NcrCreated { ncr_id: row.id.clone() });
    Ok(created(row))
}

async fn update_ncr(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
    Json(body): Json<ncr::NcrUpdate>,
) -> AppResult<Json<ApiResponse<ncr::Ncr>>> {
    let row = ncr::update(&state.db, &user.username, &id, &body).await?;
    state
        .audit
        .log(Some(&user), Some(&meta), "update", "ncrs", &id, "Updated NCR");
    Ok(ok(row))
}

async fn transition_ncr(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> AppResult<Json<ApiResponse<ncr::Ncr>>> {
    let row = ncr::transition(&state.db, &user.username, &id, &body.status).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "transition",
        "ncrs",
        &id,
        format!("NCR moved to {}", body.status),
    );
    Ok(ok(row))
}

async fn delete_ncr(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    ncr::delete(&state.db, &user.username, &id).await?;
    state
        .audit
        .log(Some(&user), Some(&meta), "delete", "ncrs", &id, "Deleted NCR");
    Ok(ok(serde_json::json!({"deleted": true})))
}

#[derive(Debug, Deserialize)]
struct BulkStatusBody {
    ids: Vec<String>,
    status: String,
}

async fn bulk_ncr_status(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<BulkStatusBody>,
) -> AppResult<Json<ApiResponse<BulkOutcome>>> {
    let outcome = ncr::bulk_transition(&state.db, &user.username, &body.ids, &body.status).await;
    state.audit.log(
        Some(&user),
        None,
        "bulk_transition",
        "ncrs",
        "-",
        format!("Bulk status -> {}: {} ok, {} failed", body.status, outcome.success, outcome.failed),
    );
    Ok(ok(outcome))
}

// ── ECOs ────────────────────────────────────────────────────────────

async fn list_ecos(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<eco::Eco>>>> {
    let page = page.clamped();
    let (rows, total) =
        eco::list(&state.db, query.status.as_deref(), page.offset(), page.limit).await?;
    Ok(ok_list(rows, total, page.page, page.limit))
}

async fn get_eco(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<eco::Eco>>> {
    Ok(ok(eco::get(&state.db, &id).await?))
}

async fn create_eco(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(body): Json<eco::NewEco>,
) -> AppResult<axum::response::Response> {
    let row = eco::create(&state.db, &user.username, &body).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "create",
        "ecos",
        &row.id,
        format!("Opened ECO: {}", row.title),
    );
    Ok(created(row))
}

async fn transition_eco(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> AppResult<Json<ApiResponse<eco::Eco>>> {
    let row = eco::transition(&state.db, &state.bus, &user.username, &id, &body.status).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "transition",
        "ecos",
        &id,
        format!("ECO moved to {}", body.status),
    );
    Ok(ok(row))
}

async fn delete_eco(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    eco::delete(&state.db, &user.username, &id).await?;
    state
        .audit
        .log(Some(&user), Some(&meta), "delete", "ecos", &id, "Deleted ECO");
    Ok(ok(serde_json::json!({"deleted": true})))
}

// ── CAPAs ───────────────────────────────────────────────────────────

async fn list_capas(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<capa::Capa>>>> {
    let page = page.clamped();
    let (rows, total) =
        capa::list(&state.db, query.status.as_deref(), page.offset(), page.limit).await?;
    Ok(ok_list(rows, total, page.page, page.limit))
}

async fn get_capa(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<capa::Capa>>> {
    Ok(ok(capa::get(&state.db, &id).await?))
}

async fn create_capa(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(body): Json<capa::NewCapa>,
) -> AppResult<axum::response::Response> {
    let row = capa::create(&state.db, &user.username, &body).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "create",
        "capas",
        &row.id,
        format!("Opened CAPA: {}", row.title),
    );
    Ok(created(row))
}

async fn transition_capa(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> AppResult<Json<ApiResponse<capa::Capa>>> {
    let row = capa::transition(&state.db, &user.username, &id, &body.status).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "transition",
        "capas",
        &id,
        format!("CAPA moved to {}", body.status),
    );
    Ok(ok(row))
}

async fn delete_capa(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    capa::delete(&state.db, &user.username, &id).await?;
    state
        .audit
        .log(Some(&user), Some(&meta), "delete", "capas", &id, "Deleted CAPA");
    Ok(ok(serde_json::json!({"deleted": true})))
}
