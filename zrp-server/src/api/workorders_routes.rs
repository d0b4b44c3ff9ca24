//! Work-order endpoints.

use axum::extract::{Extension, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::{ClientMeta, CurrentUser};
use crate::bom::ShortageLine;
use crate::core::ServerState;
use crate::utils::bulk::BulkOutcome;
use crate::utils::envelope::PageQuery;
use crate::utils::{ApiResponse, AppResult, created, ok, ok_list};
use crate::workorders::{self, CompleteRequest, NewWorkOrder, WorkOrder};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/workorders", get(list).post(create))
        .route("/api/v1/workorders/{id}", get(get_one).delete(remove))
        .route("/api/v1/workorders/{id}/start", post(start))
        .route("/api/v1/workorders/{id}/kit", post(kit))
        .route("/api/v1/workorders/{id}/complete", post(complete))
        .route("/api/v1/workorders/{id}/cancel", post(cancel))
        .route("/api/v1/workorders/{id}/shortages", get(shortages))
        .route("/api/v1/workorders/bulk/complete", post(bulk_complete))
        .route("/api/v1/workorders/bulk/cancel", post(bulk_cancel))
        .route("/api/v1/workorders/bulk/delete", post(bulk_delete))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn list(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<WorkOrder>>>> {
    let page = page.clamped();
    let (rows, total) =
        workorders::list(&state.db, query.status.as_deref(), page.offset(), page.limit).await?;
    Ok(ok_list(rows, total, page.page, page.limit))
}

async fn get_one(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<WorkOrder>>> {
    Ok(ok(workorders::get(&state.db, &id).await?))
}

async fn create(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(body): Json<NewWorkOrder>,
) -> AppResult<axum::response::Response> {
    let wo = workorders::create(&state.db, &user.username, &body).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "create",
        "work_orders",
        &wo.id,
        format!("Created work order for {} x {}", wo.qty, wo.assembly_ipn),
    );
    Ok(created(wo))
}

macro_rules! wo_action {
    ($name:ident, $op:path, $action:literal, $summary:literal) => {
        async fn $name(
            State(state): State<ServerState>,
            Extension(user): Extension<CurrentUser>,
            Extension(meta): Extension<ClientMeta>,
            Path(id): Path<String>,
        ) -> AppResult<Json<ApiResponse<WorkOrder>>> {
            let wo = $op(&state.db, &user.username, &id).await?;
            state
                .audit
                .log(Some(&user), Some(&meta), $action, "work_orders", &id, $summary);
            Ok(ok(wo))
        }
    };
}

wo_action!(start, workorders::start, "start", "Started work order");
wo_action!(kit, workorders::kit, "kit", "Kitted work order (components reserved)");
wo_action!(cancel, workorders::cancel, "cancel", "Cancelled work order");

async fn complete(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
    Json(body): Json<CompleteRequest>,
) -> AppResult<Json<ApiResponse<WorkOrder>>> {
    let wo = workorders::complete(&state.db, &state.bus, &user.username, &id, &body).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "complete",
        "work_orders",
        &id,
        format!("Completed: {} good, {} scrap", wo.qty_good, wo.qty_scrap),
    );
    Ok(ok(wo))
}

async fn shortages(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<ShortageLine>>>> {
    Ok(ok(workorders::shortages(&state.db, &id).await?))
}

async fn remove(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    workorders::delete(&state.db, &user.username, &id).await?;
    state
        .audit
        .log(Some(&user), Some(&meta), "delete", "work_orders", &id, "Deleted work order");
    Ok(ok(serde_json::json!({"deleted": true})))
}

#[derive(Debug, Deserialize)]
struct BulkBody {
    ids: Vec<String>,
}

async fn bulk_complete(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<BulkBody>,
) -> AppResult<Json<ApiResponse<BulkOutcome>>> {
    let outcome = workorders::bulk_complete(&state.db, &state.bus, &user.username, &body.ids).await;
    state.audit.log(
        Some(&user),
        None,
        "bulk_complete",
        "work_orders",
        "-",
        format!("Bulk complete: {} ok, {} failed", outcome.success, outcome.failed),
    );
    Ok(ok(outcome))
}

async fn bulk_cancel(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<BulkBody>,
) -> AppResult<Json<ApiResponse<BulkOutcome>>> {
    let outcome = workorders::bulk_cancel(&state.db, &user.username, &body.ids).await;
    state.audit.log(
        Some(&user),
        None,
        "bulk_cancel",
        "work_orders",
        "-",
        format!("Bulk cancel: {} ok, {} failed", outcome.success, outcome.failed),
    );
    Ok(ok(outcome))
}

async fn bulk_delete(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<BulkBody>,
) -> AppResult<Json<ApiResponse<BulkOutcome>>> {
    let outcome = workorders::bulk_delete(&state.db, &user.username, &body.ids).await;
    state.audit.log(
        Some(&user),
        None,
        "bulk_delete",
        "work_orders",
        "-",
        format!("Bulk delete: {} ok, {} failed", outcome.success, outcome.failed),
    );
    Ok(ok(outcome))
}
