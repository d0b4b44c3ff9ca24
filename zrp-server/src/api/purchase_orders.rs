//! Purchase-order and receiving endpoints.

use axum::extract::{Extension, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::{ClientMeta, CurrentUser};
use crate::core::ServerState;
use crate::procurement::{
    self, NewPoLine, NewPurchaseOrder, PoWithLines, PurchaseOrder,
    receiving::{self, InspectOutcome, InspectRequest, ReceiveOutcome, ReceiveRequest, ReceivingInspection},
};
use crate::utils::envelope::PageQuery;
use crate::utils::{ApiResponse, AppResult, created, ok, ok_list};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/purchase-orders", get(list).post(create))
        .route(
            "/api/v1/purchase-orders/{id}",
            get(get_one).put(update).delete(remove),
        )
        .route("/api/v1/purchase-orders/{id}/send", post(send))
        .route("/api/v1/purchase-orders/{id}/confirm", post(confirm))
        .route("/api/v1/purchase-orders/{id}/cancel", post(cancel))
        .route("/api/v1/purchase-orders/{id}/receive", post(receive))
        .route("/api/v1/receiving/inspections", get(list_inspections))
        .route(
            "/api/v1/receiving/inspections/{id}/inspect",
            post(inspect),
        )
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    vendor_id: Option<String>,
}

async fn list(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<PurchaseOrder>>>> {
    let page = page.clamped();
    let (rows, total) = procurement::list(
        &state.db,
        query.status.as_deref(),
        query.vendor_id.as_deref(),
        page.offset(),
        page.limit,
    )
    .await?;
    Ok(ok_list(rows, total, page.page, page.limit))
}

async fn get_one(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<PoWithLines>>> {
    Ok(ok(procurement::get(&state.db, &id).await?))
}

async fn create(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(body): Json<NewPurchaseOrder>,
) -> AppResult<axum::response::Response> {
    let po = procurement::create(&state.db, &user.username, &body).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "create",
        "purchase_orders",
        &po.po.id,
        format!("Created purchase order for {}", po.po.vendor_id),
    );
    Ok(created(po))
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    notes: Option<String>,
    expected_date: Option<String>,
    lines: Option<Vec<NewPoLine>>,
}

async fn update(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
    Json(body): Json<UpdateBody>,
) -> AppResult<Json<ApiResponse<PoWithLines>>> {
    let po = procurement::update(
        &state.db,
        &user.username,
        &id,
        body.notes,
        body.expected_date,
        body.lines,
    )
    .await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "update",
        "purchase_orders",
        &id,
        "Updated purchase order",
    );
    Ok(ok(po))
}

async fn remove(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    procurement::delete(&state.db, &user.username, &id).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "delete",
        "purchase_orders",
        &id,
        "Deleted draft purchase order",
    );
    Ok(ok(serde_json::json!({"deleted": true})))
}

macro_rules! transition_handler {
    ($name:ident, $action:literal, $summary:literal) => {
        async fn $name(
            State(state): State<ServerState>,
            Extension(user): Extension<CurrentUser>,
            Extension(meta): Extension<ClientMeta>,
            Path(id): Path<String>,
        ) -> AppResult<Json<ApiResponse<PurchaseOrder>>> {
            let po = procurement::transition(&state.db, &user.username, &id, $action).await?;
            state
                .audit
                .log(Some(&user), Some(&meta), $action, "purchase_orders", &id, $summary);
            Ok(ok(po))
        }
    };
}

transition_handler!(send, "send", "Sent purchase order to vendor");
transition_handler!(confirm, "confirm", "Vendor confirmed purchase order");
transition_handler!(cancel, "cancel", "Cancelled purchase order");

async fn receive(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
    Json(body): Json<ReceiveRequest>,
) -> AppResult<Json<ApiResponse<ReceiveOutcome>>> {
    let outcome = receiving::receive(&state.db, &state.bus, &user.username, &id, &body).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "receive",
        "purchase_orders",
        &id,
        format!(
            "Received {} line(s); status now {}",
            body.lines.len(),
            outcome.po.status
        ),
    );
    Ok(ok(outcome))
}

#[derive(Debug, Deserialize)]
struct InspectionListQuery {
    #[serde(default)]
    pending: bool,
}

async fn list_inspections(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<InspectionListQuery>,
) -> AppResult<Json<ApiResponse<Vec<ReceivingInspection>>>> {
    let page = page.clamped();
    let (rows, total) =
        receiving::list_inspections(&state.db, query.pending, page.offset(), page.limit).await?;
    Ok(ok_list(rows, total, page.page, page.limit))
}

async fn inspect(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<i64>,
    Json(body): Json<InspectRequest>,
) -> AppResult<Json<ApiResponse<InspectOutcome>>> {
    let outcome = receiving::inspect(&state.db, &state.bus, &user.username, id, &body).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "inspect",
        "receiving_inspections",
        &id.to_string(),
        format!(
            "Inspected {}: {} passed, {} failed, {} on hold",
            outcome.inspection.ipn,
            outcome.inspection.qty_passed,
            outcome.inspection.qty_failed,
            outcome.inspection.qty_on_hold
        ),
    );
    Ok(ok(outcome))
}
