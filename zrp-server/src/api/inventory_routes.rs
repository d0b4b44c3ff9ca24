//! Inventory endpoints — thin HTTP shims over the ledger.

use axum::extract::{Extension, Path, Query, State};
use axum::middleware;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::{ClientMeta, CurrentUser, require_admin};
use crate::core::ServerState;
use crate::events::AppEvent;
use crate::inventory::{self, InventoryItem, InventoryTxn};
use crate::utils::envelope::PageQuery;
use crate::utils::{ApiResponse, AppError, AppResult, ok, ok_list};

pub fn router() -> Router<ServerState> {
    let admin_routes = Router::new()
        .route("/api/v1/inventory/{ipn}/adjust", post(adjust))
        .layer(middleware::from_fn(require_admin));

    Router::new()
        .route("/api/v1/inventory", get(list))
        .route("/api/v1/inventory/transactions", get(all_transactions))
        .route("/api/v1/inventory/low-stock", get(low_stock))
        .route("/api/v1/inventory/{ipn}", get(get_one))
        .route("/api/v1/inventory/{ipn}/transactions", get(transactions))
        .route("/api/v1/inventory/{ipn}/receive", post(receive))
        .route("/api/v1/inventory/{ipn}/issue", post(issue))
        .route("/api/v1/inventory/{ipn}/reserve", post(reserve))
        .route("/api/v1/inventory/{ipn}/release", post(release))
        .route("/api/v1/inventory/{ipn}/settings", put(update_settings))
        .merge(admin_routes)
}

async fn list(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<ApiResponse<Vec<InventoryItem>>>> {
    let page = page.clamped();
    let (items, total) = inventory::list(&state.db, page.offset(), page.limit).await?;
    Ok(ok_list(items, total, page.page, page.limit))
}

async fn low_stock(
    State(state): State<ServerState>,
) -> AppResult<Json<ApiResponse<Vec<InventoryItem>>>> {
    Ok(ok(inventory::low_stock(&state.db).await?))
}

async fn get_one(
    State(state): State<ServerState>,
    Path(ipn): Path<String>,
) -> AppResult<Json<ApiResponse<InventoryItem>>> {
    inventory::get(&state.db, &ipn)
        .await?
        .map(ok)
        .ok_or_else(|| AppError::not_found(format!("Inventory for {ipn}")))
}

async fn transactions(
    State(state): State<ServerState>,
    Path(ipn): Path<String>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<ApiResponse<Vec<InventoryTxn>>>> {
    let page = page.clamped();
    let (rows, total) =
        inventory::transactions(&state.db, Some(&ipn), page.offset(), page.limit).await?;
    Ok(ok_list(rows, total, page.page, page.limit))
}

async fn all_transactions(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<ApiResponse<Vec<InventoryTxn>>>> {
    let page = page.clamped();
    let (rows, total) = inventory::transactions(&state.db, None, page.offset(), page.limit).await?;
    Ok(ok_list(rows, total, page.page, page.limit))
}

#[derive(Debug, Deserialize)]
struct QtyBody {
    qty: i64,
    reference: Option<String>,
}

macro_rules! ledger_op {
    ($name:ident, $op:path, $action:literal, $summary:literal) => {
        async fn $name(
            State(state): State<ServerState>,
            Extension(user): Extension<CurrentUser>,
            Extension(meta): Extension<ClientMeta>,
            Path(ipn): Path<String>,
            Json(body): Json<QtyBody>,
        ) -> AppResult<Json<ApiResponse<InventoryItem>>> {
            let mut tx = state.db.begin().await?;
            let item = $op(
                &mut tx,
                &ipn,
                body.qty,
                body.reference.as_deref(),
                Some(&user.username),
            )
            .await?;
            tx.commit().await?;

            state.audit.log(
                Some(&user),
                Some(&meta),
                $action,
                "inventory",
                &ipn,
                format!($summary, body.qty, ipn),
            );
            state.bus.emit(AppEvent::RecordMutated {
                module: "inventory".into(),
                record_id: ipn.clone(),
                action: $action.into(),
            });
            Ok(ok(item))
        }
    };
}

ledger_op!(receive, inventory::receive, "receive", "Received {} of {}");
ledger_op!(issue, inventory::issue, "issue", "Issued {} of {}");
ledger_op!(reserve, inventory::reserve, "reserve", "Reserved {} of {}");
ledger_op!(release, inventory::release, "release", "Released {} of {}");

#[derive(Debug, Deserialize)]
struct AdjustBody {
    delta: i64,
    reason: String,
}

async fn adjust(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(ipn): Path<String>,
    Json(body): Json<AdjustBody>,
) -> AppResult<Json<ApiResponse<InventoryItem>>> {
    if body.reason.trim().is_empty() {
        return Err(AppError::validation("an adjustment needs a reason"));
    }
    let mut tx = state.db.begin().await?;
    let item = inventory::adjust(&mut tx, &ipn, body.delta, &body.reason, Some(&user.username))
        .await?;
    tx.commit().await?;

    state.audit.log(
        Some(&user),
        Some(&meta),
        "adjust",
        "inventory",
        &ipn,
        format!("Adjusted {ipn} by {:+}: {}", body.delta, body.reason),
    );
    Ok(ok(item))
}

#[derive(Debug, Deserialize)]
struct SettingsBody {
    reorder_point: Option<i64>,
    location: Option<String>,
}

async fn update_settings(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Path(ipn): Path<String>,
    Json(body): Json<SettingsBody>,
) -> AppResult<Json<ApiResponse<InventoryItem>>> {
    let mut tx = state.db.begin().await?;
    let item = inventory::update_settings(&mut tx, &ipn, body.reorder_point, body.location.as_deref())
        .await?;
    tx.commit().await?;

    state.audit.log(
        Some(&user),
        None,
        "update",
        "inventory",
        &ipn,
        "Updated inventory settings",
    );
    Ok(ok(item))
}
