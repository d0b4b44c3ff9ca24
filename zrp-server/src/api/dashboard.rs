//! Dashboard aggregations.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::core::ServerState;
use crate::rfq;
use crate::utils::{ApiResponse, AppResult, ok};

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/v1/dashboard", get(dashboard))
}

#[derive(Debug, Serialize)]
struct Dashboard {
    open_purchase_orders: i64,
    open_work_orders: i64,
    open_ncrs: i64,
    open_rfqs: i64,
    pending_rfq_responses: i64,
    awarded_rfqs_this_month: i64,
    pending_suggestions: i64,
    pending_inspections: i64,
    low_stock_items: i64,
    unread_notifications: i64,
}

async fn count(state: &ServerState, sql: &str) -> AppResult<i64> {
    Ok(sqlx::query_scalar(sql).fetch_one(&state.db.pool).await?)
}

async fn dashboard(State(state): State<ServerState>) -> AppResult<Json<ApiResponse<Dashboard>>> {
    let rfq_stats = rfq::stats(&state.db).await?;
    let out = Dashboard {
        open_purchase_orders: count(
            &state,
            "SELECT COUNT(*) FROM purchase_orders WHERE status NOT IN ('received', 'cancelled')",
        )
        .await?,
        open_work_orders: count(
            &state,
            "SELECT COUNT(*) FROM work_orders WHERE status NOT IN ('completed', 'cancelled')",
        )
        .await?,
        open_ncrs: count(&state, "SELECT COUNT(*) FROM ncrs WHERE status = 'open'").await?,
        open_rfqs: rfq_stats.open_rfqs,
        pending_rfq_responses: rfq_stats.pending_responses,
        awarded_rfqs_this_month: rfq_stats.awarded_this_month,
        pending_suggestions: count(
            &state,
            "SELECT COUNT(*) FROM po_suggestions WHERE status = 'pending'",
        )
        .await?,
        pending_inspections: count(
            &state,
            "SELECT COUNT(*) FROM receiving_inspections WHERE inspected_at IS NULL",
        )
        .await?,
        low_stock_items: count(
            &state,
            "SELECT COUNT(*) FROM inventory WHERE reorder_point > 0 AND qty_on_hand <= reorder_point",
        )
        .await?,
        unread_notifications: count(
            &state,
            "SELECT COUNT(*) FROM notifications WHERE read_at IS NULL",
        )
        .await?,
    };
    Ok(ok(out))
}
