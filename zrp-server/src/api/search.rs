//! Cross-module search.
//!
//! One query string, one grouped result object. Each module contributes
//! at most ten rows.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::core::ServerState;
use crate::utils::{ApiResponse, AppError, AppResult, ok};

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/v1/search", get(search))
}

const PER_MODULE_CAP: i64 = 10;

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct SearchHit {
    id: String,
    title: String,
    status: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct SearchResults {
    parts: Vec<SearchHit>,
    vendors: Vec<SearchHit>,
    purchase_orders: Vec<SearchHit>,
    work_orders: Vec<SearchHit>,
    rfqs: Vec<SearchHit>,
    ncrs: Vec<SearchHit>,
    ecos: Vec<SearchHit>,
    rmas: Vec<SearchHit>,
    devices: Vec<SearchHit>,
}

async fn hits(state: &ServerState, sql: &str, like: &str) -> AppResult<Vec<SearchHit>> {
    let rows = sqlx::query_as::<_, SearchHit>(sql)
        .bind(like)
        .bind(like)
        .bind(PER_MODULE_CAP)
        .fetch_all(&state.db.pool)
        .await?;
    Ok(rows)
}

async fn search(
    State(state): State<ServerState>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<ApiResponse<SearchResults>>> {
    let q = query.q.trim();
    if q.is_empty() {
        return Err(AppError::validation("q must not be empty"));
    }
    let like = format!("%{q}%");

    let results = SearchResults {
        parts: hits(
            &state,
            "SELECT ipn AS id, COALESCE(description, ipn) AS title, NULL AS status \
             FROM parts WHERE ipn LIKE ? OR description LIKE ? ORDER BY ipn LIMIT ?",
            &like,
        )
        .await?,
        vendors: hits(
            &state,
            "SELECT id, name AS title, status FROM vendors \
             WHERE id LIKE ? OR name LIKE ? ORDER BY id LIMIT ?",
            &like,
        )
        .await?,
        purchase_orders: hits(
            &state,
            "SELECT id, id AS title, status FROM purchase_orders \
             WHERE id LIKE ? OR vendor_id LIKE ? ORDER BY id DESC LIMIT ?",
            &like,
        )
        .await?,
        work_orders: hits(
            &state,
            "SELECT id, assembly_ipn AS title, status FROM work_orders \
             WHERE id LIKE ? OR assembly_ipn LIKE ? ORDER BY id DESC LIMIT ?",
            &like,
        )
        .await?,
        rfqs: hits(
            &state,
            "SELECT id, COALESCE(title, id) AS title, status FROM rfqs \
             WHERE id LIKE ? OR title LIKE ? ORDER BY id DESC LIMIT ?",
            &like,
        )
        .await?,
        ncrs: hits(
            &state,
            "SELECT id, title, status FROM ncrs \
             WHERE id LIKE ? OR title LIKE ? ORDER BY id DESC LIMIT ?",
            &like,
        )
        .await?,
        ecos: hits(
            &state,
            "SELECT id, title, status FROM ecos \
             WHERE id LIKE ? OR title LIKE ? ORDER BY id DESC LIMIT ?",
            &like,
        )
        .await?,
        rmas: hits(
            &state,
            "SELECT id, customer AS title, status FROM rmas \
             WHERE id LIKE ? OR customer LIKE ? ORDER BY id DESC LIMIT ?",
            &like,
        )
        .await?,
        devices: hits(
            &state,
            "SELECT serial_number AS id, serial_number AS title, NULL AS status FROM devices \
             WHERE serial_number LIKE ? OR customer LIKE ? ORDER BY serial_number LIMIT ?",
            &like,
        )
        .await?,
    };
    Ok(ok(results))
}
