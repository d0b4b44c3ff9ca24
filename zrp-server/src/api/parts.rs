//! Parts read-model endpoints.
//!
//! The parts table is populated by the external library sync; mutating it
//! through this API is deliberately unimplemented (501). Vendor sourcing
//! rows (`part_vendors`) and price history hang off the part views.

use axum::extract::{Extension, Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::procurement::price_history;
use crate::utils::envelope::PageQuery;
use crate::utils::{ApiResponse, AppError, AppResult, ok, ok_list};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/parts", get(list).post(not_implemented))
        .route(
            "/api/v1/parts/{ipn}",
            get(get_one).put(not_implemented).delete(not_implemented),
        )
        .route(
            "/api/v1/parts/{ipn}/vendors",
            get(list_sources).post(add_source),
        )
        .route(
            "/api/v1/parts/{ipn}/vendors/{source_id}",
            put(update_source).delete(remove_source),
        )
        .route("/api/v1/parts/{ipn}/prices", get(prices))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct Part {
    ipn: String,
    manufacturer: Option<String>,
    mpn: Option<String>,
    description: Option<String>,
    category: Option<String>,
    value: Option<String>,
    footprint: Option<String>,
    datasheet: Option<String>,
}

async fn not_implemented() -> AppError {
    AppError::not_implemented("Parts are managed in the external parts library")
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    q: Option<String>,
    category: Option<String>,
}

async fn list(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<Part>>>> {
    let page = page.clamped();
    let mut conditions = Vec::new();
    if query.q.is_some() {
        conditions.push("(ipn LIKE ? OR mpn LIKE ? OR description LIKE ?)");
    }
    if query.category.is_some() {
        conditions.push("category = ?");
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    let like = query.q.as_ref().map(|q| format!("%{q}%"));

    let count_sql = format!("SELECT COUNT(*) FROM parts{where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(ref l) = like {
        count_query = count_query.bind(l).bind(l).bind(l);
    }
    if let Some(ref c) = query.category {
        count_query = count_query.bind(c);
    }
    let total = count_query.fetch_one(&state.db.pool).await?;

    let select_sql = format!(
        "SELECT ipn, manufacturer, mpn, description, category, value, footprint, datasheet \
         FROM parts{where_clause} ORDER BY ipn LIMIT ? OFFSET ?"
    );
    let mut select_query = sqlx::query_as::<_, Part>(&select_sql);
    if let Some(ref l) = like {
        select_query = select_query.bind(l).bind(l).bind(l);
    }
    if let Some(ref c) = query.category {
        select_query = select_query.bind(c);
    }
    let rows = select_query
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&state.db.pool)
        .await?;
    Ok(ok_list(rows, total, page.page, page.limit))
}

async fn get_one(
    State(state): State<ServerState>,
    Path(ipn): Path<String>,
) -> AppResult<Json<ApiResponse<Part>>> {
    let part: Option<Part> = sqlx::query_as(
        "SELECT ipn, manufacturer, mpn, description, category, value, footprint, datasheet \
         FROM parts WHERE ipn = ?",
    )
    .bind(&ipn)
    .fetch_optional(&state.db.pool)
    .await?;
    part.map(ok).ok_or_else(|| AppError::not_found(format!("Part {ipn}")))
}

// ── Vendor sourcing ─────────────────────────────────────────────────

#[derive(Debug, Serialize, sqlx::FromRow)]
struct PartVendor {
    id: i64,
    ipn: String,
    vendor_id: String,
    vendor_name: String,
    vendor_pn: Option<String>,
    unit_price: f64,
    moq: i64,
    is_preferred: bool,
}

async fn list_sources(
    State(state): State<ServerState>,
    Path(ipn): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<PartVendor>>>> {
    let rows = sqlx::query_as::<_, PartVendor>(
        "SELECT pv.id, pv.ipn, pv.vendor_id, v.name AS vendor_name, pv.vendor_pn, \
         pv.unit_price, pv.moq, pv.is_preferred \
         FROM part_vendors pv JOIN vendors v ON v.id = pv.vendor_id \
         WHERE pv.ipn = ? ORDER BY pv.is_preferred DESC, pv.unit_price",
    )
    .bind(&ipn)
    .fetch_all(&state.db.pool)
    .await?;
    Ok(ok(rows))
}

#[derive(Debug, Deserialize)]
struct SourceBody {
    vendor_id: String,
    vendor_pn: Option<String>,
    #[serde(default)]
    unit_price: f64,
    #[serde(default = "default_moq")]
    moq: i64,
    #[serde(default)]
    is_preferred: bool,
}

fn default_moq() -> i64 {
    1
}

async fn add_source(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Path(ipn): Path<String>,
    Json(body): Json<SourceBody>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    if body.unit_price < 0.0 || !body.unit_price.is_finite() {
        return Err(AppError::validation("unit_price must be a non-negative number"));
    }
    if body.moq < 1 {
        return Err(AppError::validation("moq must be at least 1"));
    }

    let mut tx = state.db.begin().await?;
    if body.is_preferred {
        // A part has at most one preferred vendor.
        sqlx::query("UPDATE part_vendors SET is_preferred = 0 WHERE ipn = ?")
            .bind(&ipn)
            .execute(&mut *tx)
            .await?;
    }
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO part_vendors (ipn, vendor_id, vendor_pn, unit_price, moq, is_preferred) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&ipn)
    .bind(&body.vendor_id)
    .bind(&body.vendor_pn)
    .bind(body.unit_price)
    .bind(body.moq)
    .bind(body.is_preferred)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    state.audit.log(
        Some(&user),
        None,
        "create",
        "part_vendors",
        &ipn,
        format!("Added vendor source {} for {ipn}", body.vendor_id),
    );
    Ok(ok(serde_json::json!({"id": id})))
}

async fn update_source(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Path((ipn, source_id)): Path<(String, i64)>,
    Json(body): Json<SourceBody>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let mut tx = state.db.begin().await?;
    if body.is_preferred {
        sqlx::query("UPDATE part_vendors SET is_preferred = 0 WHERE ipn = ?")
            .bind(&ipn)
            .execute(&mut *tx)
            .await?;
    }
    let result = sqlx::query(
        "UPDATE part_vendors SET vendor_pn = ?, unit_price = ?, moq = ?, is_preferred = ? \
         WHERE id = ? AND ipn = ?",
    )
    .bind(&body.vendor_pn)
    .bind(body.unit_price)
    .bind(body.moq)
    .bind(body.is_preferred)
    .bind(source_id)
    .bind(&ipn)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("Vendor source {source_id} for {ipn}")));
    }
    tx.commit().await?;

    state.audit.log(
        Some(&user),
        None,
        "update",
        "part_vendors",
        &ipn,
        "Updated vendor source",
    );
    Ok(ok(serde_json::json!({"updated": true})))
}

async fn remove_source(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Path((ipn, source_id)): Path<(String, i64)>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let result = sqlx::query("DELETE FROM part_vendors WHERE id = ? AND ipn = ?")
        .bind(source_id)
        .bind(&ipn)
        .execute(&state.db.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("Vendor source {source_id} for {ipn}")));
    }
    state.audit.log(
        Some(&user),
        None,
        "delete",
        "part_vendors",
        &ipn,
        "Removed vendor source",
    );
    Ok(ok(serde_json::json!({"deleted": true})))
}

async fn prices(
    State(state): State<ServerState>,
    Path(ipn): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<price_history::PriceEntry>>>> {
    Ok(ok(price_history::for_ipn(&state.db, &ipn, 100).await?))
}
