//! RFQ endpoints.

use axum::extract::{Extension, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::{ClientMeta, CurrentUser};
use crate::core::ServerState;
use crate::rfq::{
    self, AwardOutcome, CompareRow, EmailBody, LineAward, NewRfq, QuoteRequest, Rfq, RfqDetail,
    RfqQuote, RfqStats, RfqSummary,
};
use crate::utils::envelope::PageQuery;
use crate::utils::{ApiResponse, AppResult, created, ok, ok_list};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/rfqs", get(list).post(create))
        .route("/api/v1/rfqs/stats", get(stats))
        .route("/api/v1/rfqs/{id}", get(get_one))
        .route("/api/v1/rfqs/{id}/send", post(send))
        .route("/api/v1/rfqs/{id}/quotes", post(quote))
        .route("/api/v1/rfqs/{id}/vendors/{rfq_vendor_id}/decline", post(decline))
        .route("/api/v1/rfqs/{id}/award", post(award_whole))
        .route("/api/v1/rfqs/{id}/award-lines", post(award_per_line))
        .route("/api/v1/rfqs/{id}/close", post(close))
        .route("/api/v1/rfqs/{id}/compare", get(compare))
        .route("/api/v1/rfqs/{id}/email", get(email_body))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn list(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<RfqSummary>>>> {
    let page = page.clamped();
    let (rows, total) =
        rfq::list(&state.db, query.status.as_deref(), page.offset(), page.limit).await?;
    Ok(ok_list(rows, total, page.page, page.limit))
}

async fn stats(State(state): State<ServerState>) -> AppResult<Json<ApiResponse<RfqStats>>> {
    Ok(ok(rfq::stats(&state.db).await?))
}

async fn get_one(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<RfqDetail>>> {
    Ok(ok(rfq::get(&state.db, &id).await?))
}

async fn create(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(body): Json<NewRfq>,
) -> AppResult<axum::response::Response> {
    let detail = rfq::create(&state.db, &user.username, &body).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "create",
        "rfqs",
        &detail.rfq.id,
        format!(
            "Created RFQ with {} line(s) for {} vendor(s)",
            detail.lines.len(),
            detail.vendors.len()
        ),
    );
    Ok(created(detail))
}

async fn send(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Rfq>>> {
    let rfq = rfq::send(&state.db, &user.username, &id).await?;
    state
        .audit
        .log(Some(&user), Some(&meta), "send", "rfqs", &id, "Sent RFQ to vendors");
    Ok(ok(rfq))
}

async fn quote(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
    Json(body): Json<QuoteRequest>,
) -> AppResult<Json<ApiResponse<RfqQuote>>> {
    let row = rfq::quote(&state.db, &user.username, &id, &body).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "quote",
        "rfqs",
        &id,
        format!("Recorded quote at {} per unit", body.unit_price),
    );
    Ok(ok(row))
}

async fn decline(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Path((id, rfq_vendor_id)): Path<(String, i64)>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    rfq::decline(&state.db, &id, rfq_vendor_id).await?;
    state
        .audit
        .log(Some(&user), None, "decline", "rfqs", &id, "Vendor declined to quote");
    Ok(ok(serde_json::json!({"declined": true})))
}

#[derive(Debug, Deserialize)]
struct AwardBody {
    vendor_id: String,
}

async fn award_whole(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
    Json(body): Json<AwardBody>,
) -> AppResult<Json<ApiResponse<AwardOutcome>>> {
    let outcome = rfq::award_whole(&state.db, &user.username, &id, &body.vendor_id).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "award",
        "rfqs",
        &id,
        format!("Awarded to {}; created {}", body.vendor_id, outcome.po_ids.join(", ")),
    );
    Ok(ok(outcome))
}

#[derive(Debug, Deserialize)]
struct AwardLinesBody {
    awards: Vec<LineAward>,
}

async fn award_per_line(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
    Json(body): Json<AwardLinesBody>,
) -> AppResult<Json<ApiResponse<AwardOutcome>>> {
    let outcome = rfq::award_per_line(&state.db, &user.username, &id, &body.awards).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "award",
        "rfqs",
        &id,
        format!("Awarded per line; created {}", outcome.po_ids.join(", ")),
    );
    Ok(ok(outcome))
}

async fn close(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Rfq>>> {
    let rfq = rfq::close(&state.db, &user.username, &id).await?;
    state
        .audit
        .log(Some(&user), Some(&meta), "close", "rfqs", &id, "Closed RFQ");
    Ok(ok(rfq))
}

async fn compare(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<CompareRow>>>> {
    Ok(ok(rfq::compare(&state.db, &id).await?))
}

async fn email_body(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<EmailBody>>> {
    let body = rfq::email_body(&state.db, &id, &state.config.company_name).await?;
    Ok(ok(body))
}
