//! PO suggestion endpoints.

use axum::extract::{Extension, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::{ClientMeta, CurrentUser};
use crate::core::ServerState;
use crate::procurement::suggestions::{self, GenerateOutcome, ReviewOutcome, SuggestionWithLines};
use crate::utils::envelope::PageQuery;
use crate::utils::{ApiResponse, AppResult, ok, ok_list};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/workorders/{id}/po-suggestions", post(generate))
        .route("/api/v1/po-suggestions", get(list))
        .route("/api/v1/po-suggestions/{id}/review", post(review))
}

#[derive(Debug, Deserialize)]
struct GenerateQuery {
    #[serde(default = "default_suggest_only")]
    suggest_only: bool,
}

fn default_suggest_only() -> bool {
    true
}

async fn generate(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(wo_id): Path<String>,
    Query(query): Query<GenerateQuery>,
) -> AppResult<Json<ApiResponse<GenerateOutcome>>> {
    let outcome =
        suggestions::generate(&state.db, &user.username, &wo_id, query.suggest_only).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "generate",
        "po_suggestions",
        &wo_id,
        format!(
            "Generated {} suggestion(s), {} unsourced part(s)",
            outcome.suggestions.len(),
            outcome.unsourced.len()
        ),
    );
    Ok(ok(outcome))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn list(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<SuggestionWithLines>>>> {
    let page = page.clamped();
    let (rows, total) =
        suggestions::list(&state.db, query.status.as_deref(), page.offset(), page.limit).await?;
    Ok(ok_list(rows, total, page.page, page.limit))
}

#[derive(Debug, Deserialize)]
struct ReviewBody {
    approved: bool,
    #[serde(default)]
    create_po: bool,
}

async fn review(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<i64>,
    Json(body): Json<ReviewBody>,
) -> AppResult<Json<ApiResponse<ReviewOutcome>>> {
    let outcome =
        suggestions::review(&state.db, &user.username, id, body.approved, body.create_po).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        if body.approved { "approve" } else { "reject" },
        "po_suggestions",
        &id.to_string(),
        match &outcome.po_id {
            Some(po_id) => format!("Approved suggestion; created {po_id}"),
            None if body.approved => "Approved suggestion".to_string(),
            None => "Rejected suggestion".to_string(),
        },
    );
    Ok(ok(outcome))
}
