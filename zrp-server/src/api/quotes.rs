//! Customer quote endpoints.

use axum::extract::{Extension, Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::{ClientMeta, CurrentUser};
use crate::core::ServerState;
use crate::db::ids;
use crate::history::{self, ChangeOp};
use crate::utils::envelope::PageQuery;
use crate::utils::validation::{MAX_NAME_LEN, MAX_NOTE_LEN, Validator};
use crate::utils::{ApiResponse, AppError, AppResult, created, now_millis, ok, ok_list};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/quotes", get(list).post(create))
        .route("/api/v1/quotes/{id}", get(get_one).put(update).delete(remove))
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Quote {
    pub id: String,
    pub customer: String,
    pub status: String,
    pub notes: Option<String>,
    pub valid_until: Option<String>,
    pub created_by: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QuoteLine {
    pub id: i64,
    pub quote_id: String,
    pub ipn: Option<String>,
    pub description: Option<String>,
    pub qty: i64,
    pub unit_price: f64,
}

#[derive(Debug, Serialize)]
pub struct QuoteDetail {
    #[serde(flatten)]
    pub quote: Quote,
    pub lines: Vec<QuoteLine>,
    pub total: f64,
}

const STATUSES: [&str; 4] = ["draft", "sent", "accepted", "rejected"];

async fn load_detail(state: &ServerState, id: &str) -> AppResult<QuoteDetail> {
    let quote: Option<Quote> = sqlx::query_as(
        "SELECT id, customer, status, notes, valid_until, created_by, created_at \
         FROM quotes WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&state.db.pool)
    .await?;
    let quote = quote.ok_or_else(|| AppError::not_found(format!("Quote {id}")))?;

    let lines = sqlx::query_as::<_, QuoteLine>(
        "SELECT id, quote_id, ipn, description, qty, unit_price \
         FROM quote_lines WHERE quote_id = ? ORDER BY id",
    )
    .bind(id)
    .fetch_all(&state.db.pool)
    .await?;

    let total = lines.iter().map(|l| l.qty as f64 * l.unit_price).sum();
    Ok(QuoteDetail {
        quote,
        lines,
        total,
    })
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

async fn list(
    State(state): State<ServerState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<Quote>>>> {
    let page = page.clamped();
    let filter = if query.status.is_some() { " WHERE status = ?" } else { "" };

    let count_sql = format!("SELECT COUNT(*) FROM quotes{filter}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(ref s) = query.status {
        count_query = count_query.bind(s);
    }
    let total = count_query.fetch_one(&state.db.pool).await?;

    let select_sql = format!(
        "SELECT id, customer, status, notes, valid_until, created_by, created_at \
         FROM quotes{filter} ORDER BY id DESC LIMIT ? OFFSET ?"
    );
    let mut select_query = sqlx::query_as::<_, Quote>(&select_sql);
    if let Some(ref s) = query.status {
        select_query = select_query.bind(s);
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
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<QuoteDetail>>> {
    Ok(ok(load_detail(&state, &id).await?))
}

#[derive(Debug, Deserialize)]
struct LineBody {
    ipn: Option<String>,
    description: Option<String>,
    qty: i64,
    #[serde(default)]
    unit_price: f64,
}

#[derive(Debug, Deserialize)]
struct QuoteBody {
    customer: String,
    status: Option<String>,
    notes: Option<String>,
    valid_until: Option<String>,
    #[serde(default)]
    lines: Vec<LineBody>,
}

fn validate_body(body: &QuoteBody) -> AppResult<()> {
    let mut v = Validator::new();
    v.require_text(&body.customer, "customer", MAX_NAME_LEN)
        .optional_text(body.notes.as_deref(), "notes", MAX_NOTE_LEN);
    if let Some(ref s) = body.status {
        v.one_of(s, &STATUSES, "status");
    }
    for (i, line) in body.lines.iter().enumerate() {
        v.positive(line.qty, &format!("lines[{i}].qty"))
            .non_negative_f64(line.unit_price, &format!("lines[{i}].unit_price"));
    }
    v.finish()
}

async fn create(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(body): Json<QuoteBody>,
) -> AppResult<axum::response::Response> {
    validate_body(&body)?;

    let mut tx = state.db.begin().await?;
    let id = ids::next_id(&mut tx, ids::IdFamily::Quote).await?;
    sqlx::query(
        "INSERT INTO quotes (id, customer, status, notes, valid_until, created_by, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&body.customer)
    .bind(body.status.as_deref().unwrap_or("draft"))
    .bind(&body.notes)
    .bind(&body.valid_until)
    .bind(&user.username)
    .bind(now_millis())
    .execute(&mut *tx)
    .await?;

    for line in &body.lines {
        sqlx::query(
            "INSERT INTO quote_lines (quote_id, ipn, description, qty, unit_price) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&line.ipn)
        .bind(&line.description)
        .bind(line.qty)
        .bind(line.unit_price)
        .execute(&mut *tx)
        .await?;
    }

    history::record_change(
        &mut tx,
        &user.username,
        "quotes",
        &id,
        ChangeOp::Create,
        None,
        Some(&serde_json::json!({"id": id, "customer": body.customer})),
    )
    .await?;
    tx.commit().await?;

    state.audit.log(
        Some(&user),
        Some(&meta),
        "create",
        "quotes",
        &id,
        format!("Created quote for {}", body.customer),
    );
    Ok(created(load_detail(&state, &id).await?))
}

async fn update(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
    Json(body): Json<QuoteBody>,
) -> AppResult<Json<ApiResponse<QuoteDetail>>> {
    validate_body(&body)?;
    let before = load_detail(&state, &id).await?;

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "UPDATE quotes SET customer = ?, status = COALESCE(?, status), notes = ?, valid_until = ? \
         WHERE id = ?",
    )
    .bind(&body.customer)
    .bind(&body.status)
    .bind(&body.notes)
    .bind(&body.valid_until)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    if !body.lines.is_empty() {
        sqlx::query("DELETE FROM quote_lines WHERE quote_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        for line in &body.lines {
            sqlx::query(
                "INSERT INTO quote_lines (quote_id, ipn, description, qty, unit_price) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&line.ipn)
            .bind(&line.description)
            .bind(line.qty)
            .bind(line.unit_price)
            .execute(&mut *tx)
            .await?;
        }
    }

    history::record_change(
        &mut tx,
        &user.username,
        "quotes",
        &id,
        ChangeOp::Update,
        Some(&serde_json::to_value(&before.quote)?),
        None,
    )
    .await?;
    tx.commit().await?;

    state
        .audit
        .log(Some(&user), Some(&meta), "update", "quotes", &id, "Updated quote");
    Ok(ok(load_detail(&state, &id).await?))
}

async fn remove(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let detail = load_detail(&state, &id).await?;
    let snapshot = serde_json::to_value(&detail.quote)?;

    let mut tx = state.db.begin().await?;
    sqlx::query("DELETE FROM quotes WHERE id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    history::record_change(
        &mut tx,
        &user.username,
        "quotes",
        &id,
        ChangeOp::Delete,
        Some(&snapshot),
        None,
    )
    .await?;
    tx.commit().await?;

    state
        .audit
        .log(Some(&user), Some(&meta), "delete", "quotes", &id, "Deleted quote");
    Ok(ok(serde_json::json!({"deleted": true})))
}
