//! RFQ engine.
//!
//! Lifecycle: `draft → sent → awarded → closed`. Vendors are fanned out on
//! send, quotes upsert per `(vendor, line)` while sent, and an award —
//! whole-RFQ or per-line — materializes draft purchase orders from the
//! winning quotes: exactly one PO per distinct awarded vendor, one line
//! per RFQ line, prices from the winning quote.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::collections::BTreeMap;

use crate::db::{Db, ids};
use crate::history::{self, ChangeOp};
use crate::procurement::{self, NewPoLine, NewPurchaseOrder};
use crate::utils::validation::{MAX_NAME_LEN, MAX_NOTE_LEN, MAX_SHORT_TEXT_LEN, Validator};
use crate::utils::{AppError, AppResult, now_millis, time};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Rfq {
    pub id: String,
    pub status: String,
    pub title: Option<String>,
    pub due_date: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub sent_at: Option<i64>,
    pub awarded_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RfqLine {
    pub id: i64,
    pub rfq_id: String,
    pub ipn: String,
    pub qty: i64,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RfqVendor {
    pub id: i64,
    pub rfq_id: String,
    pub vendor_id: String,
    pub vendor_name: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RfqQuote {
    pub id: i64,
    pub rfq_vendor_id: i64,
    pub rfq_line_id: i64,
    pub unit_price: f64,
    pub lead_time_days: i64,
    pub moq: i64,
    pub notes: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Serialize)]
pub struct RfqDetail {
    #[serde(flatten)]
    pub rfq: Rfq,
    pub lines: Vec<RfqLine>,
    pub vendors: Vec<RfqVendor>,
    pub quotes: Vec<RfqQuote>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRfqLine {
    pub ipn: String,
    pub qty: i64,
    #[serde(default = "default_unit")]
    pub unit: String,
}

fn default_unit() -> String {
    "ea".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRfq {
    pub title: Option<String>,
    pub due_date: Option<String>,
    pub notes: Option<String>,
    pub lines: Vec<NewRfqLine>,
    pub vendor_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteRequest {
    pub rfq_vendor_id: i64,
    pub rfq_line_id: i64,
    pub unit_price: f64,
    #[serde(default)]
    pub lead_time_days: i64,
    #[serde(default = "default_moq")]
    pub moq: i64,
    pub notes: Option<String>,
}

fn default_moq() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineAward {
    pub line_id: i64,
    pub vendor_id: String,
}

#[derive(Debug, Serialize)]
pub struct AwardOutcome {
    pub rfq: Rfq,
    /// Draft POs created, one per distinct awarded vendor.
    pub po_ids: Vec<String>,
}

async fn load(conn: &mut SqliteConnection, id: &str) -> AppResult<Rfq> {
    let row: Option<Rfq> = sqlx::query_as(
        "SELECT id, status, title, due_date, notes, created_by, created_at, sent_at, awarded_at \
         FROM rfqs WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    row.ok_or_else(|| AppError::not_found(format!("RFQ {id}")))
}

async fn load_lines(conn: &mut SqliteConnection, rfq_id: &str) -> AppResult<Vec<RfqLine>> {
    let lines = sqlx::query_as::<_, RfqLine>(
        "SELECT id, rfq_id, ipn, qty, unit FROM rfq_lines WHERE rfq_id = ? ORDER BY id",
    )
    .bind(rfq_id)
    .fetch_all(conn)
    .await?;
    Ok(lines)
}

async fn load_vendors(conn: &mut SqliteConnection, rfq_id: &str) -> AppResult<Vec<RfqVendor>> {
    let vendors = sqlx::query_as::<_, RfqVendor>(
        "SELECT rv.id, rv.rfq_id, rv.vendor_id, v.name AS vendor_name, rv.status \
         FROM rfq_vendors rv JOIN vendors v ON v.id = rv.vendor_id \
         WHERE rv.rfq_id = ? ORDER BY rv.id",
    )
    .bind(rfq_id)
    .fetch_all(conn)
    .await?;
    Ok(vendors)
}

async fn load_quotes(conn: &mut SqliteConnection, rfq_id: &str) -> AppResult<Vec<RfqQuote>> {
    let quotes = sqlx::query_as::<_, RfqQuote>(
        "SELECT q.id, q.rfq_vendor_id, q.rfq_line_id, q.unit_price, q.lead_time_days, q.moq, \
         q.notes, q.created_at \
         FROM rfq_quotes q JOIN rfq_vendors rv ON rv.id = q.rfq_vendor_id \
         WHERE rv.rfq_id = ? ORDER BY q.id",
    )
    .bind(rfq_id)
    .fetch_all(conn)
    .await?;
    Ok(quotes)
}

pub async fn create(db: &Db, user: &str, req: &NewRfq) -> AppResult<RfqDetail> {
    let mut v = Validator::new();
    v.optional_text(req.title.as_deref(), "title", MAX_NAME_LEN)
        .optional_text(req.notes.as_deref(), "notes", MAX_NOTE_LEN);
    if req.lines.is_empty() {
        v.push("an RFQ needs at least one line");
    }
    if req.vendor_ids.is_empty() {
        v.push("an RFQ needs at least one vendor");
    }
    for (i, line) in req.lines.iter().enumerate() {
        v.require_text(&line.ipn, &format!("lines[{i}].ipn"), MAX_SHORT_TEXT_LEN)
            .positive(line.qty, &format!("lines[{i}].qty"));
    }
    v.finish()?;

    let mut tx = db.begin().await?;

    for vendor_id in &req.vendor_ids {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vendors WHERE id = ?")
            .bind(vendor_id)
            .fetch_one(&mut *tx)
            .await?;
        if exists == 0 {
            return Err(AppError::not_found(format!("Vendor {vendor_id}")));
        }
    }

    let id = ids::next_id(&mut tx, ids::IdFamily::Rfq).await?;
    sqlx::query(
        "INSERT INTO rfqs (id, status, title, due_date, notes, created_by, created_at) \
         VALUES (?, 'draft', ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&req.title)
    .bind(&req.due_date)
    .bind(&req.notes)
    .bind(user)
    .bind(now_millis())
    .execute(&mut *tx)
    .await?;

    for line in &req.lines {
        sqlx::query("INSERT INTO rfq_lines (rfq_id, ipn, qty, unit) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(&line.ipn)
            .bind(line.qty)
            .bind(&line.unit)
            .execute(&mut *tx)
            .await?;
    }
    for vendor_id in &req.vendor_ids {
        sqlx::query("INSERT INTO rfq_vendors (rfq_id, vendor_id, status) VALUES (?, ?, 'pending')")
            .bind(&id)
            .bind(vendor_id)
            .execute(&mut *tx)
            .await?;
    }

    let rfq = load(&mut tx, &id).await?;
    let lines = load_lines(&mut tx, &id).await?;
    let vendors = load_vendors(&mut tx, &id).await?;
    history::record_change(
        &mut tx,
        user,
        "rfqs",
        &id,
        ChangeOp::Create,
        None,
        Some(&serde_json::to_value(&rfq)?),
    )
    .await?;
    tx.commit().await?;

    Ok(RfqDetail {
        rfq,
        lines,
        vendors,
        quotes: Vec::new(),
    })
}

pub async fn get(db: &Db, id: &str) -> AppResult<RfqDetail> {
    let mut conn = db.pool.acquire().await?;
    let rfq = load(&mut conn, id).await?;
    let lines = load_lines(&mut conn, id).await?;
    let vendors = load_vendors(&mut conn, id).await?;
    let quotes = load_quotes(&mut conn, id).await?;
    Ok(RfqDetail {
        rfq,
        lines,
        vendors,
        quotes,
    })
}

/// List with per-RFQ vendor/line/response counts.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct RfqSummary {
    pub id: String,
    pub status: String,
    pub title: Option<String>,
    pub due_date: Option<String>,
    pub created_at: i64,
    pub line_count: i64,
    pub vendor_count: i64,
    pub quoted_count: i64,
}

pub async fn list(
    db: &Db,
    status: Option<&str>,
    offset: i64,
    limit: i64,
) -> AppResult<(Vec<RfqSummary>, i64)> {
    let filter = if status.is_some() { " WHERE r.status = ?" } else { "" };
    let count_sql = format!("SELECT COUNT(*) FROM rfqs r{filter}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(s) = status {
        count_query = count_query.bind(s);
    }
    let total = count_query.fetch_one(&db.pool).await?;

    let select_sql = format!(
        "SELECT r.id, r.status, r.title, r.due_date, r.created_at, \
         (SELECT COUNT(*) FROM rfq_lines l WHERE l.rfq_id = r.id) AS line_count, \
         (SELECT COUNT(*) FROM rfq_vendors rv WHERE rv.rfq_id = r.id) AS vendor_count, \
         (SELECT COUNT(*) FROM rfq_vendors rv WHERE rv.rfq_id = r.id AND rv.status = 'quoted') AS quoted_count \
         FROM rfqs r{filter} ORDER BY r.id DESC LIMIT ? OFFSET ?"
    );
    let mut select_query = sqlx::query_as::<_, RfqSummary>(&select_sql);
    if let Some(s) = status {
        select_query = select_query.bind(s);
    }
    let rows = select_query.bind(limit).bind(offset).fetch_all(&db.pool).await?;
    Ok((rows, total))
}

/// `draft → sent`; all vendor rows move to `pending`.
pub async fn send(db: &Db, user: &str, id: &str) -> AppResult<Rfq> {
    let mut tx = db.begin().await?;
    let before = load(&mut tx, id).await?;
    if before.status != "draft" {
        return Err(AppError::precondition(format!(
            "RFQ must be draft to send (currently {})",
            before.status
        )));
    }

    sqlx::query("UPDATE rfqs SET status = 'sent', sent_at = ? WHERE id = ?")
        .bind(now_millis())
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE rfq_vendors SET status = 'pending' WHERE rfq_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let updated = load(&mut tx, id).await?;
    history::record_change(
        &mut tx,
        user,
        "rfqs",
        id,
        ChangeOp::Update,
        Some(&serde_json::to_value(&before)?),
        Some(&serde_json::to_value(&updated)?),
    )
    .await?;
    tx.commit().await?;
    Ok(updated)
}

/// Record (or revise) a vendor's quote for one line while the RFQ is
/// sent. Upserts by `(vendor, line)` and marks the vendor `quoted`.
pub async fn quote(db: &Db, user: &str, rfq_id: &str, req: &QuoteRequest) -> AppResult<RfqQuote> {
    let mut v = Validator::new();
    if req.unit_price <= 0.0 || !req.unit_price.is_finite() {
        v.push("unit_price must be positive");
    }
    v.non_negative(req.lead_time_days, "lead_time_days");
    if req.moq < 1 {
        v.push("moq must be at least 1");
    }
    v.finish()?;

    let mut tx = db.begin().await?;
    let rfq = load(&mut tx, rfq_id).await?;
    if rfq.status != "sent" {
        return Err(AppError::precondition(format!(
            "Quotes are only accepted while the RFQ is sent (currently {})",
            rfq.status
        )));
    }

    let vendor_belongs: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM rfq_vendors WHERE id = ? AND rfq_id = ?")
            .bind(req.rfq_vendor_id)
            .bind(rfq_id)
            .fetch_one(&mut *tx)
            .await?;
    let line_belongs: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM rfq_lines WHERE id = ? AND rfq_id = ?")
            .bind(req.rfq_line_id)
            .bind(rfq_id)
            .fetch_one(&mut *tx)
            .await?;
    if vendor_belongs == 0 || line_belongs == 0 {
        return Err(AppError::not_found(format!(
            "Vendor or line on RFQ {rfq_id}"
        )));
    }

    let quote_id: i64 = sqlx::query_scalar(
        "INSERT INTO rfq_quotes (rfq_vendor_id, rfq_line_id, unit_price, lead_time_days, moq, notes, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (rfq_vendor_id, rfq_line_id) DO UPDATE SET \
           unit_price = excluded.unit_price, lead_time_days = excluded.lead_time_days, \
           moq = excluded.moq, notes = excluded.notes \
         RETURNING id",
    )
    .bind(req.rfq_vendor_id)
    .bind(req.rfq_line_id)
    .bind(req.unit_price)
    .bind(req.lead_time_days)
    .bind(req.moq)
    .bind(&req.notes)
    .bind(now_millis())
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE rfq_vendors SET status = 'quoted' WHERE id = ?")
        .bind(req.rfq_vendor_id)
        .execute(&mut *tx)
        .await?;

    let row: RfqQuote = sqlx::query_as(
        "SELECT id, rfq_vendor_id, rfq_line_id, unit_price, lead_time_days, moq, notes, created_at \
         FROM rfq_quotes WHERE id = ?",
    )
    .bind(quote_id)
    .fetch_one(&mut *tx)
    .await?;

    history::record_change(
        &mut tx,
        user,
        "rfqs",
        rfq_id,
        ChangeOp::Update,
        None,
        Some(&serde_json::to_value(&row)?),
    )
    .await?;
    tx.commit().await?;
    Ok(row)
}

/// Mark a vendor as declined.
pub async fn decline(db: &Db, rfq_id: &str, rfq_vendor_id: i64) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE rfq_vendors SET status = 'declined' WHERE id = ? AND rfq_id = ?",
    )
    .bind(rfq_vendor_id)
    .bind(rfq_id)
    .execute(&db.pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("Vendor on RFQ {rfq_id}")));
    }
    Ok(())
}

struct AwardContext {
    lines: Vec<RfqLine>,
    vendors: Vec<RfqVendor>,
    quotes: Vec<RfqQuote>,
}

async fn award_context(conn: &mut SqliteConnection, rfq_id: &str) -> AppResult<AwardContext> {
    Ok(AwardContext {
        lines: load_lines(&mut *conn, rfq_id).await?,
        vendors: load_vendors(&mut *conn, rfq_id).await?,
        quotes: load_quotes(conn, rfq_id).await?,
    })
}

impl AwardContext {
    fn vendor_by_id(&self, vendor_id: &str) -> AppResult<&RfqVendor> {
        self.vendors
            .iter()
            .find(|v| v.vendor_id == vendor_id)
            .ok_or_else(|| AppError::not_found(format!("Vendor {vendor_id} on this RFQ")))
    }

    fn quote_for(&self, rfq_vendor_id: i64, rfq_line_id: i64) -> Option<&RfqQuote> {
        self.quotes
            .iter()
            .find(|q| q.rfq_vendor_id == rfq_vendor_id && q.rfq_line_id == rfq_line_id)
    }
}

async fn materialize_award_po(
    db: &Db,
    user: &str,
    rfq_id: &str,
    vendor_id: &str,
    lines: &[(RfqLine, f64)],
) -> AppResult<String> {
    let po_lines = lines
        .iter()
        .map(|(line, price)| NewPoLine {
            ipn: line.ipn.clone(),
            mpn: None,
            manufacturer: None,
            qty_ordered: line.qty,
            unit_price: *price,
        })
        .collect();

    let po = procurement::create(
        db,
        user,
        &NewPurchaseOrder {
            vendor_id: vendor_id.to_string(),
            lines: po_lines,
            notes: Some(format!("Awarded from {rfq_id}")),
            expected_date: None,
        },
    )
    .await?;
    Ok(po.po.id)
}

async fn mark_awarded(db: &Db, user: &str, id: &str, before: &Rfq) -> AppResult<Rfq> {
    let mut tx = db.begin().await?;
    sqlx::query("UPDATE rfqs SET status = 'awarded', awarded_at = ? WHERE id = ?")
        .bind(now_millis())
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let updated = load(&mut tx, id).await?;
    history::record_change(
        &mut tx,
        user,
        "rfqs",
        id,
        ChangeOp::Update,
        Some(&serde_json::to_value(before)?),
        Some(&serde_json::to_value(&updated)?),
    )
    .await?;
    tx.commit().await?;
    Ok(updated)
}

/// Award the whole RFQ to one vendor. Requires at least one quote from
/// that vendor; lines without a quote land on the PO at price 0.
pub async fn award_whole(db: &Db, user: &str, id: &str, vendor_id: &str) -> AppResult<AwardOutcome> {
    let mut conn = db.pool.acquire().await?;
    let before = load(&mut conn, id).await?;
    if before.status != "sent" {
        return Err(AppError::precondition(format!(
            "RFQ must be sent to award (currently {})",
            before.status
        )));
    }
    let ctx = award_context(&mut conn, id).await?;
    drop(conn);

    let vendor = ctx.vendor_by_id(vendor_id)?;
    let has_quote = ctx.quotes.iter().any(|q| q.rfq_vendor_id == vendor.id);
    if !has_quote {
        return Err(AppError::precondition(format!(
            "{vendor_id} has no quotes on {id}"
        )));
    }

    let lines: Vec<(RfqLine, f64)> = ctx
        .lines
        .iter()
        .map(|line| {
            let price = ctx
                .quote_for(vendor.id, line.id)
                .map(|q| q.unit_price)
                .unwrap_or(0.0);
            (line.clone(), price)
        })
        .collect();

    let po_id = materialize_award_po(db, user, id, vendor_id, &lines).await?;
    let rfq = mark_awarded(db, user, id, &before).await?;
    Ok(AwardOutcome {
        rfq,
        po_ids: vec![po_id],
    })
}

/// Award line-by-line, possibly splitting across vendors: one draft PO
/// per distinct awarded vendor, each line priced from that vendor's
/// quote.
pub async fn award_per_line(
    db: &Db,
    user: &str,
    id: &str,
    awards: &[LineAward],
) -> AppResult<AwardOutcome> {
    if awards.is_empty() {
        return Err(AppError::validation("award needs at least one line"));
    }

    let mut conn = db.pool.acquire().await?;
    let before = load(&mut conn, id).await?;
    if before.status != "sent" {
        return Err(AppError::precondition(format!(
            "RFQ must be sent to award (currently {})",
            before.status
        )));
    }
    let ctx = award_context(&mut conn, id).await?;
    drop(conn);

    // Vendor id -> priced lines, stable order.
    let mut groups: BTreeMap<String, Vec<(RfqLine, f64)>> = BTreeMap::new();
    for award in awards {
        let line = ctx
            .lines
            .iter()
            .find(|l| l.id == award.line_id)
            .ok_or_else(|| AppError::not_found(format!("Line {} on RFQ {id}", award.line_id)))?;
        let vendor = ctx.vendor_by_id(&award.vendor_id)?;
        let quote = ctx.quote_for(vendor.id, line.id).ok_or_else(|| {
            AppError::precondition(format!(
                "{} has not quoted line {} on {id}",
                award.vendor_id, line.id
            ))
        })?;
        groups
            .entry(award.vendor_id.clone())
            .or_default()
            .push((line.clone(), quote.unit_price));
    }

    let mut po_ids = Vec::new();
    for (vendor_id, lines) in &groups {
        po_ids.push(materialize_award_po(db, user, id, vendor_id, lines).await?);
    }

    let rfq = mark_awarded(db, user, id, &before).await?;
    Ok(AwardOutcome { rfq, po_ids })
}

/// `sent | awarded → closed`.
pub async fn close(db: &Db, user: &str, id: &str) -> AppResult<Rfq> {
    let mut tx = db.begin().await?;
    let before = load(&mut tx, id).await?;
    if !matches!(before.status.as_str(), "sent" | "awarded") {
        return Err(AppError::conflict(format!(
            "Cannot close a {} RFQ",
            before.status
        )));
    }
    sqlx::query("UPDATE rfqs SET status = 'closed' WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let updated = load(&mut tx, id).await?;
    history::record_change(
        &mut tx,
        user,
        "rfqs",
        id,
        ChangeOp::Update,
        Some(&serde_json::to_value(&before)?),
        Some(&serde_json::to_value(&updated)?),
    )
    .await?;
    tx.commit().await?;
    Ok(updated)
}

// ── Views ───────────────────────────────────────────────────────────

/// Sparse `line x vendor -> quote` comparison matrix.
#[derive(Debug, Serialize)]
pub struct CompareCell {
    pub unit_price: f64,
    pub lead_time_days: i64,
    pub moq: i64,
}

#[derive(Debug, Serialize)]
pub struct CompareRow {
    pub line: RfqLine,
    /// Vendor id -> quote, absent where the vendor has not quoted.
    pub quotes: BTreeMap<String, CompareCell>,
}

pub async fn compare(db: &Db, id: &str) -> AppResult<Vec<CompareRow>> {
    let detail = get(db, id).await?;
    let vendor_by_row: BTreeMap<i64, String> = detail
        .vendors
        .iter()
        .map(|v| (v.id, v.vendor_id.clone()))
        .collect();

    let mut rows = Vec::with_capacity(detail.lines.len());
    for line in detail.lines {
        let mut quotes = BTreeMap::new();
        for q in detail.quotes.iter().filter(|q| q.rfq_line_id == line.id) {
            if let Some(vendor_id) = vendor_by_row.get(&q.rfq_vendor_id) {
                quotes.insert(
                    vendor_id.clone(),
                    CompareCell {
                        unit_price: q.unit_price,
                        lead_time_days: q.lead_time_days,
                        moq: q.moq,
                    },
                );
            }
        }
        rows.push(CompareRow { line, quotes });
    }
    Ok(rows)
}

/// Deterministic plain-text email body; returned, not sent.
#[derive(Debug, Serialize)]
pub struct EmailBody {
    pub subject: String,
    pub body: String,
}

pub async fn email_body(db: &Db, id: &str, company_name: &str) -> AppResult<EmailBody> {
    let detail = get(db, id).await?;
    let subject = format!(
        "Request for Quote {id}{}",
        detail
            .rfq
            .title
            .as_deref()
            .map(|t| format!(" — {t}"))
            .unwrap_or_default()
    );

    let mut body = String::new();
    body.push_str(&format!("Hello,\n\n{company_name} requests a quote for the following items:\n\n"));
    body.push_str("  IPN                  QTY    UNIT\n");
    body.push_str("  -------------------- ------ ----\n");
    for line in &detail.lines {
        body.push_str(&format!("  {:<20} {:>6} {}\n", line.ipn, line.qty, line.unit));
    }
    body.push('\n');
    if let Some(ref due) = detail.rfq.due_date {
        body.push_str(&format!("Please respond by {due}.\n"));
    }
    body.push_str("Include unit pricing, lead time and minimum order quantity per line.\n\n");
    body.push_str(&format!("Regards,\n{company_name}\n"));

    Ok(EmailBody { subject, body })
}

/// Dashboard aggregations.
#[derive(Debug, Serialize)]
pub struct RfqStats {
    pub open_rfqs: i64,
    pub pending_responses: i64,
    pub awarded_this_month: i64,
}

pub async fn stats(db: &Db) -> AppResult<RfqStats> {
    let open_rfqs: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM rfqs WHERE status IN ('draft', 'sent')")
            .fetch_one(&db.pool)
            .await?;
    let pending_responses: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM rfq_vendors rv JOIN rfqs r ON r.id = rv.rfq_id \
         WHERE r.status = 'sent' AND rv.status = 'pending'",
    )
    .fetch_one(&db.pool)
    .await?;

    let month_start = time::month_start_millis();
    let awarded_this_month: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM rfqs WHERE awarded_at >= ?")
            .bind(month_start)
            .fetch_one(&db.pool)
            .await?;

    Ok(RfqStats {
        open_rfqs,
        pending_responses,
        awarded_this_month,
    })
}
