//! Procurement engine: purchase-order lifecycle.
//!
//! ```text
//! draft ──send──▶ sent ──confirm──▶ confirmed ──receive─▶ partial ─receive─▶ received
//!   │                                           └─────────cancel──────────▶ cancelled
//! ```
//!
//! Receiving and inspection live in [`receiving`], shortage-driven PO
//! suggestions in [`suggestions`], price capture in [`price_history`].
//! PO status is always derivable from the line quantities; the recompute
//! runs inside the same transaction as any line change.

pub mod price_history;
pub mod receiving;
pub mod suggestions;

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::db::{Db, ids};
use crate::history::{self, ChangeOp};
use crate::utils::validation::{MAX_NAME_LEN, MAX_NOTE_LEN, MAX_SHORT_TEXT_LEN, Validator};
use crate::utils::{AppError, AppResult, now_millis};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PurchaseOrder {
    pub id: String,
    pub vendor_id: String,
    pub status: String,
    pub notes: Option<String>,
    pub expected_date: Option<String>,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub received_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PoLine {
    pub id: i64,
    pub po_id: String,
    pub ipn: String,
    pub mpn: Option<String>,
    pub manufacturer: Option<String>,
    pub qty_ordered: i64,
    pub qty_received: i64,
    pub unit_price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoWithLines {
    #[serde(flatten)]
    pub po: PurchaseOrder,
    pub lines: Vec<PoLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPoLine {
    pub ipn: String,
    pub mpn: Option<String>,
    pub manufacturer: Option<String>,
    pub qty_ordered: i64,
    #[serde(default)]
    pub unit_price: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPurchaseOrder {
    pub vendor_id: String,
    pub lines: Vec<NewPoLine>,
    pub notes: Option<String>,
    pub expected_date: Option<String>,
}

/// Derive the status implied by aggregated line quantities. `None` means
/// "leave the current status alone" (nothing received yet).
pub fn recompute_status(total_ordered: i64, total_received: i64) -> Option<&'static str> {
    if total_received <= 0 {
        None
    } else if total_received >= total_ordered {
        Some("received")
    } else {
        Some("partial")
    }
}

pub(crate) async fn load_po(conn: &mut SqliteConnection, po_id: &str) -> AppResult<PurchaseOrder> {
    let po: Option<PurchaseOrder> = sqlx::query_as(
        "SELECT id, vendor_id, status, notes, expected_date, created_by, created_at, received_at \
         FROM purchase_orders WHERE id = ?",
    )
    .bind(po_id)
    .fetch_optional(conn)
    .await?;
    po.ok_or_else(|| AppError::not_found(format!("Purchase order {po_id}")))
}

pub(crate) async fn load_lines(conn: &mut SqliteConnection, po_id: &str) -> AppResult<Vec<PoLine>> {
    let lines = sqlx::query_as::<_, PoLine>(
        "SELECT id, po_id, ipn, mpn, manufacturer, qty_ordered, qty_received, unit_price \
         FROM po_lines WHERE po_id = ? ORDER BY id",
    )
    .bind(po_id)
    .fetch_all(conn)
    .await?;
    Ok(lines)
}

/// Apply the derived status (and `received_at` stamp) inside the caller's
/// transaction.
pub(crate) async fn apply_recompute(conn: &mut SqliteConnection, po_id: &str) -> AppResult<String> {
    let po = load_po(&mut *conn, po_id).await?;
    let lines = load_lines(&mut *conn, po_id).await?;
    let total_ordered: i64 = lines.iter().map(|l| l.qty_ordered).sum();
    let total_received: i64 = lines.iter().map(|l| l.qty_received).sum();

    let Some(new_status) = recompute_status(total_ordered, total_received) else {
        return Ok(po.status);
    };
    if new_status == po.status {
        return Ok(po.status);
    }

    let received_at = if new_status == "received" {
        Some(now_millis())
    } else {
        None
    };
    sqlx::query("UPDATE purchase_orders SET status = ?, received_at = ? WHERE id = ?")
        .bind(new_status)
        .bind(received_at)
        .bind(po_id)
        .execute(conn)
        .await?;
    Ok(new_status.to_string())
}

fn validate_new_po(req: &NewPurchaseOrder) -> AppResult<()> {
    let mut v = Validator::new();
    v.require_text(&req.vendor_id, "vendor_id", MAX_SHORT_TEXT_LEN)
        .optional_text(req.notes.as_deref(), "notes", MAX_NOTE_LEN)
        .optional_text(req.expected_date.as_deref(), "expected_date", MAX_NAME_LEN);
    if req.lines.is_empty() {
        v.push("a purchase order needs at least one line");
    }
    for (i, line) in req.lines.iter().enumerate() {
        v.require_text(&line.ipn, &format!("lines[{i}].ipn"), MAX_SHORT_TEXT_LEN)
            .positive(line.qty_ordered, &format!("lines[{i}].qty_ordered"))
            .non_negative_f64(line.unit_price, &format!("lines[{i}].unit_price"));
    }
    v.finish()
}

/// Create a draft PO with its lines.
pub async fn create(db: &Db, user: &str, req: &NewPurchaseOrder) -> AppResult<PoWithLines> {
    validate_new_po(req)?;

    let mut tx = db.begin().await?;

    let vendor_exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vendors WHERE id = ?")
        .bind(&req.vendor_id)
        .fetch_one(&mut *tx)
        .await?;
    if vendor_exists == 0 {
        return Err(AppError::not_found(format!("Vendor {}", req.vendor_id)));
    }

    let po_id = ids::next_id(&mut tx, ids::IdFamily::PurchaseOrder).await?;
    sqlx::query(
        "INSERT INTO purchase_orders (id, vendor_id, status, notes, expected_date, created_by, created_at) \
         VALUES (?, ?, 'draft', ?, ?, ?, ?)",
    )
    .bind(&po_id)
    .bind(&req.vendor_id)
    .bind(&req.notes)
    .bind(&req.expected_date)
    .bind(user)
    .bind(now_millis())
    .execute(&mut *tx)
    .await?;

    for line in &req.lines {
        sqlx::query(
            "INSERT INTO po_lines (po_id, ipn, mpn, manufacturer, qty_ordered, unit_price) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&po_id)
        .bind(&line.ipn)
        .bind(&line.mpn)
        .bind(&line.manufacturer)
        .bind(line.qty_ordered)
        .bind(line.unit_price)
        .execute(&mut *tx)
        .await?;
    }

    let po = load_po(&mut tx, &po_id).await?;
    let lines = load_lines(&mut tx, &po_id).await?;
    history::record_change(
        &mut tx,
        user,
        "purchase_orders",
        &po_id,
        ChangeOp::Create,
        None,
        Some(&serde_json::to_value(&po)?),
    )
    .await?;
    tx.commit().await?;

    Ok(PoWithLines { po, lines })
}

pub async fn get(db: &Db, po_id: &str) -> AppResult<PoWithLines> {
    let mut conn = db.pool.acquire().await?;
    let po = load_po(&mut conn, po_id).await?;
    let lines = load_lines(&mut conn, po_id).await?;
    Ok(PoWithLines { po, lines })
}

pub async fn list(
    db: &Db,
    status: Option<&str>,
    vendor_id: Option<&str>,
    offset: i64,
    limit: i64,
) -> AppResult<(Vec<PurchaseOrder>, i64)> {
    let mut where_parts = Vec::new();
    if status.is_some() {
        where_parts.push("status = ?");
    }
    if vendor_id.is_some() {
        where_parts.push("vendor_id = ?");
    }
    let where_clause = if where_parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_parts.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM purchase_orders{where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(s) = status {
        count_query = count_query.bind(s);
    }
    if let Some(v) = vendor_id {
        count_query = count_query.bind(v);
    }
    let total = count_query.fetch_one(&db.pool).await?;

    let select_sql = format!(
        "SELECT id, vendor_id, status, notes, expected_date, created_by, created_at, received_at \
         FROM purchase_orders{where_clause} ORDER BY id DESC LIMIT ? OFFSET ?"
    );
    let mut select_query = sqlx::query_as::<_, PurchaseOrder>(&select_sql);
    if let Some(s) = status {
        select_query = select_query.bind(s);
    }
    if let Some(v) = vendor_id {
        select_query = select_query.bind(v);
    }
    let rows = select_query.bind(limit).bind(offset).fetch_all(&db.pool).await?;
    Ok((rows, total))
}

/// Explicit state-machine transitions (`send`, `confirm`, `cancel`).
pub async fn transition(db: &Db, user: &str, po_id: &str, action: &str) -> AppResult<PurchaseOrder> {
    let mut tx = db.begin().await?;
    let po = load_po(&mut tx, po_id).await?;

    let new_status = match (action, po.status.as_str()) {
        ("send", "draft") => "sent",
        ("confirm", "sent") => "confirmed",
        ("cancel", "draft" | "sent" | "confirmed") => "cancelled",
        ("send" | "confirm" | "cancel", other) => {
            return Err(AppError::conflict(format!(
                "Cannot {action} a {other} purchase order"
            )));
        }
        _ => return Err(AppError::validation(format!("Unknown transition {action}"))),
    };

    sqlx::query("UPDATE purchase_orders SET status = ? WHERE id = ?")
        .bind(new_status)
        .bind(po_id)
        .execute(&mut *tx)
        .await?;

    let before = serde_json::to_value(&po)?;
    let updated = load_po(&mut tx, po_id).await?;
    history::record_change(
        &mut tx,
        user,
        "purchase_orders",
        po_id,
        ChangeOp::Update,
        Some(&before),
        Some(&serde_json::to_value(&updated)?),
    )
    .await?;
    tx.commit().await?;
    Ok(updated)
}

/// Update mutable header fields. Lines can only change while draft.
pub async fn update(
    db: &Db,
    user: &str,
    po_id: &str,
    notes: Option<String>,
    expected_date: Option<String>,
    lines: Option<Vec<NewPoLine>>,
) -> AppResult<PoWithLines> {
    let mut v = Validator::new();
    v.optional_text(notes.as_deref(), "notes", MAX_NOTE_LEN);
    v.finish()?;

    let mut tx = db.begin().await?;
    let po = load_po(&mut tx, po_id).await?;
    let before = serde_json::to_value(&po)?;

    if let Some(new_lines) = &lines {
        if po.status != "draft" {
            return Err(AppError::conflict("Lines can only be edited on a draft purchase order"));
        }
        if new_lines.is_empty() {
            return Err(AppError::validation("a purchase order needs at least one line"));
        }
        sqlx::query("DELETE FROM po_lines WHERE po_id = ?")
            .bind(po_id)
            .execute(&mut *tx)
            .await?;
        for line in new_lines {
            if line.qty_ordered <= 0 {
                return Err(AppError::validation("qty_ordered must be positive"));
            }
            sqlx::query(
                "INSERT INTO po_lines (po_id, ipn, mpn, manufacturer, qty_ordered, unit_price) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(po_id)
            .bind(&line.ipn)
            .bind(&line.mpn)
            .bind(&line.manufacturer)
            .bind(line.qty_ordered)
            .bind(line.unit_price)
            .execute(&mut *tx)
            .await?;
        }
    }

    sqlx::query(
        "UPDATE purchase_orders SET notes = COALESCE(?, notes), \
         expected_date = COALESCE(?, expected_date) WHERE id = ?",
    )
    .bind(&notes)
    .bind(&expected_date)
    .bind(po_id)
    .execute(&mut *tx)
    .await?;

    let updated = load_po(&mut tx, po_id).await?;
    let updated_lines = load_lines(&mut tx, po_id).await?;
    history::record_change(
        &mut tx,
        user,
        "purchase_orders",
        po_id,
        ChangeOp::Update,
        Some(&before),
        Some(&serde_json::to_value(&updated)?),
    )
    .await?;
    tx.commit().await?;

    Ok(PoWithLines {
        po: updated,
        lines: updated_lines,
    })
}

/// Delete a draft PO (cascade removes lines).
pub async fn delete(db: &Db, user: &str, po_id: &str) -> AppResult<()> {
    let mut tx = db.begin().await?;
    let po = load_po(&mut tx, po_id).await?;
    if po.status != "draft" {
        return Err(AppError::conflict("Only draft purchase orders can be deleted"));
    }

    let snapshot = serde_json::to_value(&po)?;
    sqlx::query("DELETE FROM purchase_orders WHERE id = ?")
        .bind(po_id)
        .execute(&mut *tx)
        .await?;
    history::record_change(
        &mut tx,
        user,
        "purchase_orders",
        po_id,
        ChangeOp::Delete,
        Some(&snapshot),
        None,
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    /// Vendor + sent PO with one 100 x RES-001 line at 0.10.
    pub async fn seed_sent_po(db: &Db) -> (String, i64) {
        sqlx::query(
            "INSERT INTO vendors (id, name, lead_time_days, status, created_at) \
             VALUES ('V-001', 'Acme', 7, 'active', ?)",
        )
        .bind(now_millis())
        .execute(&db.pool)
        .await
        .unwrap();

        let po = create(
            db,
            "alice",
            &NewPurchaseOrder {
                vendor_id: "V-001".into(),
                notes: None,
                expected_date: None,
                lines: vec![NewPoLine {
                    ipn: "RES-001".into(),
                    mpn: Some("RC0603FR-0710KL".into()),
                    manufacturer: Some("Yageo".into()),
                    qty_ordered: 100,
                    unit_price: 0.10,
                }],
            },
        )
        .await
        .unwrap();
        transition(db, "alice", &po.po.id, "send").await.unwrap();
        (po.po.id, po.lines[0].id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    #[test]
    fn status_recompute_is_pure() {
        assert_eq!(recompute_status(100, 0), None);
        assert_eq!(recompute_status(100, 40), Some("partial"));
        assert_eq!(recompute_status(100, 100), Some("received"));
        assert_eq!(recompute_status(100, 120), Some("received"));
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids() {
        let (db, _dir) = test_db().await;
        let (po_id, _) = test_fixtures::seed_sent_po(&db).await;
        assert_eq!(po_id, "PO-0001");

        let po = get(&db, &po_id).await.unwrap();
        assert_eq!(po.po.status, "sent");
        assert_eq!(po.lines.len(), 1);
        assert_eq!(po.lines[0].qty_ordered, 100);
    }

    #[tokio::test]
    async fn transitions_enforce_state_machine() {
        let (db, _dir) = test_db().await;
        let (po_id, _) = test_fixtures::seed_sent_po(&db).await;

        // sent -> confirm OK; sending again is refused.
        let err = transition(&db, "alice", &po_id, "send").await.unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::Conflict);
        let po = transition(&db, "alice", &po_id, "confirm").await.unwrap();
        assert_eq!(po.status, "confirmed");
        let po = transition(&db, "alice", &po_id, "cancel").await.unwrap();
        assert_eq!(po.status, "cancelled");
        // Terminal.
        assert!(transition(&db, "alice", &po_id, "confirm").await.is_err());
    }

    #[tokio::test]
    async fn missing_vendor_is_404() {
        let (db, _dir) = test_db().await;
        let err = create(
            &db,
            "alice",
            &NewPurchaseOrder {
                vendor_id: "V-999".into(),
                notes: None,
                expected_date: None,
                lines: vec![NewPoLine {
                    ipn: "RES-001".into(),
                    mpn: None,
                    manufacturer: None,
                    qty_ordered: 1,
                    unit_price: 0.0,
                }],
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn delete_only_draft() {
        let (db, _dir) = test_db().await;
        let (po_id, _) = test_fixtures::seed_sent_po(&db).await;
        let err = delete(&db, "alice", &po_id).await.unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::Conflict);
    }
}
