//! Price history capture.
//!
//! Append-only. Rows are written automatically from PO receiving for
//! every line with a positive unit price, keyed by
//! `(ipn, vendor, recorded_at)` — a duplicate key within the same
//! millisecond is silently skipped.

use serde::Serialize;
use sqlx::SqliteConnection;

use crate::db::Db;
use crate::utils::{AppResult, now_millis};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PriceEntry {
    pub id: i64,
    pub ipn: String,
    pub vendor_id: Option<String>,
    pub vendor_name: String,
    pub unit_price: f64,
    pub currency: String,
    pub min_qty: i64,
    pub lead_time_days: Option<i64>,
    pub po_id: Option<String>,
    pub recorded_at: i64,
}

#[allow(clippy::too_many_arguments)]
pub async fn capture(
    conn: &mut SqliteConnection,
    ipn: &str,
    vendor_id: Option<&str>,
    vendor_name: &str,
    unit_price: f64,
    min_qty: i64,
    lead_time_days: Option<i64>,
    po_id: Option<&str>,
) -> AppResult<()> {
    if unit_price <= 0.0 {
        return Ok(());
    }
    sqlx::query(
        "INSERT INTO price_history \
         (ipn, vendor_id, vendor_name, unit_price, currency, min_qty, lead_time_days, po_id, recorded_at) \
         VALUES (?, ?, ?, ?, 'USD', ?, ?, ?, ?) \
         ON CONFLICT (ipn, vendor_name, recorded_at) DO NOTHING",
    )
    .bind(ipn)
    .bind(vendor_id)
    .bind(vendor_name)
    .bind(unit_price)
    .bind(min_qty.max(1))
    .bind(lead_time_days)
    .bind(po_id)
    .bind(now_millis())
    .execute(conn)
    .await?;
    Ok(())
}

/// Price history for one part, newest first.
pub async fn for_ipn(db: &Db, ipn: &str, limit: i64) -> AppResult<Vec<PriceEntry>> {
    let rows = sqlx::query_as::<_, PriceEntry>(
        "SELECT id, ipn, vendor_id, vendor_name, unit_price, currency, min_qty, lead_time_days, \
         po_id, recorded_at \
         FROM price_history WHERE ipn = ? ORDER BY recorded_at DESC, id DESC LIMIT ?",
    )
    .bind(ipn)
    .bind(limit.clamp(1, 500))
    .fetch_all(&db.pool)
    .await?;
    Ok(rows)
}

/// Latest known price per vendor for one part.
pub async fn latest_by_vendor(db: &Db, ipn: &str) -> AppResult<Vec<PriceEntry>> {
    let rows = sqlx::query_as::<_, PriceEntry>(
        "SELECT p.id, p.ipn, p.vendor_id, p.vendor_name, p.unit_price, p.currency, p.min_qty, \
         p.lead_time_days, p.po_id, p.recorded_at \
         FROM price_history p \
         JOIN (SELECT vendor_name, MAX(recorded_at) AS latest FROM price_history \
               WHERE ipn = ? GROUP BY vendor_name) m \
           ON m.vendor_name = p.vendor_name AND m.latest = p.recorded_at \
         WHERE p.ipn = ? ORDER BY p.unit_price",
    )
    .bind(ipn)
    .bind(ipn)
    .fetch_all(&db.pool)
    .await?;
    Ok(rows)
}
