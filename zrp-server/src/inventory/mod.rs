//! Inventory ledger.
//!
//! Single entry point for all stock state change. Every operation runs
//! inside the caller's transaction, appends an `inventory_txns` row, and
//! keeps `qty_on_hand >= 0` and `qty_reserved <= qty_on_hand` — enforced
//! here as preconditions and again by the table CHECKs. Inventory rows are
//! created lazily on first transaction. When one workflow touches several
//! IPNs, callers iterate them in lexicographic order.

use serde::Serialize;
use sqlx::SqliteConnection;

use crate::db::Db;
use crate::utils::{AppError, AppResult, now_millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnType {
    Receive,
    Issue,
    Adjust,
    Transfer,
    Return,
    Scrap,
}

impl TxnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::Issue => "issue",
            Self::Adjust => "adjust",
            Self::Transfer => "transfer",
            Self::Return => "return",
            Self::Scrap => "scrap",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct InventoryItem {
    pub ipn: String,
    pub qty_on_hand: i64,
    pub qty_reserved: i64,
    pub reorder_point: i64,
    pub location: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct InventoryTxn {
    pub id: i64,
    pub ipn: String,
    pub txn_type: String,
    pub qty: i64,
    pub reference: Option<String>,
    pub note: Option<String>,
    pub created_by: Option<String>,
    pub created_at: i64,
}

async fn ensure_row(conn: &mut SqliteConnection, ipn: &str) -> AppResult<()> {
    sqlx::query("INSERT OR IGNORE INTO inventory (ipn, updated_at) VALUES (?, ?)")
        .bind(ipn)
        .bind(now_millis())
        .execute(conn)
        .await?;
    Ok(())
}

async fn load(conn: &mut SqliteConnection, ipn: &str) -> AppResult<InventoryItem> {
    ensure_row(&mut *conn, ipn).await?;
    let item = sqlx::query_as::<_, InventoryItem>(
        "SELECT ipn, qty_on_hand, qty_reserved, reorder_point, location, updated_at \
         FROM inventory WHERE ipn = ?",
    )
    .bind(ipn)
    .fetch_one(conn)
    .await?;
    Ok(item)
}

async fn append_txn(
    conn: &mut SqliteConnection,
    ipn: &str,
    txn_type: TxnType,
    qty: i64,
    reference: Option<&str>,
    note: Option<&str>,
    user: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO inventory_txns (ipn, txn_type, qty, reference, note, created_by, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(ipn)
    .bind(txn_type.as_str())
    .bind(qty)
    .bind(reference)
    .bind(note)
    .bind(user)
    .bind(now_millis())
    .execute(conn)
    .await?;
    Ok(())
}

async fn set_on_hand(conn: &mut SqliteConnection, ipn: &str, qty_on_hand: i64) -> AppResult<()> {
    sqlx::query("UPDATE inventory SET qty_on_hand = ?, updated_at = ? WHERE ipn = ?")
        .bind(qty_on_hand)
        .bind(now_millis())
        .bind(ipn)
        .execute(conn)
        .await?;
    Ok(())
}

async fn set_reserved(conn: &mut SqliteConnection, ipn: &str, qty_reserved: i64) -> AppResult<()> {
    sqlx::query("UPDATE inventory SET qty_reserved = ?, updated_at = ? WHERE ipn = ?")
        .bind(qty_reserved)
        .bind(now_millis())
        .bind(ipn)
        .execute(conn)
        .await?;
    Ok(())
}

fn require_positive(qty: i64, op: &str) -> AppResult<()> {
    if qty <= 0 {
        return Err(AppError::validation(format!("{op} quantity must be positive")));
    }
    Ok(())
}

/// Add received stock.
pub async fn receive(
    conn: &mut SqliteConnection,
    ipn: &str,
    qty: i64,
    reference: Option<&str>,
    user: Option<&str>,
) -> AppResult<InventoryItem> {
    require_positive(qty, "receive")?;
    let item = load(&mut *conn, ipn).await?;
    set_on_hand(&mut *conn, ipn, item.qty_on_hand + qty).await?;
    append_txn(&mut *conn, ipn, TxnType::Receive, qty, reference, None, user).await?;
    load(conn, ipn).await
}

/// Consume unreserved stock. Fails when available (on hand minus reserved)
/// is short.
pub async fn issue(
    conn: &mut SqliteConnection,
    ipn: &str,
    qty: i64,
    reference: Option<&str>,
    user: Option<&str>,
) -> AppResult<InventoryItem> {
    require_positive(qty, "issue")?;
    let item = load(&mut *conn, ipn).await?;
    if item.qty_on_hand - item.qty_reserved < qty {
        return Err(AppError::conflict(format!(
            "Insufficient stock for {ipn}: {} available, {qty} requested",
            item.qty_on_hand - item.qty_reserved
        )));
    }
    set_on_hand(&mut *conn, ipn, item.qty_on_hand - qty).await?;
    append_txn(&mut *conn, ipn, TxnType::Issue, qty, reference, None, user).await?;
    load(conn, ipn).await
}

/// Reserve available stock (kitting). Fails when available is short.
pub async fn reserve(
    conn: &mut SqliteConnection,
    ipn: &str,
    qty: i64,
    reference: Option<&str>,
    user: Option<&str>,
) -> AppResult<InventoryItem> {
    require_positive(qty, "reserve")?;
    let item = load(&mut *conn, ipn).await?;
    if item.qty_on_hand - item.qty_reserved < qty {
        return Err(AppError::conflict(format!(
            "Insufficient available stock for {ipn}: {} available, {qty} requested",
            item.qty_on_hand - item.qty_reserved
        )));
    }
    set_reserved(&mut *conn, ipn, item.qty_reserved + qty).await?;
    append_txn(&mut *conn, ipn, TxnType::Transfer, qty, reference, Some("reserve"), user).await?;
    load(conn, ipn).await
}

/// Release a reservation.
pub async fn release(
    conn: &mut SqliteConnection,
    ipn: &str,
    qty: i64,
    reference: Option<&str>,
    user: Option<&str>,
) -> AppResult<InventoryItem> {
    require_positive(qty, "release")?;
    let item = load(&mut *conn, ipn).await?;
    if item.qty_reserved < qty {
        return Err(AppError::conflict(format!(
            "Cannot release {qty} of {ipn}: only {} reserved",
            item.qty_reserved
        )));
    }
    set_reserved(&mut *conn, ipn, item.qty_reserved - qty).await?;
    append_txn(&mut *conn, ipn, TxnType::Transfer, qty, reference, Some("release"), user).await?;
    load(conn, ipn).await
}

/// Signed manual correction with a required reason. Admin-only semantics
/// are enforced at the API layer.
pub async fn adjust(
    conn: &mut SqliteConnection,
    ipn: &str,
    delta: i64,
    reason: &str,
    user: Option<&str>,
) -> AppResult<InventoryItem> {
    if delta == 0 {
        return Err(AppError::validation("adjust delta must not be zero"));
    }
    let item = load(&mut *conn, ipn).await?;
    let new_on_hand = item.qty_on_hand + delta;
    if new_on_hand < 0 {
        return Err(AppError::conflict(format!(
            "Adjustment would make {ipn} stock negative ({} on hand, {delta:+})",
            item.qty_on_hand
        )));
    }
    if new_on_hand < item.qty_reserved {
        return Err(AppError::conflict(format!(
            "Adjustment would drop {ipn} below its reserved quantity ({})",
            item.qty_reserved
        )));
    }
    set_on_hand(&mut *conn, ipn, new_on_hand).await?;
    append_txn(&mut *conn, ipn, TxnType::Adjust, delta, None, Some(reason), user).await?;
    load(conn, ipn).await
}

/// Customer return back into stock (RMA restock).
pub async fn return_stock(
    conn: &mut SqliteConnection,
    ipn: &str,
    qty: i64,
    reference: Option<&str>,
    user: Option<&str>,
) -> AppResult<InventoryItem> {
    require_positive(qty, "return")?;
    let item = load(&mut *conn, ipn).await?;
    set_on_hand(&mut *conn, ipn, item.qty_on_hand + qty).await?;
    append_txn(&mut *conn, ipn, TxnType::Return, qty, reference, None, user).await?;
    load(conn, ipn).await
}

/// Write off unreserved stock.
pub async fn scrap(
    conn: &mut SqliteConnection,
    ipn: &str,
    qty: i64,
    reference: Option<&str>,
    user: Option<&str>,
) -> AppResult<InventoryItem> {
    require_positive(qty, "scrap")?;
    let item = load(&mut *conn, ipn).await?;
    if item.qty_on_hand - item.qty_reserved < qty {
        return Err(AppError::conflict(format!(
            "Insufficient stock for {ipn}: {} available, {qty} requested",
            item.qty_on_hand - item.qty_reserved
        )));
    }
    set_on_hand(&mut *conn, ipn, item.qty_on_hand - qty).await?;
    append_txn(&mut *conn, ipn, TxnType::Scrap, qty, reference, None, user).await?;
    load(conn, ipn).await
}

/// Update reorder point / location metadata (no ledger row).
pub async fn update_settings(
    conn: &mut SqliteConnection,
    ipn: &str,
    reorder_point: Option<i64>,
    location: Option<&str>,
) -> AppResult<InventoryItem> {
    ensure_row(&mut *conn, ipn).await?;
    if let Some(rp) = reorder_point {
        if rp < 0 {
            return Err(AppError::validation("reorder_point must not be negative"));
        }
        sqlx::query("UPDATE inventory SET reorder_point = ?, updated_at = ? WHERE ipn = ?")
            .bind(rp)
            .bind(now_millis())
            .bind(ipn)
            .execute(&mut *conn)
            .await?;
    }
    if let Some(loc) = location {
        sqlx::query("UPDATE inventory SET location = ?, updated_at = ? WHERE ipn = ?")
            .bind(loc)
            .bind(now_millis())
            .bind(ipn)
            .execute(&mut *conn)
            .await?;
    }
    load(conn, ipn).await
}

// ── Reads ───────────────────────────────────────────────────────────

pub async fn get(db: &Db, ipn: &str) -> AppResult<Option<InventoryItem>> {
    let item = sqlx::query_as::<_, InventoryItem>(
        "SELECT ipn, qty_on_hand, qty_reserved, reorder_point, location, updated_at \
         FROM inventory WHERE ipn = ?",
    )
    .bind(ipn)
    .fetch_optional(&db.pool)
    .await?;
    Ok(item)
}

pub async fn list(db: &Db, offset: i64, limit: i64) -> AppResult<(Vec<InventoryItem>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inventory")
        .fetch_one(&db.pool)
        .await?;
    let items = sqlx::query_as::<_, InventoryItem>(
        "SELECT ipn, qty_on_hand, qty_reserved, reorder_point, location, updated_at \
         FROM inventory ORDER BY ipn LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(&db.pool)
    .await?;
    Ok((items, total))
}

/// Items at or below their reorder point (reorder point 0 means "not
/// tracked").
pub async fn low_stock(db: &Db) -> AppResult<Vec<InventoryItem>> {
    let items = sqlx::query_as::<_, InventoryItem>(
        "SELECT ipn, qty_on_hand, qty_reserved, reorder_point, location, updated_at \
         FROM inventory WHERE reorder_point > 0 AND qty_on_hand <= reorder_point ORDER BY ipn",
    )
    .fetch_all(&db.pool)
    .await?;
    Ok(items)
}

pub async fn transactions(
    db: &Db,
    ipn: Option<&str>,
    offset: i64,
    limit: i64,
) -> AppResult<(Vec<InventoryTxn>, i64)> {
    let (rows, total) = match ipn {
        Some(ipn) => {
            let total: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM inventory_txns WHERE ipn = ?")
                    .bind(ipn)
                    .fetch_one(&db.pool)
                    .await?;
            let rows = sqlx::query_as::<_, InventoryTxn>(
                "SELECT id, ipn, txn_type, qty, reference, note, created_by, created_at \
                 FROM inventory_txns WHERE ipn = ? ORDER BY id DESC LIMIT ? OFFSET ?",
            )
            .bind(ipn)
            .bind(limit)
            .bind(offset)
            .fetch_all(&db.pool)
            .await?;
            (rows, total)
        }
        None => {
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inventory_txns")
                .fetch_one(&db.pool)
                .await?;
            let rows = sqlx::query_as::<_, InventoryTxn>(
                "SELECT id, ipn, txn_type, qty, reference, note, created_by, created_at \
                 FROM inventory_txns ORDER BY id DESC LIMIT ? OFFSET ?",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(&db.pool)
            .await?;
            (rows, total)
        }
    };
    Ok((rows, total))
}
