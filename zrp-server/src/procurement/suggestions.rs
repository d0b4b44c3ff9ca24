//! Shortage-driven PO suggestions.
//!
//! Explodes a work order's BOM, computes per-part shortages against
//! on-hand stock, groups them by preferred vendor and records one
//! suggestion per vendor. Parts without a preferred vendor are reported
//! but not grouped. Review can materialize an approved suggestion into a
//! draft purchase order.

use serde::Serialize;
use std::collections::BTreeMap;

use super::{NewPoLine, NewPurchaseOrder};
use crate::bom;
use crate::db::Db;
use crate::inventory;
use crate::utils::{AppError, AppResult, now_millis};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PoSuggestion {
    pub id: i64,
    pub vendor_id: Option<String>,
    pub vendor_name: Option<String>,
    pub source_wo_id: Option<String>,
    pub status: String,
    pub po_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PoSuggestionLine {
    pub id: i64,
    pub suggestion_id: i64,
    pub ipn: String,
    pub qty_needed: i64,
    pub estimated_unit_price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuggestionWithLines {
    #[serde(flatten)]
    pub suggestion: PoSuggestion,
    pub lines: Vec<PoSuggestionLine>,
}

/// A shortage with no preferred vendor to order from.
#[derive(Debug, Clone, Serialize)]
pub struct UnsourcedShortage {
    pub ipn: String,
    pub shortage: i64,
}

#[derive(Debug, Serialize)]
pub struct GenerateOutcome {
    pub suggestions: Vec<SuggestionWithLines>,
    pub unsourced: Vec<UnsourcedShortage>,
    /// Draft POs materialized immediately (empty when `suggest_only`).
    pub created_pos: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ReviewOutcome {
    pub suggestion: PoSuggestion,
    pub po_id: Option<String>,
}

struct PreferredVendor {
    vendor_id: String,
    vendor_name: String,
    unit_price: f64,
}

async fn preferred_vendor(db: &Db, ipn: &str) -> AppResult<Option<PreferredVendor>> {
    let row: Option<(String, String, f64)> = sqlx::query_as(
        "SELECT pv.vendor_id, v.name, pv.unit_price \
         FROM part_vendors pv JOIN vendors v ON v.id = pv.vendor_id \
         WHERE pv.ipn = ? AND pv.is_preferred = 1 \
         ORDER BY pv.unit_price, pv.id LIMIT 1",
    )
    .bind(ipn)
    .fetch_optional(&db.pool)
    .await?;
    Ok(row.map(|(vendor_id, vendor_name, unit_price)| PreferredVendor {
        vendor_id,
        vendor_name,
        unit_price,
    }))
}

async fn load_suggestion(db: &Db, id: i64) -> AppResult<PoSuggestion> {
    let row: Option<PoSuggestion> = sqlx::query_as(
        "SELECT id, vendor_id, vendor_name, source_wo_id, status, po_id, created_at \
         FROM po_suggestions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&db.pool)
    .await?;
    row.ok_or_else(|| AppError::not_found(format!("PO suggestion {id}")))
}

async fn load_lines(db: &Db, suggestion_id: i64) -> AppResult<Vec<PoSuggestionLine>> {
    let lines = sqlx::query_as::<_, PoSuggestionLine>(
        "SELECT id, suggestion_id, ipn, qty_needed, estimated_unit_price \
         FROM po_suggestion_lines WHERE suggestion_id = ? ORDER BY ipn",
    )
    .bind(suggestion_id)
    .fetch_all(&db.pool)
    .await?;
    Ok(lines)
}

/// Generate suggestions for a work order's shortages.
pub async fn generate(
    db: &Db,
    user: &str,
    wo_id: &str,
    suggest_only: bool,
) -> AppResult<GenerateOutcome> {
    let wo: Option<(String, i64)> =
        sqlx::query_as("SELECT assembly_ipn, qty FROM work_orders WHERE id = ?")
            .bind(wo_id)
            .fetch_optional(&db.pool)
            .await?;
    let (assembly_ipn, wo_qty) =
        wo.ok_or_else(|| AppError::not_found(format!("Work order {wo_id}")))?;

    let mut conn = db.pool.acquire().await?;
    let edges = bom::children_of(&mut conn, &assembly_ipn).await?;
    drop(conn);
    if edges.is_empty() {
        return Err(AppError::precondition(format!(
            "{assembly_ipn} has no BOM to generate suggestions from"
        )));
    }

    // Vendor id -> (name, lines to order).
    let mut groups: BTreeMap<String, (String, Vec<(String, i64, f64)>)> = BTreeMap::new();
    let mut unsourced = Vec::new();

    for req in bom::explode(&edges, wo_qty) {
        let on_hand = inventory::get(db, &req.ipn)
            .await?
            .map(|i| i.qty_on_hand)
            .unwrap_or(0);
        let shortage = (req.required - on_hand).max(0);
        if shortage == 0 {
            continue;
        }

        match preferred_vendor(db, &req.ipn).await? {
            Some(vendor) => {
                groups
                    .entry(vendor.vendor_id.clone())
                    .or_insert_with(|| (vendor.vendor_name.clone(), Vec::new()))
                    .1
                    .push((req.ipn.clone(), shortage, vendor.unit_price));
            }
            None => unsourced.push(UnsourcedShortage {
                ipn: req.ipn.clone(),
                shortage,
            }),
        }
    }

    let mut suggestions = Vec::new();
    let mut created_pos = Vec::new();

    for (vendor_id, (vendor_name, lines)) in groups {
        let mut tx = db.begin().await?;
        let suggestion_id: i64 = sqlx::query_scalar(
            "INSERT INTO po_suggestions (vendor_id, vendor_name, source_wo_id, status, created_at) \
             VALUES (?, ?, ?, 'pending', ?) RETURNING id",
        )
        .bind(&vendor_id)
        .bind(&vendor_name)
        .bind(wo_id)
        .bind(now_millis())
        .fetch_one(&mut *tx)
        .await?;

        for (ipn, qty_needed, price) in &lines {
            sqlx::query(
                "INSERT INTO po_suggestion_lines (suggestion_id, ipn, qty_needed, estimated_unit_price) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(suggestion_id)
            .bind(ipn)
            .bind(qty_needed)
            .bind(price)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        if !suggest_only {
            let review = review(db, user, suggestion_id, true, true).await?;
            if let Some(po_id) = review.po_id {
                created_pos.push(po_id);
            }
        }

        suggestions.push(SuggestionWithLines {
            suggestion: load_suggestion(db, suggestion_id).await?,
            lines: load_lines(db, suggestion_id).await?,
        });
    }

    Ok(GenerateOutcome {
        suggestions,
        unsourced,
        created_pos,
    })
}

/// Approve or reject a pending suggestion; optionally materialize the
/// draft PO.
pub async fn review(
    db: &Db,
    user: &str,
    suggestion_id: i64,
    approved: bool,
    create_po: bool,
) -> AppResult<ReviewOutcome> {
    let suggestion = load_suggestion(db, suggestion_id).await?;
    if suggestion.status != "pending" {
        return Err(AppError::conflict(format!(
            "Suggestion {suggestion_id} was already {}",
            suggestion.status
        )));
    }

    let new_status = if approved { "approved" } else { "rejected" };
    sqlx::query("UPDATE po_suggestions SET status = ? WHERE id = ?")
        .bind(new_status)
        .bind(suggestion_id)
        .execute(&db.pool)
        .await?;

    let mut po_id = None;
    if approved && create_po {
        let vendor_id = suggestion.vendor_id.clone().ok_or_else(|| {
            AppError::precondition("Suggestion has no vendor; create the PO manually")
        })?;
        let lines = load_lines(db, suggestion_id).await?;

        // MPN/manufacturer come along from the parts read-model when known.
        let mut po_lines = Vec::new();
        for line in &lines {
            let part: Option<(Option<String>, Option<String>)> =
                sqlx::query_as("SELECT mpn, manufacturer FROM parts WHERE ipn = ?")
                    .bind(&line.ipn)
                    .fetch_optional(&db.pool)
                    .await?;
            let (mpn, manufacturer) = part.unwrap_or((None, None));
            po_lines.push(NewPoLine {
                ipn: line.ipn.clone(),
                mpn,
                manufacturer,
                qty_ordered: line.qty_needed,
                unit_price: line.estimated_unit_price,
            });
        }

        let po = super::create(
            db,
            user,
            &NewPurchaseOrder {
                vendor_id,
                lines: po_lines,
                notes: suggestion
                    .source_wo_id
                    .as_ref()
                    .map(|wo| format!("Generated from {wo} shortages")),
                expected_date: None,
            },
        )
        .await?;

        sqlx::query("UPDATE po_suggestions SET po_id = ? WHERE id = ?")
            .bind(&po.po.id)
            .bind(suggestion_id)
            .execute(&db.pool)
            .await?;
        po_id = Some(po.po.id);
    }

    Ok(ReviewOutcome {
        suggestion: load_suggestion(db, suggestion_id).await?,
        po_id,
    })
}

pub async fn list(
    db: &Db,
    status: Option<&str>,
    offset: i64,
    limit: i64,
) -> AppResult<(Vec<SuggestionWithLines>, i64)> {
    let filter = if status.is_some() { " WHERE status = ?" } else { "" };
    let count_sql = format!("SELECT COUNT(*) FROM po_suggestions{filter}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(s) = status {
        count_query = count_query.bind(s);
    }
    let total = count_query.fetch_one(&db.pool).await?;

    let select_sql = format!(
        "SELECT id, vendor_id, vendor_name, source_wo_id, status, po_id, created_at \
         FROM po_suggestions{filter} ORDER BY id DESC LIMIT ? OFFSET ?"
    );
    let mut select_query = sqlx::query_as::<_, PoSuggestion>(&select_sql);
    if let Some(s) = status {
        select_query = select_query.bind(s);
    }
    let rows = select_query.bind(limit).bind(offset).fetch_all(&db.pool).await?;

    let mut out = Vec::with_capacity(rows.len());
    for suggestion in rows {
        let lines = load_lines(db, suggestion.id).await?;
        out.push(SuggestionWithLines { suggestion, lines });
    }
    Ok((out, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;
    use crate::utils::now_millis;

    async fn seed_vendor(db: &Db, id: &str, name: &str) {
        sqlx::query(
            "INSERT INTO vendors (id, name, lead_time_days, status, created_at) \
             VALUES (?, ?, 7, 'active', ?)",
        )
        .bind(id)
        .bind(name)
        .bind(now_millis())
        .execute(&db.pool)
        .await
        .unwrap();
    }

    async fn seed_preferred(db: &Db, ipn: &str, vendor_id: &str, price: f64) {
        sqlx::query(
            "INSERT INTO part_vendors (ipn, vendor_id, unit_price, moq, is_preferred) \
             VALUES (?, ?, ?, 1, 1)",
        )
        .bind(ipn)
        .bind(vendor_id)
        .bind(price)
        .execute(&db.pool)
        .await
        .unwrap();
    }

    async fn seed_wo(db: &Db, id: &str, assembly: &str, qty: i64) {
        sqlx::query(
            "INSERT INTO work_orders (id, assembly_ipn, qty, status, created_at) \
             VALUES (?, ?, ?, 'open', ?)",
        )
        .bind(id)
        .bind(assembly)
        .bind(qty)
        .bind(now_millis())
        .execute(&db.pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn single_vendor_shortage() {
        let (db, _dir) = test_db().await;
        seed_vendor(&db, "V-001", "Acme").await;
        seed_preferred(&db, "RES-001", "V-001", 0.05).await;
        seed_wo(&db, "WO-2026-0001", "ASY-001", 10).await;

        let mut tx = db.begin().await.unwrap();
        bom::add_edge(&mut tx, "ASY-001", "RES-001", 10, None).await.unwrap();
        inventory::receive(&mut tx, "RES-001", 30, None, None).await.unwrap();
        tx.commit().await.unwrap();

        let outcome = generate(&db, "alice", "WO-2026-0001", true).await.unwrap();
        assert_eq!(outcome.suggestions.len(), 1);
        assert!(outcome.created_pos.is_empty());
        assert!(outcome.unsourced.is_empty());

        let suggestion = &outcome.suggestions[0];
        assert_eq!(suggestion.suggestion.vendor_id.as_deref(), Some("V-001"));
        assert_eq!(suggestion.lines.len(), 1);
        assert_eq!(suggestion.lines[0].ipn, "RES-001");
        // 10 per x 10 builds = 100 required, 30 on hand.
        assert_eq!(suggestion.lines[0].qty_needed, 70);
        assert!((suggestion.lines[0].estimated_unit_price - 0.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn multi_vendor_split() {
        let (db, _dir) = test_db().await;
        seed_vendor(&db, "V-001", "DK").await;
        seed_vendor(&db, "V-002", "MS").await;
        seed_preferred(&db, "RES-001", "V-001", 0.02).await;
        seed_preferred(&db, "CAP-001", "V-001", 0.03).await;
        seed_preferred(&db, "IC-001", "V-002", 1.50).await;
        seed_wo(&db, "WO-2026-0001", "ASY-002", 10).await;

        let mut tx = db.begin().await.unwrap();
        bom::add_edge(&mut tx, "ASY-002", "RES-001", 5, None).await.unwrap();
        bom::add_edge(&mut tx, "ASY-002", "CAP-001", 8, None).await.unwrap();
        bom::add_edge(&mut tx, "ASY-002", "IC-001", 1, None).await.unwrap();
        tx.commit().await.unwrap();

        let outcome = generate(&db, "alice", "WO-2026-0001", true).await.unwrap();
        assert_eq!(outcome.suggestions.len(), 2);

        let dk = outcome
            .suggestions
            .iter()
            .find(|s| s.suggestion.vendor_id.as_deref() == Some("V-001"))
            .unwrap();
        let ms = outcome
            .suggestions
            .iter()
            .find(|s| s.suggestion.vendor_id.as_deref() == Some("V-002"))
            .unwrap();
        assert_eq!(dk.lines.len(), 2);
        assert_eq!(ms.lines.len(), 1);
        assert_eq!(ms.lines[0].qty_needed, 10);
    }

    #[tokio::test]
    async fn unsourced_parts_reported() {
        let (db, _dir) = test_db().await;
        seed_wo(&db, "WO-2026-0001", "ASY-003", 2).await;
        let mut tx = db.begin().await.unwrap();
        bom::add_edge(&mut tx, "ASY-003", "XTAL-001", 1, None).await.unwrap();
        tx.commit().await.unwrap();

        let outcome = generate(&db, "alice", "WO-2026-0001", true).await.unwrap();
        assert!(outcome.suggestions.is_empty());
        assert_eq!(outcome.unsourced.len(), 1);
        assert_eq!(outcome.unsourced[0].ipn, "XTAL-001");
        assert_eq!(outcome.unsourced[0].shortage, 2);
    }

    #[tokio::test]
    async fn review_materializes_po() {
        let (db, _dir) = test_db().await;
        seed_vendor(&db, "V-001", "Acme").await;
        seed_preferred(&db, "RES-001", "V-001", 0.05).await;
        seed_wo(&db, "WO-2026-0001", "ASY-001", 10).await;
        let mut tx = db.begin().await.unwrap();
        bom::add_edge(&mut tx, "ASY-001", "RES-001", 10, None).await.unwrap();
        tx.commit().await.unwrap();

        let outcome = generate(&db, "alice", "WO-2026-0001", true).await.unwrap();
        let suggestion_id = outcome.suggestions[0].suggestion.id;

        let review_outcome = review(&db, "alice", suggestion_id, true, true).await.unwrap();
        let po_id = review_outcome.po_id.unwrap();
        assert_eq!(review_outcome.suggestion.status, "approved");
        assert_eq!(review_outcome.suggestion.po_id.as_deref(), Some(po_id.as_str()));

        let po = crate::procurement::get(&db, &po_id).await.unwrap();
        assert_eq!(po.po.status, "draft");
        assert_eq!(po.lines[0].qty_ordered, 100);
        assert!((po.lines[0].unit_price - 0.05).abs() < 1e-9);

        // A decided suggestion cannot be re-reviewed.
        let err = review(&db, "alice", suggestion_id, false, false).await.unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::Conflict);
    }
}
