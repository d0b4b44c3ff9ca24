//! Receiving and incoming inspection.
//!
//! Receiving defaults to the inspection branch: quantities land in a
//! `receiving_inspections` row and inventory is untouched until the
//! inspection is closed. `skip_inspection` credits inventory directly.
//! An inspection is terminal once `inspected_at` is set; re-inspection is
//! refused and stock is credited exactly once.

use serde::{Deserialize, Serialize};

use super::{PoLine, PurchaseOrder, apply_recompute, load_lines, load_po, price_history};
use crate::db::Db;
use crate::events::{AppEvent, EventBus, notifications};
use crate::history::{self, ChangeOp};
use crate::inventory;
use crate::quality::{self, NewNcr};
use crate::utils::{AppError, AppResult, now_millis};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReceivingInspection {
    pub id: i64,
    pub po_id: String,
    pub po_line_id: i64,
    pub ipn: String,
    pub qty_received: i64,
    pub qty_passed: i64,
    pub qty_failed: i64,
    pub qty_on_hold: i64,
    pub inspector: Option<String>,
    pub notes: Option<String>,
    pub created_at: i64,
    pub inspected_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiveLine {
    pub line_id: i64,
    pub qty: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiveRequest {
    pub lines: Vec<ReceiveLine>,
    #[serde(default)]
    pub skip_inspection: bool,
    /// Receiving beyond `qty_ordered` is rejected unless explicitly
    /// allowed.
    #[serde(default)]
    pub allow_over_receive: bool,
}

#[derive(Debug, Serialize)]
pub struct ReceiveOutcome {
    pub po: PurchaseOrder,
    pub lines: Vec<PoLine>,
    /// Inspection rows opened by this receipt (empty with
    /// `skip_inspection`).
    pub inspections: Vec<ReceivingInspection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InspectRequest {
    pub qty_passed: i64,
    pub qty_failed: i64,
    #[serde(default)]
    pub qty_on_hold: i64,
    pub inspector: String,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InspectOutcome {
    pub inspection: ReceivingInspection,
    /// NCR auto-created for failed quantity, when any.
    pub ncr_id: Option<String>,
}

async fn load_inspection(
    conn: &mut sqlx::SqliteConnection,
    inspection_id: i64,
) -> AppResult<ReceivingInspection> {
    let row: Option<ReceivingInspection> = sqlx::query_as(
        "SELECT id, po_id, po_line_id, ipn, qty_received, qty_passed, qty_failed, qty_on_hold, \
         inspector, notes, created_at, inspected_at \
         FROM receiving_inspections WHERE id = ?",
    )
    .bind(inspection_id)
    .fetch_optional(conn)
    .await?;
    row.ok_or_else(|| AppError::not_found(format!("Receiving inspection {inspection_id}")))
}

/// Receive quantities against PO lines.
///
/// All requested lines succeed or the whole receipt rolls back. The PO
/// status recompute and the price-history capture run inside the same
/// transaction; events and the notification fire after commit.
pub async fn receive(
    db: &Db,
    bus: &EventBus,
    user: &str,
    po_id: &str,
    req: &ReceiveRequest,
) -> AppResult<ReceiveOutcome> {
    if req.lines.is_empty() {
        return Err(AppError::validation("receive needs at least one line"));
    }

    let mut tx = db.begin().await?;
    let po = load_po(&mut tx, po_id).await?;
    if !matches!(po.status.as_str(), "sent" | "confirmed" | "partial") {
        return Err(AppError::conflict(format!(
            "Cannot receive against a {} purchase order",
            po.status
        )));
    }
    let before = serde_json::to_value(&po)?;

    let vendor_name: String = sqlx::query_scalar("SELECT name FROM vendors WHERE id = ?")
        .bind(&po.vendor_id)
        .fetch_one(&mut *tx)
        .await?;

    let mut inspections = Vec::new();
    for item in &req.lines {
        if item.qty <= 0 {
            return Err(AppError::validation("receive quantity must be positive"));
        }

        let line: Option<PoLine> = sqlx::query_as(
            "SELECT id, po_id, ipn, mpn, manufacturer, qty_ordered, qty_received, unit_price \
             FROM po_lines WHERE id = ? AND po_id = ?",
        )
        .bind(item.line_id)
        .bind(po_id)
        .fetch_optional(&mut *tx)
        .await?;
        let line = line.ok_or_else(|| {
            AppError::not_found(format!("Line {} on purchase order {po_id}", item.line_id))
        })?;

        let remaining = line.qty_ordered - line.qty_received;
        let qty = if item.qty > remaining {
            if !req.allow_over_receive {
                return Err(AppError::conflict(format!(
                    "Line {} would be over-received ({} remaining, {} requested)",
                    line.id, remaining, item.qty
                )));
            }
            item.qty
        } else {
            item.qty
        };

        sqlx::query("UPDATE po_lines SET qty_received = qty_received + ? WHERE id = ?")
            .bind(qty)
            .bind(line.id)
            .execute(&mut *tx)
            .await?;

        if req.skip_inspection {
            inventory::receive(&mut tx, &line.ipn, qty, Some(po_id), Some(user)).await?;
        } else {
            let inspection_id: i64 = sqlx::query_scalar(
                "INSERT INTO receiving_inspections \
                 (po_id, po_line_id, ipn, qty_received, created_at) \
                 VALUES (?, ?, ?, ?, ?) RETURNING id",
            )
            .bind(po_id)
            .bind(line.id)
            .bind(&line.ipn)
            .bind(qty)
            .bind(now_millis())
            .fetch_one(&mut *tx)
            .await?;
            inspections.push(load_inspection(&mut tx, inspection_id).await?);
        }

        if line.unit_price > 0.0 {
            price_history::capture(
                &mut tx,
                &line.ipn,
                Some(&po.vendor_id),
                &vendor_name,
                line.unit_price,
                1,
                None,
                Some(po_id),
            )
            .await?;
        }
    }

    let new_status = apply_recompute(&mut tx, po_id).await?;
    let updated = load_po(&mut tx, po_id).await?;
    let lines = load_lines(&mut tx, po_id).await?;
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

    if new_status == "received" {
        let notification_id = notifications::insert_dedup(
            db,
            "po_received",
            "info",
            &format!("Purchase order received: {po_id}"),
            &format!("{po_id} from {vendor_name} is fully received"),
            Some("purchase_orders"),
            Some(po_id),
        )
        .await?;
        bus.emit(AppEvent::PoReceived {
            po_id: po_id.to_string(),
            notification_id,
        });
    } else {
        bus.emit(AppEvent::PoPartial {
            po_id: po_id.to_string(),
        });
    }

    Ok(ReceiveOutcome {
        po: updated,
        lines,
        inspections,
    })
}

/// Close an inspection: credit passed stock, open an NCR for failures,
/// leave holds with the row. Terminal — a second call gets 409.
pub async fn inspect(
    db: &Db,
    bus: &EventBus,
    user: &str,
    inspection_id: i64,
    req: &InspectRequest,
) -> AppResult<InspectOutcome> {
    if req.qty_passed < 0 || req.qty_failed < 0 || req.qty_on_hold < 0 {
        return Err(AppError::validation("inspection quantities must not be negative"));
    }
    if req.inspector.trim().is_empty() {
        return Err(AppError::validation("inspector must not be empty"));
    }

    let mut tx = db.begin().await?;
    let inspection = load_inspection(&mut tx, inspection_id).await?;

    if inspection.inspected_at.is_some() {
        return Err(AppError::conflict(format!(
            "Inspection {inspection_id} is already complete"
        )));
    }
    if req.qty_passed + req.qty_failed + req.qty_on_hold > inspection.qty_received {
        return Err(AppError::validation(format!(
            "Inspected quantities exceed the {} received",
            inspection.qty_received
        )));
    }

    sqlx::query(
        "UPDATE receiving_inspections SET qty_passed = ?, qty_failed = ?, qty_on_hold = ?, \
         inspector = ?, notes = ?, inspected_at = ? WHERE id = ?",
    )
    .bind(req.qty_passed)
    .bind(req.qty_failed)
    .bind(req.qty_on_hold)
    .bind(&req.inspector)
    .bind(&req.notes)
    .bind(now_millis())
    .bind(inspection_id)
    .execute(&mut *tx)
    .await?;

    if req.qty_passed > 0 {
        inventory::receive(&mut tx, &inspection.ipn, req.qty_passed, Some(&inspection.po_id), Some(user))
            .await?;
    }

    let mut ncr_id = None;
    if req.qty_failed > 0 {
        let ncr = quality::create_ncr_tx(
            &mut tx,
            user,
            &NewNcr {
                title: format!("Receiving failure on {}", inspection.ipn),
                description: Some(format!(
                    "{} of {} failed incoming inspection on {} (inspector: {})",
                    req.qty_failed, inspection.qty_received, inspection.po_id, req.inspector
                )),
                ipn: Some(inspection.ipn.clone()),
                defect_type: "receiving".to_string(),
                severity: "minor".to_string(),
                po_id: Some(inspection.po_id.clone()),
            },
        )
        .await?;
        ncr_id = Some(ncr.id);
    }

    let updated = load_inspection(&mut tx, inspection_id).await?;
    history::record_change(
        &mut tx,
        user,
        "receiving_inspections",
        &inspection_id.to_string(),
        ChangeOp::Update,
        Some(&serde_json::to_value(&inspection)?),
        Some(&serde_json::to_value(&updated)?),
    )
    .await?;
    tx.commit().await?;

    bus.emit(AppEvent::InspectionCompleted {
        inspection_id,
        po_id: updated.po_id.clone(),
        ipn: updated.ipn.clone(),
    });
    if let Some(ref id) = ncr_id {
        bus.emit(AppEvent::NcrCreated { ncr_id: id.clone() });
    }

    Ok(InspectOutcome {
        inspection: updated,
        ncr_id,
    })
}

/// Pending (or all) inspections for the receiving queue view.
pub async fn list_inspections(
    db: &Db,
    pending_only: bool,
    offset: i64,
    limit: i64,
) -> AppResult<(Vec<ReceivingInspection>, i64)> {
    let filter = if pending_only {
        " WHERE inspected_at IS NULL"
    } else {
        ""
    };
    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM receiving_inspections{filter}"))
            .fetch_one(&db.pool)
            .await?;
    let rows = sqlx::query_as::<_, ReceivingInspection>(&format!(
        "SELECT id, po_id, po_line_id, ipn, qty_received, qty_passed, qty_failed, qty_on_hold, \
         inspector, notes, created_at, inspected_at \
         FROM receiving_inspections{filter} ORDER BY id DESC LIMIT ? OFFSET ?"
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(&db.pool)
    .await?;
    Ok((rows, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;
    use crate::procurement::test_fixtures::seed_sent_po;

    fn receive_all(line_id: i64, qty: i64, skip: bool) -> ReceiveRequest {
        ReceiveRequest {
            lines: vec![ReceiveLine { line_id, qty }],
            skip_inspection: skip,
            allow_over_receive: false,
        }
    }

    #[tokio::test]
    async fn inspection_branch_defers_inventory() {
        let (db, _dir) = test_db().await;
        let bus = EventBus::new(16);
        let (po_id, line_id) = seed_sent_po(&db).await;

        let outcome = receive(&db, &bus, "alice", &po_id, &receive_all(line_id, 100, false))
            .await
            .unwrap();
        assert_eq!(outcome.po.status, "received");
        assert_eq!(outcome.inspections.len(), 1);
        assert!(outcome.inspections[0].inspected_at.is_none());

        // Inventory untouched until the inspection closes.
        assert!(inventory::get(&db, "RES-001").await.unwrap().is_none());

        // Price history captured from the line price.
        let price: f64 = sqlx::query_scalar(
            "SELECT unit_price FROM price_history WHERE ipn = 'RES-001' AND vendor_id = 'V-001'",
        )
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert!((price - 0.10).abs() < 1e-9);
    }

    #[tokio::test]
    async fn skip_inspection_credits_directly() {
        let (db, _dir) = test_db().await;
        let bus = EventBus::new(16);
        let (po_id, line_id) = seed_sent_po(&db).await;

        let outcome = receive(&db, &bus, "alice", &po_id, &receive_all(line_id, 40, true))
            .await
            .unwrap();
        assert_eq!(outcome.po.status, "partial");
        assert!(outcome.inspections.is_empty());

        let item = inventory::get(&db, "RES-001").await.unwrap().unwrap();
        assert_eq!(item.qty_on_hand, 40);
    }

    #[tokio::test]
    async fn over_receive_rejected_without_flag() {
        let (db, _dir) = test_db().await;
        let bus = EventBus::new(16);
        let (po_id, line_id) = seed_sent_po(&db).await;

        let err = receive(&db, &bus, "alice", &po_id, &receive_all(line_id, 120, true))
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::Conflict);

        let req = ReceiveRequest {
            lines: vec![ReceiveLine { line_id, qty: 120 }],
            skip_inspection: true,
            allow_over_receive: true,
        };
        let outcome = receive(&db, &bus, "alice", &po_id, &req).await.unwrap();
        assert_eq!(outcome.po.status, "received");
        assert_eq!(outcome.lines[0].qty_received, 120);
    }

    #[tokio::test]
    async fn inspect_splits_pass_fail_hold() {
        let (db, _dir) = test_db().await;
        let bus = EventBus::new(16);
        let (po_id, line_id) = seed_sent_po(&db).await;

        let outcome = receive(&db, &bus, "alice", &po_id, &receive_all(line_id, 100, false))
            .await
            .unwrap();
        let inspection_id = outcome.inspections[0].id;

        let result = inspect(
            &db,
            &bus,
            "alice",
            inspection_id,
            &InspectRequest {
                qty_passed: 80,
                qty_failed: 15,
                qty_on_hold: 5,
                inspector: "alice".into(),
                notes: None,
            },
        )
        .await
        .unwrap();

        // 80 credited, once.
        let item = inventory::get(&db, "RES-001").await.unwrap().unwrap();
        assert_eq!(item.qty_on_hand, 80);

        // NCR auto-created for the failed quantity.
        let ncr_id = result.ncr_id.unwrap();
        let (ipn, defect_type, severity, status): (String, String, String, String) =
            sqlx::query_as("SELECT ipn, defect_type, severity, status FROM ncrs WHERE id = ?")
                .bind(&ncr_id)
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert_eq!(ipn, "RES-001");
        assert_eq!(defect_type, "receiving");
        assert_eq!(severity, "minor");
        assert_eq!(status, "open");
    }

    #[tokio::test]
    async fn double_inspection_rejected() {
        let (db, _dir) = test_db().await;
        let bus = EventBus::new(16);
        let (po_id, line_id) = seed_sent_po(&db).await;

        let outcome = receive(&db, &bus, "alice", &po_id, &receive_all(line_id, 100, false))
            .await
            .unwrap();
        let inspection_id = outcome.inspections[0].id;
        let req = InspectRequest {
            qty_passed: 100,
            qty_failed: 0,
            qty_on_hold: 0,
            inspector: "alice".into(),
            notes: None,
        };
        inspect(&db, &bus, "alice", inspection_id, &req).await.unwrap();

        let err = inspect(&db, &bus, "alice", inspection_id, &req).await.unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::Conflict);

        // Inventory credited exactly once.
        let item = inventory::get(&db, "RES-001").await.unwrap().unwrap();
        assert_eq!(item.qty_on_hand, 100);
    }

    #[tokio::test]
    async fn inspect_rejects_overcount() {
        let (db, _dir) = test_db().await;
        let bus = EventBus::new(16);
        let (po_id, line_id) = seed_sent_po(&db).await;

        let outcome = receive(&db, &bus, "alice", &po_id, &receive_all(line_id, 50, false))
            .await
            .unwrap();
        let err = inspect(
            &db,
            &bus,
            "alice",
            outcome.inspections[0].id,
            &InspectRequest {
                qty_passed: 40,
                qty_failed: 20,
                qty_on_hold: 0,
                inspector: "alice".into(),
                notes: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::InvalidInput);
    }
}
