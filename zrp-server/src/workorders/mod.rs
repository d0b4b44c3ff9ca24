//! Work-order engine.
//!
//! Lifecycle: `open → in_progress → completed`, with `cancelled` reachable
//! from `open` or `in_progress`. Kitting is an explicit required step: it
//! reserves every BOM component for the build, must happen before
//! completion, and is released again on cancel. Completion issues the
//! component quantities, releases the matching reservations and receives
//! the good assemblies — all inside one transaction. Inventory rows are
//! touched in child-IPN order throughout.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::bom;
use crate::db::{Db, ids};
use crate::events::{AppEvent, EventBus};
use crate::history::{self, ChangeOp};
use crate::inventory;
use crate::utils::bulk::BulkOutcome;
use crate::utils::validation::{MAX_NOTE_LEN, MAX_SHORT_TEXT_LEN, Validator};
use crate::utils::{AppError, AppResult, now_millis};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WorkOrder {
    pub id: String,
    pub assembly_ipn: String,
    pub qty: i64,
    pub status: String,
    pub priority: Option<String>,
    pub due_date: Option<String>,
    pub notes: Option<String>,
    pub kitted: bool,
    pub qty_good: i64,
    pub qty_scrap: i64,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewWorkOrder {
    pub assembly_ipn: String,
    pub qty: i64,
    pub priority: Option<String>,
    pub due_date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteRequest {
    pub qty_good: i64,
    #[serde(default)]
    pub qty_scrap: i64,
}

async fn load(conn: &mut SqliteConnection, id: &str) -> AppResult<WorkOrder> {
    let row: Option<WorkOrder> = sqlx::query_as(
        "SELECT id, assembly_ipn, qty, status, priority, due_date, notes, kitted, qty_good, \
         qty_scrap, created_by, created_at, started_at, completed_at \
         FROM work_orders WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    row.ok_or_else(|| AppError::not_found(format!("Work order {id}")))
}

pub async fn create(db: &Db, user: &str, req: &NewWorkOrder) -> AppResult<WorkOrder> {
    let mut v = Validator::new();
    v.require_text(&req.assembly_ipn, "assembly_ipn", MAX_SHORT_TEXT_LEN)
        .positive(req.qty, "qty")
        .optional_text(req.notes.as_deref(), "notes", MAX_NOTE_LEN);
    if !req.assembly_ipn.starts_with(bom::ASSEMBLY_PREFIX) {
        v.push(format!(
            "assembly_ipn must be an assembly ({}-prefixed)",
            bom::ASSEMBLY_PREFIX
        ));
    }
    v.finish()?;

    let mut tx = db.begin().await?;
    let id = ids::next_id(&mut tx, ids::IdFamily::WorkOrder).await?;
    sqlx::query(
        "INSERT INTO work_orders (id, assembly_ipn, qty, status, priority, due_date, notes, created_by, created_at) \
         VALUES (?, ?, ?, 'open', ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&req.assembly_ipn)
    .bind(req.qty)
    .bind(&req.priority)
    .bind(&req.due_date)
    .bind(&req.notes)
    .bind(user)
    .bind(now_millis())
    .execute(&mut *tx)
    .await?;

    let wo = load(&mut tx, &id).await?;
    history::record_change(
        &mut tx,
        user,
        "work_orders",
        &id,
        ChangeOp::Create,
        None,
        Some(&serde_json::to_value(&wo)?),
    )
    .await?;
    tx.commit().await?;
    Ok(wo)
}

pub async fn get(db: &Db, id: &str) -> AppResult<WorkOrder> {
    let mut conn = db.pool.acquire().await?;
    load(&mut conn, id).await
}

pub async fn list(
    db: &Db,
    status: Option<&str>,
    offset: i64,
    limit: i64,
) -> AppResult<(Vec<WorkOrder>, i64)> {
    let filter = if status.is_some() { " WHERE status = ?" } else { "" };
    let count_sql = format!("SELECT COUNT(*) FROM work_orders{filter}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(s) = status {
        count_query = count_query.bind(s);
    }
    let total = count_query.fetch_one(&db.pool).await?;

    let select_sql = format!(
        "SELECT id, assembly_ipn, qty, status, priority, due_date, notes, kitted, qty_good, \
         qty_scrap, created_by, created_at, started_at, completed_at \
         FROM work_orders{filter} ORDER BY id DESC LIMIT ? OFFSET ?"
    );
    let mut select_query = sqlx::query_as::<_, WorkOrder>(&select_sql);
    if let Some(s) = status {
        select_query = select_query.bind(s);
    }
    let rows = select_query.bind(limit).bind(offset).fetch_all(&db.pool).await?;
    Ok((rows, total))
}

/// Start a work order (`open → in_progress`, stamping `started_at`).
pub async fn start(db: &Db, user: &str, id: &str) -> AppResult<WorkOrder> {
    let mut tx = db.begin().await?;
    let before = load(&mut tx, id).await?;
    if before.status != "open" {
        return Err(AppError::conflict(format!(
            "Cannot start a {} work order",
            before.status
        )));
    }
    sqlx::query("UPDATE work_orders SET status = 'in_progress', started_at = ? WHERE id = ?")
        .bind(now_millis())
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let updated = load(&mut tx, id).await?;
    history::record_change(
        &mut tx,
        user,
        "work_orders",
        id,
        ChangeOp::Update,
        Some(&serde_json::to_value(&before)?),
        Some(&serde_json::to_value(&updated)?),
    )
    .await?;
    tx.commit().await?;
    Ok(updated)
}

/// Component shortage analysis against available (unreserved) stock.
pub async fn shortages(db: &Db, id: &str) -> AppResult<Vec<bom::ShortageLine>> {
    let wo = get(db, id).await?;
    let mut conn = db.pool.acquire().await?;
    let edges = bom::children_of(&mut conn, &wo.assembly_ipn).await?;
    drop(conn);

    let mut lines = Vec::with_capacity(edges.len());
    for req in bom::explode(&edges, wo.qty) {
        let (on_hand, reserved) = inventory::get(db, &req.ipn)
            .await?
            .map(|i| (i.qty_on_hand, i.qty_reserved))
            .unwrap_or((0, 0));
        lines.push(bom::shortage_line(&req.ipn, req.required, on_hand, reserved));
    }
    Ok(lines)
}

/// Kit the work order: reserve `qty_per × qty` of every BOM component in
/// one transaction. A kitted work order rejects a second kit call.
pub async fn kit(db: &Db, user: &str, id: &str) -> AppResult<WorkOrder> {
    let mut tx = db.begin().await?;
    let before = load(&mut tx, id).await?;
    if !matches!(before.status.as_str(), "open" | "in_progress") {
        return Err(AppError::conflict(format!(
            "Cannot kit a {} work order",
            before.status
        )));
    }
    if before.kitted {
        return Err(AppError::conflict(format!("Work order {id} is already kitted")));
    }

    // children_of orders by child IPN — the canonical inventory lock order.
    let edges = bom::children_of(&mut tx, &before.assembly_ipn).await?;
    for req in bom::explode(&edges, before.qty) {
        inventory::reserve(&mut tx, &req.ipn, req.required, Some(id), Some(user)).await?;
    }

    sqlx::query("UPDATE work_orders SET kitted = 1 WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let updated = load(&mut tx, id).await?;
    history::record_change(
        &mut tx,
        user,
        "work_orders",
        id,
        ChangeOp::Update,
        Some(&serde_json::to_value(&before)?),
        Some(&serde_json::to_value(&updated)?),
    )
    .await?;
    tx.commit().await?;
    Ok(updated)
}

/// Complete the build: consume components, receive good assemblies.
///
/// Requires a kitted work order and `qty_good + qty_scrap <= qty`. For
/// each component the reservation is released and the full build quantity
/// issued; the assembly is received for `qty_good` only.
pub async fn complete(
    db: &Db,
    bus: &EventBus,
    user: &str,
    id: &str,
    req: &CompleteRequest,
) -> AppResult<WorkOrder> {
    if req.qty_good < 0 || req.qty_scrap < 0 {
        return Err(AppError::validation("quantities must not be negative"));
    }

    let mut tx = db.begin().await?;
    let before = load(&mut tx, id).await?;
    if !matches!(before.status.as_str(), "open" | "in_progress") {
        return Err(AppError::conflict(format!(
            "Cannot complete a {} work order",
            before.status
        )));
    }
    if !before.kitted {
        return Err(AppError::conflict(format!(
            "Work order {id} must be kitted before completion"
        )));
    }
    if req.qty_good + req.qty_scrap > before.qty {
        return Err(AppError::validation(format!(
            "qty_good + qty_scrap exceeds the build quantity of {}",
            before.qty
        )));
    }

    let edges = bom::children_of(&mut tx, &before.assembly_ipn).await?;
    for component in bom::explode(&edges, before.qty) {
        inventory::release(&mut tx, &component.ipn, component.required, Some(id), Some(user))
            .await?;
        inventory::issue(&mut tx, &component.ipn, component.required, Some(id), Some(user))
            .await?;
    }
    if req.qty_good > 0 {
        inventory::receive(&mut tx, &before.assembly_ipn, req.qty_good, Some(id), Some(user))
            .await?;
    }

    sqlx::query(
        "UPDATE work_orders SET status = 'completed', qty_good = ?, qty_scrap = ?, \
         completed_at = ?, kitted = 0 WHERE id = ?",
    )
    .bind(req.qty_good)
    .bind(req.qty_scrap)
    .bind(now_millis())
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let updated = load(&mut tx, id).await?;
    history::record_change(
        &mut tx,
        user,
        "work_orders",
        id,
        ChangeOp::Update,
        Some(&serde_json::to_value(&before)?),
        Some(&serde_json::to_value(&updated)?),
    )
    .await?;
    tx.commit().await?;

    bus.emit(AppEvent::WoCompleted { wo_id: id.to_string() });
    Ok(updated)
}

/// Cancel from `open` or `in_progress`; a kitted work order releases its
/// reservations in the same transaction.
pub async fn cancel(db: &Db, user: &str, id: &str) -> AppResult<WorkOrder> {
    let mut tx = db.begin().await?;
    let before = load(&mut tx, id).await?;
    if !matches!(before.status.as_str(), "open" | "in_progress") {
        return Err(AppError::conflict(format!(
            "Cannot cancel a {} work order",
            before.status
        )));
    }

    if before.kitted {
        let edges = bom::children_of(&mut tx, &before.assembly_ipn).await?;
        for component in bom::explode(&edges, before.qty) {
            inventory::release(&mut tx, &component.ipn, component.required, Some(id), Some(user))
                .await?;
        }
    }

    sqlx::query("UPDATE work_orders SET status = 'cancelled', kitted = 0 WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let updated = load(&mut tx, id).await?;
    history::record_change(
        &mut tx,
        user,
        "work_orders",
        id,
        ChangeOp::Update,
        Some(&serde_json::to_value(&before)?),
        Some(&serde_json::to_value(&updated)?),
    )
    .await?;
    tx.commit().await?;
    Ok(updated)
}

pub async fn delete(db: &Db, user: &str, id: &str) -> AppResult<()> {
    let mut tx = db.begin().await?;
    let wo = load(&mut tx, id).await?;
    if wo.status != "open" {
        return Err(AppError::conflict("Only open work orders can be deleted"));
    }
    if wo.kitted {
        let edges = bom::children_of(&mut tx, &wo.assembly_ipn).await?;
        for component in bom::explode(&edges, wo.qty) {
            inventory::release(&mut tx, &component.ipn, component.required, Some(id), Some(user))
                .await?;
        }
    }

    let snapshot = serde_json::to_value(&wo)?;
    sqlx::query("DELETE FROM work_orders WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    history::record_change(&mut tx, user, "work_orders", id, ChangeOp::Delete, Some(&snapshot), None)
        .await?;
    tx.commit().await?;
    Ok(())
}

// ── Bulk operations (per-item; no transaction spans items) ──────────

pub async fn bulk_complete(db: &Db, bus: &EventBus, user: &str, ids: &[String]) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    for id in ids {
        let req = match get(db, id).await {
            Ok(wo) => CompleteRequest {
                qty_good: wo.qty,
                qty_scrap: 0,
            },
            Err(e) => {
                outcome.fail(id, e);
                continue;
            }
        };
        match complete(db, bus, user, id, &req).await {
            Ok(_) => outcome.ok(),
            Err(e) => outcome.fail(id, e),
        }
    }
    outcome
}

pub async fn bulk_cancel(db: &Db, user: &str, ids: &[String]) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    for id in ids {
        match cancel(db, user, id).await {
            Ok(_) => outcome.ok(),
            Err(e) => outcome.fail(id, e),
        }
    }
    outcome
}

pub async fn bulk_delete(db: &Db, user: &str, ids: &[String]) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    for id in ids {
        match delete(db, user, id).await {
            Ok(_) => outcome.ok(),
            Err(e) => outcome.fail(id, e),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    async fn seed_build(db: &Db) -> WorkOrder {
        let mut tx = db.begin().await.unwrap();
        bom::add_edge(&mut tx, "ASY-001", "RES-001", 10, None).await.unwrap();
        bom::add_edge(&mut tx, "ASY-001", "CAP-001", 2, None).await.unwrap();
        inventory::receive(&mut tx, "RES-001", 200, None, None).await.unwrap();
        inventory::receive(&mut tx, "CAP-001", 50, None, None).await.unwrap();
        tx.commit().await.unwrap();

        create(
            db,
            "alice",
            &NewWorkOrder {
                assembly_ipn: "ASY-001".into(),
                qty: 10,
                priority: None,
                due_date: None,
                notes: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn kit_reserves_components() {
        let (db, _dir) = test_db().await;
        let wo = seed_build(&db).await;

        let wo = kit(&db, "alice", &wo.id).await.unwrap();
        assert!(wo.kitted);

        let res = inventory::get(&db, "RES-001").await.unwrap().unwrap();
        let cap = inventory::get(&db, "CAP-001").await.unwrap().unwrap();
        assert_eq!(res.qty_reserved, 100);
        assert_eq!(cap.qty_reserved, 20);

        // Idempotence: a second kit is rejected.
        let err = kit(&db, "alice", &wo.id).await.unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn kit_fails_atomically_on_shortage() {
        let (db, _dir) = test_db().await;
        let mut tx = db.begin().await.unwrap();
        bom::add_edge(&mut tx, "ASY-002", "RES-002", 5, None).await.unwrap();
        bom::add_edge(&mut tx, "ASY-002", "XTAL-001", 1, None).await.unwrap();
        inventory::receive(&mut tx, "RES-002", 100, None, None).await.unwrap();
        // XTAL-001 has no stock.
        tx.commit().await.unwrap();

        let wo = create(
            &db,
            "alice",
            &NewWorkOrder {
                assembly_ipn: "ASY-002".into(),
                qty: 4,
                priority: None,
                due_date: None,
                notes: None,
            },
        )
        .await
        .unwrap();

        let err = kit(&db, "alice", &wo.id).await.unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::Conflict);

        // The RES-002 reservation rolled back with the failed kit.
        let res = inventory::get(&db, "RES-002").await.unwrap().unwrap();
        assert_eq!(res.qty_reserved, 0);
        assert!(!get(&db, &wo.id).await.unwrap().kitted);
    }

    #[tokio::test]
    async fn completion_consumes_and_receives() {
        let (db, _dir) = test_db().await;
        let bus = EventBus::new(16);
        let wo = seed_build(&db).await;
        kit(&db, "alice", &wo.id).await.unwrap();
        start(&db, "alice", &wo.id).await.unwrap();

        let wo = complete(
            &db,
            &bus,
            "alice",
            &wo.id,
            &CompleteRequest {
                qty_good: 9,
                qty_scrap: 1,
            },
        )
        .await
        .unwrap();
        assert_eq!(wo.status, "completed");
        assert!(wo.completed_at.is_some());

        let res = inventory::get(&db, "RES-001").await.unwrap().unwrap();
        assert_eq!(res.qty_on_hand, 100);
        assert_eq!(res.qty_reserved, 0);

        // Only the good quantity lands in stock.
        let asy = inventory::get(&db, "ASY-001").await.unwrap().unwrap();
        assert_eq!(asy.qty_on_hand, 9);
    }

    #[tokio::test]
    async fn completion_requires_kit() {
        let (db, _dir) = test_db().await;
        let bus = EventBus::new(16);
        let wo = seed_build(&db).await;

        let err = complete(
            &db,
            &bus,
            "alice",
            &wo.id,
            &CompleteRequest {
                qty_good: 10,
                qty_scrap: 0,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::Conflict);
        assert!(err.message.contains("kitted"));
    }

    #[tokio::test]
    async fn completion_quantity_cap() {
        let (db, _dir) = test_db().await;
        let bus = EventBus::new(16);
        let wo = seed_build(&db).await;
        kit(&db, "alice", &wo.id).await.unwrap();

        let err = complete(
            &db,
            &bus,
            "alice",
            &wo.id,
            &CompleteRequest {
                qty_good: 10,
                qty_scrap: 1,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn cancel_releases_kit() {
        let (db, _dir) = test_db().await;
        let wo = seed_build(&db).await;
        kit(&db, "alice", &wo.id).await.unwrap();

        cancel(&db, "alice", &wo.id).await.unwrap();
        let res = inventory::get(&db, "RES-001").await.unwrap().unwrap();
        assert_eq!(res.qty_reserved, 0);
    }

    #[tokio::test]
    async fn shortage_view_accounts_for_reservations() {
        let (db, _dir) = test_db().await;
        let wo = seed_build(&db).await;

        let lines = shortages(&db, &wo.id).await.unwrap();
        // CAP-001: 20 required, 50 on hand -> ok; RES-001: 100 required,
        // 200 on hand -> ok.
        assert!(lines.iter().all(|l| l.shortage == 0));

        // Reserve most of RES-001 elsewhere; the view flags it.
        let mut tx = db.begin().await.unwrap();
        inventory::reserve(&mut tx, "RES-001", 150, Some("WO-OTHER"), None).await.unwrap();
        tx.commit().await.unwrap();

        let lines = shortages(&db, &wo.id).await.unwrap();
        let res = lines.iter().find(|l| l.ipn == "RES-001").unwrap();
        assert_eq!(res.shortage, 50);
        assert_eq!(res.status, "shortage");
    }

    #[tokio::test]
    async fn bulk_contract() {
        let (db, _dir) = test_db().await;
        let bus = EventBus::new(16);
        let a = seed_build(&db).await;
        kit(&db, "alice", &a.id).await.unwrap();

        let outcome = bulk_complete(&db, &bus, "alice", &[a.id.clone(), "WO-2026-0999".into()]).await;
        assert_eq!(outcome.success, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.errors.len(), 1);
    }
}
