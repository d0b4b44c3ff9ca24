//! Change history and undo.
//!
//! Independent of the audit log: audit rows are for humans, change records
//! are for reverting. Every mutation records `(user, table, record_id, op,
//! old_snapshot, new_snapshot)` inside the mutating transaction. Deletes
//! additionally create an undo entry holding the full snapshot; "undo
//! delete" reinserts the row. Undo is refused once any later change exists
//! for the same record.

use serde::Serialize;
use serde_json::Value;
use sqlx::SqliteConnection;
use std::collections::HashSet;

use crate::db::Db;
use crate::utils::{AppError, AppResult, now_millis};

/// Tables eligible for snapshot reinsertion. Guards the dynamic SQL in
/// [`undo_delete`].
const UNDOABLE_TABLES: &[&str] = &[
    "vendors",
    "part_vendors",
    "bom_edges",
    "purchase_orders",
    "po_lines",
    "rfqs",
    "work_orders",
    "ncrs",
    "capas",
    "ecos",
    "rmas",
    "devices",
    "firmware_campaigns",
    "quotes",
    "quote_lines",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChangeRecord {
    pub id: i64,
    pub user_name: String,
    pub table_name: String,
    pub record_id: String,
    pub op: String,
    pub old_snapshot: Option<String>,
    pub new_snapshot: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UndoEntry {
    pub id: i64,
    pub change_id: i64,
    pub user_name: String,
    pub table_name: String,
    pub record_id: String,
    pub snapshot: String,
    pub undone: bool,
    pub created_at: i64,
}

/// One changed field in a computed diff.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub from: Value,
    pub to: Value,
}

/// Record a mutation inside the caller's transaction. For deletes, an undo
/// entry holding the old snapshot is created alongside.
pub async fn record_change(
    conn: &mut SqliteConnection,
    user_name: &str,
    table_name: &str,
    record_id: &str,
    op: ChangeOp,
    old_snapshot: Option<&Value>,
    new_snapshot: Option<&Value>,
) -> AppResult<i64> {
    let now = now_millis();
    let change_id: i64 = sqlx::query_scalar(
        "INSERT INTO change_records \
         (user_name, table_name, record_id, op, old_snapshot, new_snapshot, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(user_name)
    .bind(table_name)
    .bind(record_id)
    .bind(op.as_str())
    .bind(old_snapshot.map(|v| v.to_string()))
    .bind(new_snapshot.map(|v| v.to_string()))
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    if op == ChangeOp::Delete
        && let Some(snapshot) = old_snapshot
    {
        sqlx::query(
            "INSERT INTO undo_entries \
             (change_id, user_name, table_name, record_id, snapshot, undone, created_at) \
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(change_id)
        .bind(user_name)
        .bind(table_name)
        .bind(record_id)
        .bind(snapshot.to_string())
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }

    Ok(change_id)
}

/// Change rows for one record, newest first.
pub async fn list_for_record(
    db: &Db,
    table_name: &str,
    record_id: &str,
    limit: i64,
) -> AppResult<Vec<ChangeRecord>> {
    let rows = sqlx::query_as::<_, ChangeRecord>(
        "SELECT id, user_name, table_name, record_id, op, old_snapshot, new_snapshot, created_at \
         FROM change_records WHERE table_name = ? AND record_id = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(table_name)
    .bind(record_id)
    .bind(limit.clamp(1, 500))
    .fetch_all(&db.pool)
    .await?;
    Ok(rows)
}

/// Pending (not yet undone) undo entries, newest first.
pub async fn list_undoable(db: &Db, limit: i64) -> AppResult<Vec<UndoEntry>> {
    let rows = sqlx::query_as::<_, UndoEntry>(
        "SELECT id, change_id, user_name, table_name, record_id, snapshot, undone, created_at \
         FROM undo_entries WHERE undone = 0 ORDER BY id DESC LIMIT ?",
    )
    .bind(limit.clamp(1, 500))
    .fetch_all(&db.pool)
    .await?;
    Ok(rows)
}

/// Undo a delete by reinserting the stored snapshot.
///
/// Refused when the entry was already undone or when later change records
/// exist for the same record (replaying an old snapshot over newer state
/// would lose data). When the snapshot's integer `id` collides with an
/// existing row, the reinsert retries without it so the store assigns a
/// fresh one.
pub async fn undo_delete(db: &Db, undo_id: i64) -> AppResult<UndoEntry> {
    let mut tx = db.begin().await?;

    let entry: Option<UndoEntry> = sqlx::query_as(
        "SELECT id, change_id, user_name, table_name, record_id, snapshot, undone, created_at \
         FROM undo_entries WHERE id = ?",
    )
    .bind(undo_id)
    .fetch_optional(&mut *tx)
    .await?;
    let entry = entry.ok_or_else(|| AppError::not_found(format!("Undo entry {undo_id}")))?;

    if entry.undone {
        return Err(AppError::conflict("This delete has already been undone"));
    }
    if !UNDOABLE_TABLES.contains(&entry.table_name.as_str()) {
        return Err(AppError::conflict(format!(
            "Records in {} cannot be restored",
            entry.table_name
        )));
    }

    let later: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM change_records WHERE table_name = ? AND record_id = ? AND id > ?",
    )
    .bind(&entry.table_name)
    .bind(&entry.record_id)
    .bind(entry.change_id)
    .fetch_one(&mut *tx)
    .await?;
    if later > 0 {
        return Err(AppError::conflict(
            "Cannot undo: the record was modified after this delete",
        ));
    }

    let snapshot: Value = serde_json::from_str(&entry.snapshot)?;
    let object = snapshot
        .as_object()
        .ok_or_else(|| AppError::internal("Undo snapshot is not an object"))?;

    let insert = reinsert_row(&mut tx, &entry.table_name, object, true).await;
    match insert {
        Ok(()) => {}
        Err(e) if e.code == crate::utils::ErrorCode::Conflict => {
            // Integer-keyed rows retry with a fresh id; natural TEXT keys
            // cannot be rewritten, so the conflict stands.
            if object.get("id").map(Value::is_i64).unwrap_or(false) {
                reinsert_row(&mut tx, &entry.table_name, object, false).await?;
            } else {
                return Err(e);
            }
        }
        Err(e) => return Err(e),
    }

    sqlx::query("UPDATE undo_entries SET undone = 1 WHERE id = ?")
        .bind(entry.id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO change_records \
         (user_name, table_name, record_id, op, old_snapshot, new_snapshot, created_at) \
         VALUES (?, ?, ?, 'create', NULL, ?, ?)",
    )
    .bind(&entry.user_name)
    .bind(&entry.table_name)
    .bind(&entry.record_id)
    .bind(&entry.snapshot)
    .bind(now_millis())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(entry)
}

/// Build and run the dynamic reinsert for a snapshot object.
async fn reinsert_row(
    conn: &mut SqliteConnection,
    table: &str,
    object: &serde_json::Map<String, Value>,
    include_id: bool,
) -> AppResult<()> {
    let columns: Vec<&String> = object
        .keys()
        .filter(|k| include_id || k.as_str() != "id")
        .collect();
    if columns.is_empty() {
        return Err(AppError::internal("Undo snapshot has no columns"));
    }

    let column_list = columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!("INSERT INTO \"{table}\" ({column_list}) VALUES ({placeholders})");

    let mut query = sqlx::query(&sql);
    for col in &columns {
        let value = &object[col.as_str()];
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b as i64),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else {
                    query.bind(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => query.bind(s.clone()),
            // Nested structures are stored as their JSON text.
            other => query.bind(other.to_string()),
        };
    }
    query.execute(conn).await?;
    Ok(())
}

// ── JSON diff ───────────────────────────────────────────────────────

/// Compute the field-level differences between two snapshots. Nested
/// objects recurse with dotted paths; arrays compare wholesale.
pub fn diff(old: &Value, new: &Value) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    diff_recursive(old, new, "", &mut changes);
    changes
}

fn diff_recursive(from: &Value, to: &Value, path: &str, changes: &mut Vec<FieldChange>) {
    match (from, to) {
        (Value::Object(from_obj), Value::Object(to_obj)) => {
            let mut keys: HashSet<&String> = from_obj.keys().collect();
            keys.extend(to_obj.keys());
            for key in keys {
                let field_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                let from_value = from_obj.get(key).cloned().unwrap_or(Value::Null);
                let to_value = to_obj.get(key).cloned().unwrap_or(Value::Null);
                diff_recursive(&from_value, &to_value, &field_path, changes);
            }
        }
        (a, b) => {
            if a != b {
                changes.push(FieldChange {
                    field: path.to_string(),
                    from: a.clone(),
                    to: b.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;
    use serde_json::json;

    #[test]
    fn diff_reports_nested_fields() {
        let old = json!({"name": "Acme", "contact": {"email": "a@acme.com"}, "lead_time_days": 7});
        let new = json!({"name": "Acme Corp", "contact": {"email": "a@acme.com"}, "lead_time_days": 14});
        let mut changes = diff(&old, &new);
        changes.sort_by(|a, b| a.field.cmp(&b.field));
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].field, "lead_time_days");
        assert_eq!(changes[1].field, "name");
        assert_eq!(changes[1].to, json!("Acme Corp"));
    }

    #[test]
    fn diff_handles_added_and_removed_keys() {
        let changes = diff(&json!({"a": 1}), &json!({"b": 2}));
        assert_eq!(changes.len(), 2);
    }

    async fn seed_vendor(db: &Db) {
        sqlx::query(
            "INSERT INTO vendors (id, name, lead_time_days, status, created_at) \
             VALUES ('V-001', 'Acme', 7, 'active', ?)",
        )
        .bind(now_millis())
        .execute(&db.pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn undo_delete_reinserts_row() {
        let (db, _dir) = test_db().await;
        seed_vendor(&db).await;

        let snapshot = json!({
            "id": "V-001", "name": "Acme", "contact": null, "email": null, "phone": null,
            "lead_time_days": 7, "status": "active", "notes": null, "created_at": now_millis()
        });

        let mut tx = db.begin().await.unwrap();
        sqlx::query("DELETE FROM vendors WHERE id = 'V-001'")
            .execute(&mut *tx)
            .await
            .unwrap();
        record_change(&mut tx, "alice", "vendors", "V-001", ChangeOp::Delete, Some(&snapshot), None)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let entries = list_undoable(&db, 10).await.unwrap();
        assert_eq!(entries.len(), 1);

        undo_delete(&db, entries[0].id).await.unwrap();
        let name: String = sqlx::query_scalar("SELECT name FROM vendors WHERE id = 'V-001'")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(name, "Acme");

        // A second undo of the same entry is refused.
        let err = undo_delete(&db, entries[0].id).await.unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn undo_refused_after_later_changes() {
        let (db, _dir) = test_db().await;
        seed_vendor(&db).await;

        let snapshot = json!({
            "id": "V-001", "name": "Acme", "contact": null, "email": null, "phone": null,
            "lead_time_days": 7, "status": "active", "notes": null, "created_at": now_millis()
        });

        let mut tx = db.begin().await.unwrap();
        sqlx::query("DELETE FROM vendors WHERE id = 'V-001'")
            .execute(&mut *tx)
            .await
            .unwrap();
        record_change(&mut tx, "alice", "vendors", "V-001", ChangeOp::Delete, Some(&snapshot), None)
            .await
            .unwrap();
        // A later mutation on the same record id (e.g. it was recreated).
        record_change(&mut tx, "bob", "vendors", "V-001", ChangeOp::Create, None, Some(&snapshot))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let entries = list_undoable(&db, 10).await.unwrap();
        let err = undo_delete(&db, entries[0].id).await.unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::Conflict);
        assert!(err.message.contains("modified after"));
    }
}
