//! Change-history and undo endpoints.

use axum::extract::{Extension, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::{ClientMeta, CurrentUser};
use crate::core::ServerState;
use crate::history::{self, ChangeRecord, FieldChange, UndoEntry};
use crate::utils::{ApiResponse, AppResult, ok};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/history/{table}/{record_id}", get(record_history))
        .route("/api/v1/undo", get(list_undoable))
        .route("/api/v1/undo/{id}", post(undo))
}

/// A change row with its computed field-level diff.
#[derive(Debug, Serialize)]
struct ChangeWithDiff {
    #[serde(flatten)]
    record: ChangeRecord,
    changes: Vec<FieldChange>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

async fn record_history(
    State(state): State<ServerState>,
    Path((table, record_id)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<ApiResponse<Vec<ChangeWithDiff>>>> {
    let rows = history::list_for_record(&state.db, &table, &record_id, query.limit).await?;
    let out = rows
        .into_iter()
        .map(|record| {
            let changes = match (&record.old_snapshot, &record.new_snapshot) {
                (Some(old), Some(new)) => {
                    match (serde_json::from_str(old), serde_json::from_str(new)) {
                        (Ok(old), Ok(new)) => history::diff(&old, &new),
                        _ => Vec::new(),
                    }
                }
                _ => Vec::new(),
            };
            ChangeWithDiff { record, changes }
        })
        .collect();
    Ok(ok(out))
}

async fn list_undoable(
    State(state): State<ServerState>,
) -> AppResult<Json<ApiResponse<Vec<UndoEntry>>>> {
    Ok(ok(history::list_undoable(&state.db, 100).await?))
}

async fn undo(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<UndoEntry>>> {
    let entry = history::undo_delete(&state.db, id).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "undo",
        &entry.table_name.clone(),
        &entry.record_id,
        format!("Restored deleted {} {}", entry.table_name, entry.record_id),
    );
    Ok(ok(entry))
}
