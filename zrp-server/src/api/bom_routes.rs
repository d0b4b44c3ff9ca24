//! BOM endpoints.

use axum::extract::{Extension, Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::{ClientMeta, CurrentUser};
use crate::bom;
use crate::core::ServerState;
use crate::history::{self, ChangeOp};
use crate::utils::{ApiResponse, AppResult, created, ok};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/bom", post(add_edge))
        .route("/api/v1/bom/{parent_ipn}", get(children))
        .route("/api/v1/bom/where-used/{child_ipn}", get(where_used))
        .route("/api/v1/bom/edges/{edge_id}", put(update_edge).delete(delete_edge))
}

async fn children(
    State(state): State<ServerState>,
    Path(parent_ipn): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<bom::BomEdge>>>> {
    let mut conn = state.db.pool.acquire().await?;
    Ok(ok(bom::children_of(&mut conn, &parent_ipn).await?))
}

async fn where_used(
    State(state): State<ServerState>,
    Path(child_ipn): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<bom::BomEdge>>>> {
    Ok(ok(bom::where_used(&state.db, &child_ipn).await?))
}

#[derive(Debug, Deserialize)]
struct AddEdgeBody {
    parent_ipn: String,
    child_ipn: String,
    qty_per: i64,
    ref_des: Option<String>,
}

async fn add_edge(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(body): Json<AddEdgeBody>,
) -> AppResult<axum::response::Response> {
    let mut tx = state.db.begin().await?;
    let edge = bom::add_edge(
        &mut tx,
        &body.parent_ipn,
        &body.child_ipn,
        body.qty_per,
        body.ref_des.as_deref(),
    )
    .await?;
    history::record_change(
        &mut tx,
        &user.username,
        "bom_edges",
        &edge.id.to_string(),
        ChangeOp::Create,
        None,
        Some(&serde_json::to_value(&edge)?),
    )
    .await?;
    tx.commit().await?;

    state.audit.log(
        Some(&user),
        Some(&meta),
        "create",
        "bom",
        &body.parent_ipn,
        format!("Added {} x{} to {}", edge.child_ipn, edge.qty_per, edge.parent_ipn),
    );
    Ok(created(edge))
}

#[derive(Debug, Deserialize)]
struct UpdateEdgeBody {
    qty_per: i64,
    ref_des: Option<String>,
}

async fn update_edge(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(edge_id): Path<i64>,
    Json(body): Json<UpdateEdgeBody>,
) -> AppResult<Json<ApiResponse<bom::BomEdge>>> {
    let mut tx = state.db.begin().await?;
    let edge = bom::update_edge(&mut tx, edge_id, body.qty_per, body.ref_des.as_deref()).await?;
    history::record_change(
        &mut tx,
        &user.username,
        "bom_edges",
        &edge_id.to_string(),
        ChangeOp::Update,
        None,
        Some(&serde_json::to_value(&edge)?),
    )
    .await?;
    tx.commit().await?;

    state.audit.log(
        Some(&user),
        Some(&meta),
        "update",
        "bom",
        &edge.parent_ipn,
        format!("Updated {} qty to {}", edge.child_ipn, edge.qty_per),
    );
    Ok(ok(edge))
}

async fn delete_edge(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(edge_id): Path<i64>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let mut tx = state.db.begin().await?;
    let edge = bom::delete_edge(&mut tx, edge_id).await?;
    history::record_change(
        &mut tx,
        &user.username,
        "bom_edges",
        &edge_id.to_string(),
        ChangeOp::Delete,
        Some(&serde_json::to_value(&edge)?),
        None,
    )
    .await?;
    tx.commit().await?;

    state.audit.log(
        Some(&user),
        Some(&meta),
        "delete",
        "bom",
        &edge.parent_ipn,
        format!("Removed {} from {}", edge.child_ipn, edge.parent_ipn),
    );
    Ok(ok(serde_json::json!({"deleted": true})))
}
