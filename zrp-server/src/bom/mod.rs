//! Bill-of-materials graph.
//!
//! Directed edges `parent_ipn → child_ipn × qty_per`. The graph must stay
//! acyclic; every edit re-checks reachability. Explosion and shortage
//! computation are pure functions over loaded rows so they can be tested
//! without a store.

use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::{HashMap, HashSet};

use crate::db::Db;
use crate::utils::{AppError, AppResult};

/// IPN prefix marking an assembly (a part that may own BOM edges).
pub const ASSEMBLY_PREFIX: &str = "ASY";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BomEdge {
    pub id: i64,
    pub parent_ipn: String,
    pub child_ipn: String,
    pub qty_per: i64,
    pub ref_des: Option<String>,
}

/// One exploded requirement line for a build.
#[derive(Debug, Clone, Serialize)]
pub struct Requirement {
    pub ipn: String,
    pub qty_per: i64,
    pub required: i64,
    pub ref_des: Option<String>,
}

/// Shortage analysis line for a work order.
#[derive(Debug, Clone, Serialize)]
pub struct ShortageLine {
    pub ipn: String,
    pub required: i64,
    pub on_hand: i64,
    pub qty_reserved: i64,
    pub shortage: i64,
    pub status: &'static str,
}

// ── Pure graph functions ────────────────────────────────────────────

/// Depth-first reachability over `(parent, child)` pairs.
pub fn has_path(edges: &[(String, String)], from: &str, to: &str) -> bool {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (parent, child) in edges {
        adjacency.entry(parent.as_str()).or_default().push(child.as_str());
    }

    let mut stack = vec![from];
    let mut seen = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if !seen.insert(node) {
            continue;
        }
        if let Some(children) = adjacency.get(node) {
            stack.extend(children.iter().copied());
        }
    }
    false
}

/// Scale the direct children of an assembly by the build quantity.
pub fn explode(edges: &[BomEdge], build_qty: i64) -> Vec<Requirement> {
    edges
        .iter()
        .map(|e| Requirement {
            ipn: e.child_ipn.clone(),
            qty_per: e.qty_per,
            required: e.qty_per * build_qty,
            ref_des: e.ref_des.clone(),
        })
        .collect()
}

/// Shortage line against available stock (`on_hand - reserved`), with the
/// status tag used by the work-order shortage view.
pub fn shortage_line(ipn: &str, required: i64, on_hand: i64, qty_reserved: i64) -> ShortageLine {
    let available = on_hand - qty_reserved;
    let shortage = (required - available).max(0);
    let status = if shortage > 0 {
        "shortage"
    } else if on_hand < required + required / 2 {
        "low"
    } else {
        "ok"
    };
    ShortageLine {
        ipn: ipn.to_string(),
        required,
        on_hand,
        qty_reserved,
        shortage,
        status,
    }
}

// ── Edge maintenance ────────────────────────────────────────────────

async fn all_pairs(conn: &mut SqliteConnection) -> AppResult<Vec<(String, String)>> {
    let pairs: Vec<(String, String)> =
        sqlx::query_as("SELECT parent_ipn, child_ipn FROM bom_edges")
            .fetch_all(conn)
            .await?;
    Ok(pairs)
}

/// Add an edge. Rejects non-assembly parents, self-reference, duplicates
/// (UNIQUE constraint) and any edge that would close a cycle.
pub async fn add_edge(
    conn: &mut SqliteConnection,
    parent_ipn: &str,
    child_ipn: &str,
    qty_per: i64,
    ref_des: Option<&str>,
) -> AppResult<BomEdge> {
    if !parent_ipn.starts_with(ASSEMBLY_PREFIX) {
        return Err(AppError::validation(format!(
            "BOM parent must be an assembly ({ASSEMBLY_PREFIX}-prefixed IPN), got {parent_ipn}"
        )));
    }
    if qty_per <= 0 {
        return Err(AppError::validation("qty_per must be positive"));
    }
    if parent_ipn == child_ipn {
        return Err(AppError::conflict("A part cannot contain itself"));
    }

    let pairs = all_pairs(&mut *conn).await?;
    if has_path(&pairs, child_ipn, parent_ipn) {
        return Err(AppError::conflict(format!(
            "Adding {parent_ipn} -> {child_ipn} would create a BOM cycle"
        )));
    }

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO bom_edges (parent_ipn, child_ipn, qty_per, ref_des) \
         VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(parent_ipn)
    .bind(child_ipn)
    .bind(qty_per)
    .bind(ref_des)
    .fetch_one(&mut *conn)
    .await?;

    Ok(BomEdge {
        id,
        parent_ipn: parent_ipn.to_string(),
        child_ipn: child_ipn.to_string(),
        qty_per,
        ref_des: ref_des.map(|s| s.to_string()),
    })
}

pub async fn update_edge(
    conn: &mut SqliteConnection,
    edge_id: i64,
    qty_per: i64,
    ref_des: Option<&str>,
) -> AppResult<BomEdge> {
    if qty_per <= 0 {
        return Err(AppError::validation("qty_per must be positive"));
    }
    let edge: Option<BomEdge> = sqlx::query_as(
        "UPDATE bom_edges SET qty_per = ?, ref_des = ? WHERE id = ? \
         RETURNING id, parent_ipn, child_ipn, qty_per, ref_des",
    )
    .bind(qty_per)
    .bind(ref_des)
    .bind(edge_id)
    .fetch_optional(conn)
    .await?;
    edge.ok_or_else(|| AppError::not_found(format!("BOM edge {edge_id}")))
}

pub async fn delete_edge(conn: &mut SqliteConnection, edge_id: i64) -> AppResult<BomEdge> {
    let edge: Option<BomEdge> = sqlx::query_as(
        "DELETE FROM bom_edges WHERE id = ? \
         RETURNING id, parent_ipn, child_ipn, qty_per, ref_des",
    )
    .bind(edge_id)
    .fetch_optional(conn)
    .await?;
    edge.ok_or_else(|| AppError::not_found(format!("BOM edge {edge_id}")))
}

// ── Reads ───────────────────────────────────────────────────────────

/// Direct children of an assembly, ordered by child IPN (the canonical
/// lock order for multi-row inventory work).
pub async fn children_of(conn: &mut SqliteConnection, parent_ipn: &str) -> AppResult<Vec<BomEdge>> {
    let edges = sqlx::query_as::<_, BomEdge>(
        "SELECT id, parent_ipn, child_ipn, qty_per, ref_des \
         FROM bom_edges WHERE parent_ipn = ? ORDER BY child_ipn",
    )
    .bind(parent_ipn)
    .fetch_all(conn)
    .await?;
    Ok(edges)
}

pub async fn where_used(db: &Db, child_ipn: &str) -> AppResult<Vec<BomEdge>> {
    let edges = sqlx::query_as::<_, BomEdge>(
        "SELECT id, parent_ipn, child_ipn, qty_per, ref_des \
         FROM bom_edges WHERE child_ipn = ? ORDER BY parent_ipn",
    )
    .bind(child_ipn)
    .fetch_all(&db.pool)
    .await?;
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect()
    }

    #[test]
    fn path_detection() {
        let edges = pairs(&[("ASY-001", "ASY-002"), ("ASY-002", "RES-001")]);
        assert!(has_path(&edges, "ASY-001", "RES-001"));
        assert!(has_path(&edges, "ASY-002", "RES-001"));
        assert!(!has_path(&edges, "RES-001", "ASY-001"));
    }

    #[test]
    fn path_detection_handles_diamonds() {
        // Two routes to the same leaf must not loop the search.
        let edges = pairs(&[
            ("ASY-001", "ASY-002"),
            ("ASY-001", "ASY-003"),
            ("ASY-002", "RES-001"),
            ("ASY-003", "RES-001"),
        ]);
        assert!(has_path(&edges, "ASY-001", "RES-001"));
        assert!(!has_path(&edges, "RES-001", "ASY-003"));
    }

    #[test]
    fn shortage_status_tags() {
        // Plenty of stock.
        assert_eq!(shortage_line("RES-001", 100, 200, 0).status, "ok");
        // Enough, but under the 1.5x comfort margin.
        let line = shortage_line("RES-001", 100, 120, 0);
        assert_eq!(line.status, "low");
        assert_eq!(line.shortage, 0);
        // Reserved stock is not available.
        let line = shortage_line("RES-001", 100, 120, 50);
        assert_eq!(line.status, "shortage");
        assert_eq!(line.shortage, 30);
    }

    #[tokio::test]
    async fn add_edge_rejects_cycles() {
        let (db, _dir) = test_db().await;
        let mut tx = db.begin().await.unwrap();

        add_edge(&mut tx, "ASY-001", "ASY-002", 1, None).await.unwrap();
        add_edge(&mut tx, "ASY-002", "RES-001", 4, Some("R1-R4")).await.unwrap();

        // RES-001 already reaches nothing, but ASY-002 -> ASY-001 closes a loop.
        let err = add_edge(&mut tx, "ASY-002", "ASY-001", 1, None).await.unwrap_err();
        assert_eq!(err.code, crate::utils::ErrorCode::Conflict);

        // Self-reference.
        assert!(add_edge(&mut tx, "ASY-001", "ASY-001", 1, None).await.is_err());

        // Non-assembly parent.
        assert!(add_edge(&mut tx, "RES-001", "CAP-001", 1, None).await.is_err());

        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn explode_scales_children() {
        let (db, _dir) = test_db().await;
        let mut tx = db.begin().await.unwrap();
        add_edge(&mut tx, "ASY-001", "RES-001", 10, None).await.unwrap();
        add_edge(&mut tx, "ASY-001", "CAP-001", 2, None).await.unwrap();

        let edges = children_of(&mut tx, "ASY-001").await.unwrap();
        let reqs = explode(&edges, 10);
        assert_eq!(reqs.len(), 2);
        // Ordered by child IPN.
        assert_eq!(reqs[0].ipn, "CAP-001");
        assert_eq!(reqs[0].required, 20);
        assert_eq!(reqs[1].ipn, "RES-001");
        assert_eq!(reqs[1].required, 100);
        tx.commit().await.unwrap();
    }
}
