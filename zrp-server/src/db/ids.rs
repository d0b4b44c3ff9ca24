//! Human-readable identifier allocation.
//!
//! One persistent counter per family (`PO-0001`, `ECO-2026-001`, …).
//! Year-scoped families restart their counter on the year boundary.
//! Allocation happens inside the caller's transaction, so a rolled-back
//! insert releases the number — uniqueness is guaranteed, gap-free
//! monotonicity is not.

use crate::utils::{AppResult, time};
use sqlx::SqliteConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdFamily {
    Vendor,
    PurchaseOrder,
    Rfq,
    Quote,
    WorkOrder,
    Eco,
    Ncr,
    Capa,
    Rma,
}

impl IdFamily {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Vendor => "V",
            Self::PurchaseOrder => "PO",
            Self::Rfq => "RFQ",
            Self::Quote => "Q",
            Self::WorkOrder => "WO",
            Self::Eco => "ECO",
            Self::Ncr => "NCR",
            Self::Capa => "CAPA",
            Self::Rma => "RMA",
        }
    }

    fn width(&self) -> usize {
        match self {
            Self::Vendor | Self::Eco | Self::Ncr | Self::Capa | Self::Rma => 3,
            Self::PurchaseOrder | Self::Rfq | Self::Quote | Self::WorkOrder => 4,
        }
    }

    fn year_scoped(&self) -> bool {
        matches!(
            self,
            Self::WorkOrder | Self::Eco | Self::Ncr | Self::Capa | Self::Rma
        )
    }
}

/// Allocate the next identifier for `family` inside the caller's
/// transaction.
pub async fn next_id(conn: &mut SqliteConnection, family: IdFamily) -> AppResult<String> {
    let year = if family.year_scoped() {
        time::current_year()
    } else {
        0
    };

    let value: i64 = sqlx::query_scalar(
        "INSERT INTO id_sequences (family, year, next_value) VALUES (?, ?, 1) \
         ON CONFLICT (family, year) DO UPDATE SET next_value = next_value + 1 \
         RETURNING next_value",
    )
    .bind(family.prefix())
    .bind(year)
    .fetch_one(&mut *conn)
    .await?;

    let prefix = family.prefix();
    let width = family.width();
    let id = if family.year_scoped() {
        format!("{prefix}-{year}-{value:0width$}")
    } else {
        format!("{prefix}-{value:0width$}")
    };
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    #[tokio::test]
    async fn sequences_are_per_family() {
        let (db, _dir) = test_db().await;
        let mut tx = db.begin().await.unwrap();

        assert_eq!(next_id(&mut tx, IdFamily::PurchaseOrder).await.unwrap(), "PO-0001");
        assert_eq!(next_id(&mut tx, IdFamily::PurchaseOrder).await.unwrap(), "PO-0002");
        assert_eq!(next_id(&mut tx, IdFamily::Vendor).await.unwrap(), "V-001");
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        assert_eq!(next_id(&mut tx, IdFamily::PurchaseOrder).await.unwrap(), "PO-0003");
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn year_scoped_format() {
        let (db, _dir) = test_db().await;
        let mut tx = db.begin().await.unwrap();
        let id = next_id(&mut tx, IdFamily::Eco).await.unwrap();
        let year = crate::utils::time::current_year();
        assert_eq!(id, format!("ECO-{year}-001"));
        let id = next_id(&mut tx, IdFamily::WorkOrder).await.unwrap();
        assert_eq!(id, format!("WO-{year}-0001"));
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn rollback_releases_number() {
        let (db, _dir) = test_db().await;

        let mut tx = db.begin().await.unwrap();
        assert_eq!(next_id(&mut tx, IdFamily::Rfq).await.unwrap(), "RFQ-0001");
        tx.rollback().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        // The rolled-back allocation is reused; uniqueness holds.
        assert_eq!(next_id(&mut tx, IdFamily::Rfq).await.unwrap(), "RFQ-0001");
        tx.commit().await.unwrap();
    }
}
