//! Bulk-operation result accumulation.
//!
//! Bulk endpoints iterate per item — no transaction spans items — and
//! report `{success, failed, errors[]}`.

use serde::Serialize;

#[derive(Debug, Default, Serialize)]
pub struct BulkOutcome {
    pub success: i64,
    pub failed: i64,
    pub errors: Vec<String>,
}

impl BulkOutcome {
    pub fn ok(&mut self) {
        self.success += 1;
    }

    pub fn fail(&mut self, id: &str, error: impl std::fmt::Display) {
        self.failed += 1;
        self.errors.push(format!("{id}: {error}"));
    }
}
