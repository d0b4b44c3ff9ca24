//! ZRP — single-binary ERP server for hardware-electronics manufacturing.
//!
//! # Architecture
//!
//! ```text
//! zrp-server/src/
//! ├── core/          # config, shared state, server lifecycle, background tasks
//! ├── utils/         # error taxonomy, response envelope, validation, time
//! ├── db/            # SQLite pool (WAL), migrations, ID sequences
//! ├── audit/         # append-only audit log (channel-fed worker)
//! ├── history/       # change records + undo
//! ├── auth/          # sessions, API keys, role gate, rate limiting
//! ├── inventory/     # stock ledger (single entry point for stock change)
//! ├── bom/           # BOM graph: cycle check, explosion, shortages
//! ├── procurement/   # PO lifecycle, receiving + inspection, suggestions
//! ├── rfq/           # RFQ state machine, quotes, awards
//! ├── workorders/    # kitting, completion, bulk operations
//! ├── quality/       # NCR / ECO / CAPA state machines
//! ├── rma/           # customer returns
//! ├── events/        # bus, notifications, scanner, presence, mailer, SSE
//! └── api/           # HTTP surface (axum routers + middleware)
//! ```
//!
//! Every mutation runs in one SQLite transaction, records change history,
//! writes a best-effort audit row, and may emit typed events that
//! background subscribers consume after commit.

pub mod api;
pub mod audit;
pub mod auth;
pub mod bom;
pub mod core;
pub mod db;
pub mod events;
pub mod history;
pub mod inventory;
pub mod procurement;
pub mod quality;
pub mod rfq;
pub mod rma;
pub mod utils;
pub mod workorders;

pub use crate::core::{Config, Server, ServerState};
pub use crate::db::Db;
pub use crate::utils::{AppError, AppResult, ErrorCode};
