//! # KPI Harvester Ledger
//!
//! The single source of truth for the metrics table: a date-keyed table whose
//! column set grows as new metric keys appear.
//!
//! ## Public API
//!
//! - `Ledger`: schema reconciliation, row upsert, per-column history and the
//!   presentation updates (notes, cell flags).
//! - `Schema`: the `date`, sorted metric keys, `notes` column layout.
//! - `TableTransport`: the storage contract. `MemoryTable` implements it in
//!   process; the `database` crate implements it on PostgreSQL.

pub mod error;
pub mod ledger;
pub mod memory;
pub mod schema;
pub mod transport;

pub use error::{LedgerError, TransportError};
pub use ledger::Ledger;
pub use memory::MemoryTable;
pub use schema::Schema;
pub use transport::{ColumnCell, RowHandle, TableTransport};
