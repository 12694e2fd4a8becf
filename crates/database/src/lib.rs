//! # KPI Harvester Database Crate
//!
//! PostgreSQL storage for the ledger.
//!
//! ## Architectural Principles
//!
//! - **Adapter:** This crate implements the `ledger::TableTransport` contract and
//!   hides every SQL statement behind it. The ledger logic never sees a query.
//! - **Key-addressed cells:** The table is stored as header, rows and cells, with
//!   cells keyed by `(row, column_key)`. Adding a column is a header rewrite only.
//! - **Retried & single-writer:** Every statement runs under the configured
//!   `RetryPolicy`, and a session advisory lock rejects a second concurrent run.
//!
//! ## Public API
//!
//! - `connect` / `run_migrations`: pool setup and schema creation.
//! - `PgTable`: the `TableTransport` implementation.
//! - `DbError`: the specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod table;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use table::PgTable;
