//! # KPI Harvester Core Types
//!
//! The shared vocabulary of the workspace: metric keys and values, anomaly flags,
//! per-date and per-run reports, Berlin calendar helpers and the retry policy used
//! at every external boundary. This crate has no knowledge of storage or vendors.

pub mod calendar;
pub mod enums;
pub mod error;
pub mod metric;
pub mod retry;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::Flag;
pub use error::CoreError;
pub use metric::{MetricKey, MetricMap, MetricValue, DATE_COLUMN, NOTES_COLUMN, UNAVAILABLE_TEXT};
pub use retry::RetryPolicy;
pub use structs::{DateReport, DateStatus, FlaggedMetric, RunSummary};
