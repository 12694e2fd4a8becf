//! # KPI Harvester Engine
//!
//! The run orchestrator and everything around it: the backfill window, the
//! daily scheduler and a read-only baseline inspection used by the CLI.

pub mod error;
pub mod inspect;
pub mod orchestrator;
pub mod scheduler;
pub mod window;

pub use error::EngineError;
pub use inspect::{BaselineReport, inspect_baseline};
pub use orchestrator::RunOrchestrator;
pub use scheduler::{next_run_after, run_daily};
pub use window::compute_window;
