use thiserror::Error;

/// Failures that abort a whole run. Everything narrower is contained per date
/// or per metric and ends up in the run summary instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Could not claim the ledger for this run: {0}")]
    Lock(#[source] ledger::TransportError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}
