use thiserror::Error;

/// A failure of the storage behind the ledger, after the transport's own retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Table backend failure: {0}")]
    Backend(String),

    #[error("Another run currently holds the ledger.")]
    Locked,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Table transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Ledger header is corrupt: {0}")]
    CorruptSchema(String),

    #[error("Column '{0}' is not part of the schema; reconcile it before writing.")]
    UnknownColumn(String),
}
