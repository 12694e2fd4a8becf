use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid metric key '{0}': {1}")]
    InvalidMetricKey(String, String),
}
