use core_types::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("The API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to deserialize the API response: {0}")]
    Deserialization(String),

    #[error("Invalid data format from API: {0}")]
    InvalidData(String),
}

/// Why a source as a whole could not deliver a metric map for a date.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Source produced an invalid metric key: {0}")]
    InvalidKey(#[from] CoreError),
}
