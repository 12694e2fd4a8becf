use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlerterError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("The API returned an error: {0}")]
    ApiError(String),

    #[error("The API returned no usable text.")]
    EmptyResponse,

    #[error("Alerter is not configured. Missing {0}.")]
    NotConfigured(&'static str),
}
