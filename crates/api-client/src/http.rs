use crate::error::ApiError;
use core_types::RetryPolicy;
use reqwest::{RequestBuilder, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::str::FromStr;

/// Sends the request built by `build` under `retry` and decodes a JSON body.
///
/// `build` is called once per attempt since a `RequestBuilder` is consumed by `send`.
pub(crate) async fn send_json<T, F>(retry: &RetryPolicy, label: &str, build: F) -> Result<T, ApiError>
where
    T: DeserializeOwned,
    F: Fn() -> RequestBuilder + Sync,
{
    let build = &build;
    retry
        .run(label, || async move {
            let response = build().send().await?;
            decode(response).await
        })
        .await
}

pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let text = response.text().await?;

    if status.is_success() {
        serde_json::from_str::<T>(&text).map_err(|e| {
            ApiError::Deserialization(format!("{}. Original text: {}", e, text))
        })
    } else {
        Err(ApiError::Status {
            status: status.as_u16(),
            body: text,
        })
    }
}

/// Reads a JSON number or numeric string as a decimal.
pub(crate) fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Reads a JSON id that may be a string or a number.
pub(crate) fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
