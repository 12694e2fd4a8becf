use crate::error::AlerterError;
use crate::Notifier;
use async_trait::async_trait;
use configuration::TelegramConfig;
use core_types::{RetryPolicy, RunSummary};
use reqwest::Client;
use serde::Serialize;

const API_BASE: &str = "https://api.telegram.org";
/// Telegram rejects messages longer than 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4000;

/// The JSON payload for the Telegram `sendMessage` endpoint.
#[derive(Debug, Serialize)]
struct SendMessagePayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str, // To allow for formatting like bold, italics etc.
}

/// A client for sending messages to the Telegram Bot API.
pub struct TelegramAlerter {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
    retry: RetryPolicy,
}

impl TelegramAlerter {
    /// Creates a new `TelegramAlerter`.
    ///
    /// Returns `None` if the token or chat_id is missing from the configuration,
    /// allowing the system to gracefully disable alerting.
    pub fn new(config: &TelegramConfig, retry: RetryPolicy) -> Option<Self> {
        if config.token.is_empty() || config.chat_id.is_empty() {
            tracing::warn!("Telegram alerter is not configured (missing token or chat_id).");
            return None;
        }
        Some(Self {
            client: Client::new(),
            api_base: API_BASE.to_string(),
            token: config.token.clone(),
            chat_id: config.chat_id.clone(),
            retry,
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Sends a text message to the configured Telegram chat.
    pub async fn send_message(&self, message: &str) -> Result<(), AlerterError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);

        let payload = SendMessagePayload {
            chat_id: &self.chat_id,
            text: message,
            parse_mode: "MarkdownV2", // Use Markdown for rich formatting
        };

        let (client, url, payload) = (&self.client, &url, &payload);
        self.retry
            .run("telegram.send_message", || async move {
                let response = client.post(url).json(payload).send().await?;
                if !response.status().is_success() {
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Failed to decode error response".to_string());
                    return Err(AlerterError::ApiError(error_text));
                }
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl Notifier for TelegramAlerter {
    async fn send(&self, summary: &RunSummary) -> Result<(), AlerterError> {
        for chunk in render_messages(summary) {
            self.send_message(&chunk).await?;
        }
        tracing::info!(anomalies = summary.flagged_count(), "Run summary sent to Telegram.");
        Ok(())
    }
}

/// Renders the summary as MarkdownV2 messages, split on line boundaries.
fn render_messages(summary: &RunSummary) -> Vec<String> {
    let header = format!(
        "🚨 *KPI anomalies: {}*",
        escape_markdown(&summary.flagged_count().to_string())
    );
    let mut messages = Vec::new();
    let mut current = header;
    for line in summary.render_text().lines() {
        let line = escape_markdown(line);
        if current.chars().count() + line.chars().count() + 1 > MAX_MESSAGE_CHARS {
            messages.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&line);
    }
    messages.push(current);
    messages
}

/// A helper function to escape characters that have special meaning in Telegram's MarkdownV2.
fn escape_markdown(text: &str) -> String {
    let special_chars = r"\_*[]()~`>#+-=|{}.!";
    special_chars.chars().fold(text.to_string(), |s, c| s.replace(c, &format!("\\{}", c)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use core_types::{DateReport, DateStatus, Flag, FlaggedMetric, MetricKey};
    use httpmock::prelude::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use uuid::Uuid;

    fn summary(flagged: usize) -> RunSummary {
        let mut summary = RunSummary::new(Uuid::nil());
        summary.dates.push(DateReport {
            date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            status: DateStatus::Recorded,
            flagged: (0..flagged)
                .map(|i| FlaggedMetric {
                    metric: MetricKey::new(format!("metric_{i}_eur")).unwrap(),
                    value: dec!(75),
                    baseline: dec!(50),
                    flag: Flag::Green,
                })
                .collect(),
            note: None,
            unavailable_sources: vec![],
        });
        summary
    }

    #[test]
    fn escapes_markdown_specials() {
        assert_eq!(escape_markdown("a_b (1.5)!"), r"a\_b \(1\.5\)\!");
        assert_eq!(escape_markdown(r"c:\x"), r"c:\\x");
    }

    #[test]
    fn long_summaries_are_split_on_lines() {
        let messages = render_messages(&summary(200));
        assert!(messages.len() > 1);
        assert!(messages.iter().all(|m| m.chars().count() <= MAX_MESSAGE_CHARS));
        assert!(messages[0].starts_with("🚨 *KPI anomalies: 200*"));
        assert!(messages.last().unwrap().contains(r"metric\_199\_eur"));
    }

    #[tokio::test]
    async fn sends_the_rendered_summary() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/botT0KEN/sendMessage")
                    .json_body_partial(r#"{ "chat_id": "42", "parse_mode": "MarkdownV2" }"#)
                    .body_contains(r"green metric\\_0\\_eur: 75\\.00");
                then.status(200).json_body(json!({ "ok": true }));
            })
            .await;

        let config = TelegramConfig { token: "T0KEN".into(), chat_id: "42".into() };
        let alerter = TelegramAlerter::new(&config, RetryPolicy::immediate(1))
            .unwrap()
            .with_api_base(server.base_url());
        alerter.send(&summary(1)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn api_errors_surface_after_retries() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/botT0KEN/sendMessage");
                then.status(400).body(r#"{"ok":false,"description":"Bad Request"}"#);
            })
            .await;

        let config = TelegramConfig { token: "T0KEN".into(), chat_id: "42".into() };
        let alerter = TelegramAlerter::new(&config, RetryPolicy::immediate(2))
            .unwrap()
            .with_api_base(server.base_url());
        let err = alerter.send(&summary(1)).await.unwrap_err();
        assert!(matches!(err, AlerterError::ApiError(body) if body.contains("Bad Request")));
        mock.assert_hits_async(2).await;
    }

    #[test]
    fn missing_credentials_disable_the_alerter() {
        let config = TelegramConfig { token: String::new(), chat_id: "42".into() };
        assert!(TelegramAlerter::new(&config, RetryPolicy::default()).is_none());
    }
}
