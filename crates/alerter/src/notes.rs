use crate::error::AlerterError;
use crate::NoteGenerator;
use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::{Flag, FlaggedMetric, RetryPolicy};
use reqwest::Client;
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://api.openai.com/v1";
const SYSTEM_PROMPT: &str = "You are an analytical assistant. \
    Write short, clear bullet points about notable business anomalies.";
const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 150;

/// One line per flagged metric: `- metric: well above usual (value V, baseline B).`
pub fn describe(flagged: &[FlaggedMetric]) -> String {
    flagged
        .iter()
        .map(|f| {
            let direction = match f.flag {
                Flag::Green => "well above",
                _ => "well below",
            };
            format!(
                "- {}: {} usual (value {:.2}, baseline {:.2}).",
                f.metric, direction, f.value, f.baseline
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds the notes locally without any external call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainNoteGenerator;

#[async_trait]
impl NoteGenerator for PlainNoteGenerator {
    async fn generate(&self, _date: NaiveDate, flagged: &[FlaggedMetric]) -> Result<String, AlerterError> {
        Ok(describe(flagged))
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Asks an OpenAI chat model to condense the flagged metrics into 1-3 bullets.
pub struct OpenAiNoteGenerator {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiNoteGenerator {
    pub fn new(api_key: &str, model: &str, retry: RetryPolicy) -> Result<Self, AlerterError> {
        if api_key.trim().is_empty() {
            return Err(AlerterError::NotConfigured("openai_api_key"));
        }
        Ok(Self {
            client: Client::new(),
            api_base: API_BASE.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            retry,
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// The user message sent for one date.
    pub fn build_prompt(date: NaiveDate, flagged: &[FlaggedMetric]) -> String {
        format!(
            "Date: {}\nWrite 1-3 concise bullet points about the following anomalies \
             (no small talk, no disclaimers):\n{}",
            date,
            describe(flagged)
        )
    }

    async fn complete(&self, prompt: &str) -> Result<String, AlerterError> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let (client, url, request, api_key) = (&self.client, &url, &request, &self.api_key);
        let response: ChatResponse = self
            .retry
            .run("openai.chat_completion", || async move {
                let response = client.post(url).bearer_auth(api_key).json(request).send().await?;
                if !response.status().is_success() {
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Failed to decode error response".to_string());
                    return Err(AlerterError::ApiError(error_text));
                }
                Ok(response.json::<ChatResponse>().await?)
            })
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(AlerterError::EmptyResponse)
    }
}

#[async_trait]
impl NoteGenerator for OpenAiNoteGenerator {
    async fn generate(&self, date: NaiveDate, flagged: &[FlaggedMetric]) -> Result<String, AlerterError> {
        if flagged.is_empty() {
            return Ok(String::new());
        }
        self.complete(&Self::build_prompt(date, flagged)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::MetricKey;
    use httpmock::prelude::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn flagged() -> Vec<FlaggedMetric> {
        vec![
            FlaggedMetric {
                metric: MetricKey::new("shop_sales_eur").unwrap(),
                value: dec!(136),
                baseline: dec!(100),
                flag: Flag::Green,
            },
            FlaggedMetric {
                metric: MetricKey::new("bank_total_balance_eur").unwrap(),
                value: dec!(64.5),
                baseline: dec!(100),
                flag: Flag::Red,
            },
        ]
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
    }

    #[tokio::test]
    async fn plain_notes_have_one_bullet_per_metric() {
        let text = PlainNoteGenerator.generate(day(), &flagged()).await.unwrap();
        assert_eq!(
            text,
            "- shop_sales_eur: well above usual (value 136.00, baseline 100.00).\n\
             - bank_total_balance_eur: well below usual (value 64.50, baseline 100.00)."
        );
    }

    #[test]
    fn prompt_names_the_date_and_every_metric() {
        let prompt = OpenAiNoteGenerator::build_prompt(day(), &flagged());
        assert!(prompt.starts_with("Date: 2024-05-02\n"));
        assert!(prompt.contains("- shop_sales_eur: well above usual"));
        assert!(prompt.contains("- bank_total_balance_eur: well below usual"));
    }

    #[tokio::test]
    async fn openai_completion_is_trimmed() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("Authorization", "Bearer sk-test")
                    .json_body_partial(r#"{ "model": "gpt-4o-mini", "max_tokens": 150 }"#)
                    .body_contains("shop_sales_eur");
                then.status(200).json_body(json!({
                    "choices": [{ "message": { "role": "assistant", "content": "  - Sales spiked.\n" } }]
                }));
            })
            .await;

        let notes = OpenAiNoteGenerator::new("sk-test", "gpt-4o-mini", RetryPolicy::immediate(1))
            .unwrap()
            .with_api_base(server.base_url());
        let text = notes.generate(day(), &flagged()).await.unwrap();
        assert_eq!(text, "- Sales spiked.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_completion_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let notes = OpenAiNoteGenerator::new("sk-test", "gpt-4o-mini", RetryPolicy::immediate(1))
            .unwrap()
            .with_api_base(server.base_url());
        assert!(matches!(
            notes.generate(day(), &flagged()).await,
            Err(AlerterError::EmptyResponse)
        ));
    }

    #[test]
    fn missing_key_is_not_configured() {
        assert!(matches!(
            OpenAiNoteGenerator::new(" ", "gpt-4o-mini", RetryPolicy::default()),
            Err(AlerterError::NotConfigured(_))
        ));
    }
}
