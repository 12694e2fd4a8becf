use crate::error::{ApiError, FetchError};
use crate::http::{decimal_from_json, send_json};
use crate::responses::{GoogleAdsSearchResponse, TokenResponse};
use crate::{SourceFetcher, http_client, value_or_unavailable};
use async_trait::async_trait;
use chrono::NaiveDate;
use configuration::GoogleAdsConfig;
use core_types::{MetricKey, MetricMap, RetryPolicy};
use rust_decimal::Decimal;
use serde_json::json;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const API_BASE: &str = "https://googleads.googleapis.com/v18";
const MICROS_PER_UNIT: i64 = 1_000_000;

/// Daily spend and conversion value per Google Ads customer, over the REST interface.
pub struct GoogleAdsClient {
    developer_token: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    customer_ids: Vec<String>,
    login_customer_id: Option<String>,
    token_url: String,
    api_base: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AdsDay {
    pub spend: Decimal,
    pub conversion_value: Decimal,
}

impl GoogleAdsClient {
    pub fn new(config: &GoogleAdsConfig, retry: RetryPolicy) -> Result<Self, ApiError> {
        Ok(Self {
            developer_token: config.developer_token.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_token: config.refresh_token.clone(),
            customer_ids: config.customer_ids.iter().map(|c| normalize_customer_id(c)).collect(),
            login_customer_id: config.login_customer_id.as_deref().map(normalize_customer_id),
            token_url: TOKEN_URL.to_string(),
            api_base: API_BASE.to_string(),
            retry,
            client: http_client()?,
        })
    }

    /// Points the client at other OAuth and API hosts.
    pub fn with_endpoints(mut self, token_url: impl Into<String>, api_base: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Exchanges the refresh token for a short-lived access token.
    pub async fn access_token(&self) -> Result<String, ApiError> {
        let token: TokenResponse = send_json(&self.retry, "google_ads.token", || {
            self.client.post(&self.token_url).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
        })
        .await?;
        Ok(token.access_token)
    }

    /// Runs the daily GAQL query for one customer and sums every returned row.
    pub async fn customer_day(
        &self,
        access_token: &str,
        customer_id: &str,
        date: NaiveDate,
    ) -> Result<AdsDay, ApiError> {
        let url = format!("{}/customers/{}/googleAds:search", self.api_base, customer_id);
        let query = daily_query(date);
        let mut day = AdsDay::default();
        let mut page_token: Option<String> = None;

        loop {
            let mut body = json!({ "query": query });
            if let Some(token) = &page_token {
                body["pageToken"] = json!(token);
            }
            let page: GoogleAdsSearchResponse = send_json(&self.retry, "google_ads.search", || {
                let request = self
                    .client
                    .post(&url)
                    .bearer_auth(access_token)
                    .header("developer-token", &self.developer_token)
                    .json(&body);
                match &self.login_customer_id {
                    Some(login) => request.header("login-customer-id", login),
                    None => request,
                }
            })
            .await?;

            for row in &page.results {
                if let Some(micros) = decimal_from_json(&row.metrics.cost_micros) {
                    day.spend += micros / Decimal::from(MICROS_PER_UNIT);
                }
                if let Some(value) = decimal_from_json(&row.metrics.conversions_value) {
                    day.conversion_value += value;
                }
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(day)
    }

    fn keys_for(customer_id: &str) -> Result<(MetricKey, MetricKey), FetchError> {
        Ok((
            MetricKey::from_parts(&["google_ads", customer_id, "spend_eur"])?,
            MetricKey::from_parts(&["google_ads", customer_id, "conversion_value_eur"])?,
        ))
    }
}

fn normalize_customer_id(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

fn daily_query(date: NaiveDate) -> String {
    format!(
        "SELECT segments.date, metrics.cost_micros, metrics.conversions_value \
         FROM customer WHERE segments.date BETWEEN '{date}' AND '{date}'"
    )
}

#[async_trait]
impl SourceFetcher for GoogleAdsClient {
    fn name(&self) -> &str {
        "google_ads"
    }

    fn key_prefix(&self) -> String {
        "google_ads_".to_string()
    }

    fn known_keys(&self) -> Vec<MetricKey> {
        self.customer_ids
            .iter()
            .filter_map(|cid| Self::keys_for(cid).ok())
            .flat_map(|(spend, value)| [spend, value])
            .collect()
    }

    async fn fetch(&self, date: NaiveDate) -> Result<MetricMap, FetchError> {
        let mut metrics = MetricMap::new();
        if self.customer_ids.is_empty() {
            return Ok(metrics);
        }
        let access_token = self.access_token().await?;

        for customer_id in &self.customer_ids {
            let (spend_key, value_key) = Self::keys_for(customer_id)?;
            let day = self.customer_day(&access_token, customer_id, date).await;
            let spend = day.as_ref().map(|d| d.spend).map_err(clone_error);
            let value = day.map(|d| d.conversion_value);
            metrics.insert(spend_key.clone(), value_or_unavailable(spend, self.name(), &spend_key));
            metrics.insert(value_key.clone(), value_or_unavailable(value, self.name(), &value_key));
        }
        Ok(metrics)
    }
}

/// `reqwest::Error` is not `Clone`; the second copy keeps the message only.
fn clone_error(e: &ApiError) -> ApiError {
    ApiError::InvalidData(e.to_string())
}
