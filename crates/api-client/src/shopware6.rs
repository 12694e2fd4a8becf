use crate::error::{ApiError, FetchError};
use crate::http::{decimal_from_json, decode};
use crate::responses::{ShopwareEntity, ShopwareList, TokenResponse};
use crate::{SourceFetcher, http_client, value_or_unavailable};
use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use configuration::Shopware6Config;
use core_types::calendar::day_bounds;
use core_types::metric::slug;
use core_types::{MetricKey, MetricMap, RetryPolicy};
use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::Mutex;

const PAGE_LIMIT: usize = 100;
const JSON_API: &str = "application/vnd.api+json";

/// Daily gross sales and refunds per sales channel of one Shopware 6 shop.
pub struct Shopware6Client {
    name: String,
    source_name: String,
    base_url: String,
    client_id: String,
    client_secret: String,
    tz: Tz,
    retry: RetryPolicy,
    client: reqwest::Client,
    /// Admin API bearer token, fetched lazily and dropped on a 401.
    token: Mutex<Option<String>>,
}

impl Shopware6Client {
    pub fn new(config: &Shopware6Config, retry: RetryPolicy, tz: Tz) -> Result<Self, ApiError> {
        Ok(Self {
            name: config.name.clone(),
            source_name: format!("shopware6:{}", config.name),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            tz,
            retry,
            client: http_client()?,
            token: Mutex::new(None),
        })
    }

    async fn token(&self) -> Result<String, ApiError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let response = self
            .client
            .post(format!("{}/api/oauth/token", self.base_url))
            .json(&json!({
                "grant_type": "client_credentials",
                "client_id": self.client_id,
                "client_secret": self.client_secret,
            }))
            .send()
            .await?;
        let token: TokenResponse = decode(response).await?;
        *cached = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    /// Sends an authenticated request, re-authenticating on the next attempt after a 401.
    async fn authorized<T, F>(&self, label: &str, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn(&str) -> RequestBuilder + Sync,
    {
        let build = &build;
        self.retry
            .run(label, || async move {
                let token = self.token().await?;
                let response = build(&token).header(ACCEPT, JSON_API).send().await?;
                if response.status() == StatusCode::UNAUTHORIZED {
                    self.token.lock().await.take();
                }
                decode(response).await
            })
            .await
    }

    pub async fn list_sales_channels(&self) -> Result<Vec<ShopwareEntity>, ApiError> {
        let url = format!("{}/api/sales-channel", self.base_url);
        let list: ShopwareList = self
            .authorized("shopware6.sales_channels", |token| {
                self.client.get(&url).bearer_auth(token)
            })
            .await?;
        Ok(list.data)
    }

    /// Pages through `/api/search/{entity}` until a short page comes back.
    async fn search_all(&self, entity: &str, filter: Value) -> Result<Vec<ShopwareEntity>, ApiError> {
        let url = format!("{}/api/search/{}", self.base_url, entity);
        let mut found = Vec::new();
        let mut page = 1;
        loop {
            let body = json!({ "filter": filter, "page": page, "limit": PAGE_LIMIT });
            let list: ShopwareList = self
                .authorized("shopware6.search", |token| {
                    self.client.post(&url).bearer_auth(token).json(&body)
                })
                .await?;
            let len = list.data.len();
            found.extend(list.data);
            if len < PAGE_LIMIT {
                break;
            }
            page += 1;
        }
        Ok(found)
    }

    /// Sum of `amountTotal` over orders placed in `[start, end)` on the channel.
    pub async fn gross_sales(&self, start: &str, end: &str, channel_id: &str) -> Result<Decimal, ApiError> {
        let orders = self
            .search_all(
                "order",
                json!([
                    { "type": "range", "field": "orderDateTime", "parameters": { "gte": start, "lt": end } },
                    { "type": "equals", "field": "salesChannelId", "value": channel_id },
                ]),
            )
            .await?;
        Ok(orders
            .iter()
            .filter_map(|o| o.attribute("amountTotal").and_then(decimal_from_json))
            .sum())
    }

    /// Sum of credit notes created in `[start, end)` for orders of the channel.
    ///
    /// Document totals live in the custom fields; documents without one count as zero.
    pub async fn refunds(&self, start: &str, end: &str, channel_id: &str) -> Result<Decimal, ApiError> {
        let documents = self
            .search_all(
                "document",
                json!([
                    { "type": "range", "field": "createdAt", "parameters": { "gte": start, "lt": end } },
                    { "type": "equals", "field": "documentType.technicalName", "value": "credit_note" },
                    { "type": "equals", "field": "order.salesChannelId", "value": channel_id },
                ]),
            )
            .await?;
        Ok(documents
            .iter()
            .filter_map(|d| {
                let custom = d.attribute("customFields")?;
                custom
                    .get("amountTotal")
                    .or_else(|| custom.get("total"))
                    .and_then(decimal_from_json)
            })
            .sum())
    }
}

fn channel_label(channel: &ShopwareEntity) -> String {
    channel
        .attribute("name")
        .and_then(Value::as_str)
        .filter(|n| !n.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| channel.id.chars().take(8).collect())
}

#[async_trait]
impl SourceFetcher for Shopware6Client {
    fn name(&self) -> &str {
        &self.source_name
    }

    fn key_prefix(&self) -> String {
        format!("shopware6_{}_", slug(&self.name))
    }

    async fn fetch(&self, date: NaiveDate) -> Result<MetricMap, FetchError> {
        let (start, end) = day_bounds(date, self.tz);
        let (start, end) = (start.to_rfc3339(), end.to_rfc3339());

        let channels = self.list_sales_channels().await?;
        let mut metrics = MetricMap::new();
        for channel in &channels {
            let label = channel_label(channel);
            let sales_key = MetricKey::from_parts(&["shopware6", &self.name, &label, "gross_sales_eur"])?;
            let refunds_key = MetricKey::from_parts(&["shopware6", &self.name, &label, "refunds_eur"])?;

            let sales = self.gross_sales(&start, &end, &channel.id).await;
            let refunds = self.refunds(&start, &end, &channel.id).await;
            metrics.insert(sales_key.clone(), value_or_unavailable(sales, &self.source_name, &sales_key));
            metrics.insert(refunds_key.clone(), value_or_unavailable(refunds, &self.source_name, &refunds_key));
        }
        tracing::debug!(source = %self.source_name, channels = channels.len(), %date, "Shopware metrics fetched.");
        Ok(metrics)
    }
}
