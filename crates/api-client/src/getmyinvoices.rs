use crate::error::{ApiError, FetchError};
use crate::http::{decimal_from_json, id_text, send_json};
use crate::responses::{BankAccount, BankAccountList, BankBalanceResponse};
use crate::{SourceFetcher, http_client, value_or_unavailable};
use async_trait::async_trait;
use chrono::NaiveDate;
use configuration::GetMyInvoicesConfig;
use core_types::{MetricKey, MetricMap, MetricValue, RetryPolicy};
use rust_decimal::Decimal;

const TOTAL_KEY: &str = "bank_total_balance_eur";

/// End-of-day bank balances as reported by GetMyInvoices.
pub struct GetMyInvoicesClient {
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl GetMyInvoicesClient {
    pub fn new(config: &GetMyInvoicesConfig, retry: RetryPolicy) -> Result<Self, ApiError> {
        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry,
            client: http_client()?,
        })
    }

    pub async fn list_accounts(&self) -> Result<Vec<BankAccount>, ApiError> {
        let url = format!("{}/bank-accounts", self.base_url);
        let list: BankAccountList = send_json(&self.retry, "getmyinvoices.accounts", || {
            self.client.get(&url).bearer_auth(&self.api_key)
        })
        .await?;
        Ok(list.data)
    }

    pub async fn balance(&self, account_id: &str, date: NaiveDate) -> Result<Decimal, ApiError> {
        let url = format!("{}/bank-accounts/{}/balances", self.base_url, account_id);
        let date = date.to_string();
        let response: BankBalanceResponse =
            send_json(&self.retry, "getmyinvoices.balance", || {
                self.client
                    .get(&url)
                    .bearer_auth(&self.api_key)
                    .query(&[("date", date.as_str())])
            })
            .await?;
        decimal_from_json(&response.data.amount).ok_or_else(|| {
            ApiError::InvalidData(format!("balance amount {} is not a number", response.data.amount))
        })
    }
}

#[async_trait]
impl SourceFetcher for GetMyInvoicesClient {
    fn name(&self) -> &str {
        "getmyinvoices"
    }

    fn key_prefix(&self) -> String {
        "bank_".to_string()
    }

    fn known_keys(&self) -> Vec<MetricKey> {
        MetricKey::new(TOTAL_KEY).into_iter().collect()
    }

    async fn fetch(&self, date: NaiveDate) -> Result<MetricMap, FetchError> {
        let accounts = self.list_accounts().await?;

        let mut metrics = MetricMap::new();
        let mut total = Decimal::ZERO;
        let mut complete = !accounts.is_empty();
        for account in &accounts {
            let Some(id) = id_text(&account.id) else {
                tracing::warn!(source = self.name(), "Bank account without an id skipped.");
                complete = false;
                continue;
            };
            let label = account
                .name
                .as_deref()
                .or(account.iban.as_deref())
                .unwrap_or(&id);
            let key = MetricKey::from_parts(&["bank", label, "balance_eur"])?;

            let value = value_or_unavailable(self.balance(&id, date).await, self.name(), &key);
            match value {
                MetricValue::Number(amount) => total += amount,
                MetricValue::Unavailable => complete = false,
            }
            metrics.insert(key, value);
        }

        // The total requires every account.
        let total = if complete {
            MetricValue::Number(total.round_dp(2))
        } else {
            MetricValue::Unavailable
        };
        metrics.insert(MetricKey::new(TOTAL_KEY)?, total);
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn client(server: &MockServer) -> GetMyInvoicesClient {
        let config = GetMyInvoicesConfig {
            api_key: "secret".into(),
            base_url: server.base_url(),
        };
        GetMyInvoicesClient::new(&config, RetryPolicy::immediate(1)).unwrap()
    }

    fn key(s: &str) -> MetricKey {
        MetricKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn balances_per_account_and_total() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/bank-accounts")
                    .header("Authorization", "Bearer secret");
                then.status(200).json_body(json!({
                    "data": [
                        { "id": 1, "name": "Sparkasse Giro" },
                        { "id": "2", "iban": "DE00 1234" }
                    ]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/bank-accounts/1/balances")
                    .query_param("date", "2024-05-02");
                then.status(200).json_body(json!({ "data": { "amount": 1200.5 } }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/bank-accounts/2/balances");
                then.status(200).json_body(json!({ "data": { "amount": "-200.25" } }));
            })
            .await;

        let metrics = client(&server)
            .fetch(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap())
            .await
            .unwrap();

        assert_eq!(
            metrics[&key("bank_sparkasse_giro_balance_eur")],
            MetricValue::Number(dec!(1200.5))
        );
        assert_eq!(
            metrics[&key("bank_de00_1234_balance_eur")],
            MetricValue::Number(dec!(-200.25))
        );
        assert_eq!(
            metrics[&key("bank_total_balance_eur")],
            MetricValue::Number(dec!(1000.25))
        );
    }

    #[tokio::test]
    async fn one_failed_account_makes_the_total_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/bank-accounts");
                then.status(200).json_body(json!({
                    "data": [{ "id": "a", "name": "ok" }, { "id": "b", "name": "down" }]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/bank-accounts/a/balances");
                then.status(200).json_body(json!({ "data": { "amount": 10 } }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/bank-accounts/b/balances");
                then.status(502);
            })
            .await;

        let metrics = client(&server)
            .fetch(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap())
            .await
            .unwrap();

        assert_eq!(metrics[&key("bank_ok_balance_eur")], MetricValue::Number(dec!(10)));
        assert_eq!(metrics[&key("bank_down_balance_eur")], MetricValue::Unavailable);
        assert_eq!(metrics[&key("bank_total_balance_eur")], MetricValue::Unavailable);
    }

    #[tokio::test]
    async fn no_accounts_means_no_total() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/bank-accounts");
                then.status(200).json_body(json!({ "data": [] }));
            })
            .await;

        let metrics = client(&server)
            .fetch(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap())
            .await
            .unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[&key("bank_total_balance_eur")], MetricValue::Unavailable);
    }
}
