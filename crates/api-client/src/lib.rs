//! # KPI Harvester API Clients
//!
//! One fetcher per data source. Each fetcher turns "the calendar day `date`"
//! into a flat map of metric keys to values. A sub-result that cannot be
//! fetched becomes `MetricValue::Unavailable` under its usual key; an error
//! returned from `fetch` means the source delivered nothing at all for the date.

use async_trait::async_trait;
use chrono::NaiveDate;
use chrono_tz::Tz;
use configuration::SourcesConfig;
use core_types::{MetricKey, MetricMap, MetricValue, RetryPolicy};
use rust_decimal::Decimal;
use std::sync::Arc;

pub mod error;
pub mod getmyinvoices;
pub mod google_ads;
mod http;
pub mod responses;
pub mod shopware6;

// --- Public API ---
pub use error::{ApiError, FetchError};
pub use getmyinvoices::GetMyInvoicesClient;
pub use google_ads::GoogleAdsClient;
pub use shopware6::Shopware6Client;

/// The generic interface of a data source.
///
/// The orchestrator holds sources as `Arc<dyn SourceFetcher>` and calls them
/// concurrently, so implementations must be shareable across tasks.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Short name used in logs and in the run summary.
    fn name(&self) -> &str;

    /// Every key this source produces starts with this prefix.
    fn key_prefix(&self) -> String;

    /// Keys the source is known to produce before any fetch has run.
    fn known_keys(&self) -> Vec<MetricKey> {
        Vec::new()
    }

    async fn fetch(&self, date: NaiveDate) -> Result<MetricMap, FetchError>;
}

/// Builds a fetcher for every source that has credentials configured.
pub fn sources_from_config(
    config: &SourcesConfig,
    retry: RetryPolicy,
    tz: Tz,
) -> Result<Vec<Arc<dyn SourceFetcher>>, ApiError> {
    let mut sources: Vec<Arc<dyn SourceFetcher>> = Vec::new();
    for shop in &config.shopware6 {
        sources.push(Arc::new(Shopware6Client::new(shop, retry, tz)?));
    }
    if let Some(gmi) = &config.getmyinvoices {
        sources.push(Arc::new(GetMyInvoicesClient::new(gmi, retry)?));
    }
    if let Some(ads) = &config.google_ads {
        if ads.customer_ids.is_empty() {
            tracing::warn!("Google Ads is configured without customer ids; skipping it.");
        } else {
            sources.push(Arc::new(GoogleAdsClient::new(ads, retry)?));
        }
    }
    Ok(sources)
}

/// Converts one sub-query result into a cell value, logging the failure.
pub(crate) fn value_or_unavailable(
    result: Result<Decimal, ApiError>,
    source: &str,
    key: &MetricKey,
) -> MetricValue {
    match result {
        Ok(amount) => MetricValue::Number(amount.round_dp(2)),
        Err(e) => {
            tracing::warn!(source, metric = %key, error = %e, "Metric unavailable.");
            MetricValue::Unavailable
        }
    }
}

pub(crate) fn http_client() -> Result<reqwest::Client, ApiError> {
    Ok(reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(45))
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use configuration::{GetMyInvoicesConfig, GoogleAdsConfig, Shopware6Config};

    #[test]
    fn only_configured_sources_are_built() {
        let mut config = SourcesConfig::default();
        assert!(
            sources_from_config(&config, RetryPolicy::immediate(1), chrono_tz::Europe::Berlin)
                .unwrap()
                .is_empty()
        );

        config.shopware6.push(Shopware6Config {
            name: "main".into(),
            base_url: "http://localhost".into(),
            client_id: "id".into(),
            client_secret: "secret".into(),
        });
        config.getmyinvoices = Some(GetMyInvoicesConfig {
            api_key: "key".into(),
            base_url: "http://localhost".into(),
        });
        config.google_ads = Some(GoogleAdsConfig {
            developer_token: "dev".into(),
            client_id: "id".into(),
            client_secret: "secret".into(),
            refresh_token: "refresh".into(),
            customer_ids: vec![],
            login_customer_id: None,
        });

        let sources =
            sources_from_config(&config, RetryPolicy::immediate(1), chrono_tz::Europe::Berlin)
                .unwrap();
        let names: Vec<_> = sources.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["shopware6:main", "getmyinvoices"]);
    }
}
