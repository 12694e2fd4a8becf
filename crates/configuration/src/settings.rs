use chrono_tz::Tz;
use core_types::RetryPolicy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::time::Duration;

/// The root configuration structure for the entire application.
///
/// Every section is optional; a missing section falls back to its defaults so
/// that a bare environment with only credentials still yields a runnable config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub run: RunConfig,
    pub anomaly: AnomalyConfig,
    pub ledger: LedgerConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
    pub sources: SourcesConfig,
    pub notes: NotesConfig,
    pub alerts: AlertsConfig,
}

/// When and over which window the daily run happens.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// How many already-closed days before today are (re)processed on each run.
    pub backfill_days: u32,
    /// Local time of day of the scheduled run.
    pub run_hour: u32,
    pub run_minute: u32,
    /// Calendar days and the schedule are evaluated in this zone.
    pub timezone: Tz,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            backfill_days: 3,
            run_hour: 6,
            run_minute: 30,
            timezone: chrono_tz::Europe::Berlin,
        }
    }
}

/// Parameters of the trailing-median classifier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Minimum number of prior observations before a baseline exists.
    pub min_observations: usize,
    /// Relative deviation from the baseline beyond which a value is flagged (0.35 = 35%).
    pub tolerance: Decimal,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            min_observations: 14,
            tolerance: dec!(0.35),
        }
    }
}

/// Which table transport backs the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum LedgerBackend {
    /// PostgreSQL, reached through `DATABASE_URL`.
    #[default]
    Postgres,
    /// A process-local table. Nothing survives the run.
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay_secs: 1,
            max_delay_secs: 8,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            min_delay: Duration::from_secs(self.min_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for the daily-rolling log file.
    pub directory: String,
    pub file_prefix: String,
    /// Default filter directive when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: "logs".to_string(),
            file_prefix: "kpi-harvester.log".to_string(),
            level: "info".to_string(),
        }
    }
}

/// Credentials for every data source. A source without credentials is skipped.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub shopware6: Vec<Shopware6Config>,
    pub getmyinvoices: Option<GetMyInvoicesConfig>,
    pub google_ads: Option<GoogleAdsConfig>,
}

/// One Shopware 6 instance, reached through its admin API integration.
#[derive(Debug, Clone, Deserialize)]
pub struct Shopware6Config {
    /// Short instance name used inside metric keys.
    pub name: String,
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetMyInvoicesConfig {
    pub api_key: String,
    #[serde(default = "default_gmi_base_url")]
    pub base_url: String,
}

fn default_gmi_base_url() -> String {
    "https://api.getmyinvoices.com/api/v2".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleAdsConfig {
    pub developer_token: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default)]
    pub customer_ids: Vec<String>,
    /// Manager account the customers are accessed through, if any.
    #[serde(default)]
    pub login_customer_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotesConfig {
    /// Without a key, notes are plain bullet lists built locally.
    pub openai_api_key: Option<String>,
    pub model: String,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
}
