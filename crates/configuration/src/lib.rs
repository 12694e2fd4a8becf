use crate::error::ConfigError;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use logging::init_tracing;
pub use settings::{
    AlertsConfig, AnomalyConfig, Config, GetMyInvoicesConfig, GoogleAdsConfig, LedgerBackend,
    LedgerConfig, LoggingConfig, NotesConfig, RetryConfig, RunConfig, Shopware6Config,
    SourcesConfig, TelegramConfig,
};

/// Prefix of environment variables that override file settings, e.g.
/// `KPI__ALERTS__TELEGRAM__TOKEN`.
pub const ENV_PREFIX: &str = "KPI";

/// Loads the application configuration.
///
/// Reads the optional `config.toml` from the working directory and layers the
/// `KPI__*` environment variables on top, so secrets can stay in `.env`.
pub fn load_config() -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config.toml").required(false))
        .add_source(environment());
    finish(builder)
}

/// Loads the configuration from a TOML document, still honouring the environment.
pub fn load_config_from_toml(toml: &str) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .add_source(environment());
    finish(builder)
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("sources.google_ads.customer_ids")
}

fn finish(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<Config, ConfigError> {
    let config = builder.build()?.try_deserialize::<Config>()?;
    validate(&config)?;
    Ok(config)
}

/// Rejects settings the run loop cannot work with.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.run.backfill_days == 0 {
        return Err(ConfigError::ValidationError(
            "run.backfill_days must be at least 1".to_string(),
        ));
    }
    if config.run.run_hour > 23 || config.run.run_minute > 59 {
        return Err(ConfigError::ValidationError(format!(
            "run time {:02}:{:02} is not a valid time of day",
            config.run.run_hour, config.run.run_minute
        )));
    }
    if config.anomaly.min_observations == 0 {
        return Err(ConfigError::ValidationError(
            "anomaly.min_observations must be at least 1".to_string(),
        ));
    }
    if config.anomaly.tolerance <= rust_decimal::Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "anomaly.tolerance must be positive".to_string(),
        ));
    }
    if config.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "retry.max_attempts must be at least 1".to_string(),
        ));
    }
    for (i, shop) in config.sources.shopware6.iter().enumerate() {
        if shop.name.trim().is_empty() || shop.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "sources.shopware6[{}] needs a name and a base_url",
                i
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn empty_document_yields_defaults() {
        let config = load_config_from_toml("").unwrap();
        assert_eq!(config.run.backfill_days, 3);
        assert_eq!(config.run.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(config.anomaly.min_observations, 14);
        assert_eq!(config.anomaly.tolerance, dec!(0.35));
        assert_eq!(config.ledger.backend, LedgerBackend::Postgres);
        assert!(config.sources.shopware6.is_empty());
        assert!(config.alerts.telegram.is_none());
    }

    #[test]
    fn reads_sources_and_overrides() {
        let config = load_config_from_toml(
            r#"
            [run]
            backfill_days = 7
            timezone = "Europe/Vienna"

            [anomaly]
            tolerance = "0.5"

            [ledger]
            backend = "memory"

            [[sources.shopware6]]
            name = "main"
            base_url = "https://shop.example"
            client_id = "id"
            client_secret = "secret"

            [sources.google_ads]
            developer_token = "dev"
            client_id = "cid"
            client_secret = "cs"
            refresh_token = "rt"
            customer_ids = ["1234567890"]
            "#,
        )
        .unwrap();
        assert_eq!(config.run.backfill_days, 7);
        assert_eq!(config.run.timezone, chrono_tz::Europe::Vienna);
        assert_eq!(config.anomaly.tolerance, dec!(0.5));
        assert_eq!(config.ledger.backend, LedgerBackend::Memory);
        assert_eq!(config.sources.shopware6[0].name, "main");
        assert_eq!(
            config.sources.google_ads.unwrap().customer_ids,
            vec!["1234567890".to_string()]
        );
    }

    #[test]
    fn zero_backfill_window_is_rejected() {
        let err = load_config_from_toml("[run]\nbackfill_days = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn invalid_time_zone_fails_to_load() {
        let err = load_config_from_toml("[run]\ntimezone = \"Mars/Olympus\"").unwrap_err();
        assert!(matches!(err, ConfigError::LoadError(_)));
    }

    #[test]
    fn retry_policy_follows_section() {
        let config = load_config_from_toml("[retry]\nmax_attempts = 5\nmax_delay_secs = 30").unwrap();
        let policy = config.retry.policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.max_delay.as_secs(), 30);
    }
}
