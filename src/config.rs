//! Process settings.
//!
//! Layering, lowest precedence first: built-in defaults, an optional config
//! file, then environment variables. Environment keys are the lower-cased
//! variable names, so `PRICE_POLL_INTERVAL_SECS` sets `price_poll_interval_secs`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    #[serde(default)]
    pub database_url: Option<String>,

    pub price_transport: String,
    pub price_topic: String,
    pub kafka_bootstrap_servers: String,
    pub kafka_group_id: String,
    pub kafka_offset_reset: String,
    #[serde(default)]
    pub kafka_security_protocol: Option<String>,
    #[serde(default)]
    pub kafka_sasl_mechanism: Option<String>,
    #[serde(default)]
    pub kafka_sasl_username: Option<String>,
    #[serde(default)]
    pub kafka_sasl_password: Option<String>,

    pub rate_limit_store: String,

    pub stock_api_key: String,
    pub stock_api_url: String,
    pub stock_api_timeout_secs: u64,

    pub price_poll_interval_secs: u64,
    pub alert_cooldown_secs: u64,
    pub shutdown_timeout_secs: u64,

    pub log_filter: String,
    pub metrics_port: u16,
}

/// Which [`crate::stream::PriceTransport`] the binary wires in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportBackend {
    Memory,
    Kafka,
}

/// Where cooldown markers live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitBackend {
    Memory,
    Sled(PathBuf),
}

impl Settings {
    pub fn load(file: Option<&Path>) -> Result<Self, SettingsError> {
        Self::load_from(file, config::Environment::default())
    }

    fn load_from(file: Option<&Path>, env: config::Environment) -> Result<Self, SettingsError> {
        let mut builder = config::Config::builder()
            .set_default("bind_addr", "0.0.0.0:8000")?
            .set_default("price_transport", "memory")?
            .set_default("price_topic", crate::stream::PRICE_TOPIC)?
            .set_default("kafka_bootstrap_servers", "localhost:9092")?
            .set_default("kafka_group_id", "stockpulse-alerts")?
            .set_default("kafka_offset_reset", "latest")?
            .set_default("rate_limit_store", "memory")?
            .set_default("stock_api_key", "")?
            .set_default("stock_api_url", "https://www.alphavantage.co/query")?
            .set_default("stock_api_timeout_secs", 10_i64)?
            .set_default("price_poll_interval_secs", 15_i64)?
            .set_default("alert_cooldown_secs", 3600_i64)?
            .set_default("shutdown_timeout_secs", 5_i64)?
            .set_default("log_filter", "info")?
            .set_default("metrics_port", 9000_i64)?;

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings: Settings = builder
            .add_source(env)
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.price_poll_interval_secs == 0 {
            return Err(SettingsError::Invalid {
                key: "price_poll_interval_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.alert_cooldown_secs == 0 {
            return Err(SettingsError::Invalid {
                key: "alert_cooldown_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if !matches!(self.kafka_offset_reset.as_str(), "latest" | "earliest") {
            return Err(SettingsError::Invalid {
                key: "kafka_offset_reset",
                reason: format!("expected latest or earliest, got {:?}", self.kafka_offset_reset),
            });
        }
        self.transport_backend()?;
        self.rate_limit_backend()?;
        Ok(())
    }

    pub fn transport_backend(&self) -> Result<TransportBackend, SettingsError> {
        match self.price_transport.to_ascii_lowercase().as_str() {
            "memory" => Ok(TransportBackend::Memory),
            "kafka" => Ok(TransportBackend::Kafka),
            other => Err(SettingsError::Invalid {
                key: "price_transport",
                reason: format!("unknown transport {other:?}"),
            }),
        }
    }

    pub fn rate_limit_backend(&self) -> Result<RateLimitBackend, SettingsError> {
        let raw = self.rate_limit_store.trim();
        if raw.eq_ignore_ascii_case("memory") {
            return Ok(RateLimitBackend::Memory);
        }
        match raw.strip_prefix("sled://") {
            Some(path) if !path.is_empty() => Ok(RateLimitBackend::Sled(PathBuf::from(path))),
            _ => Err(SettingsError::Invalid {
                key: "rate_limit_store",
                reason: format!("expected memory or sled://<path>, got {raw:?}"),
            }),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.price_poll_interval_secs)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn stock_api_timeout(&self) -> Duration {
        Duration::from_secs(self.stock_api_timeout_secs)
    }
}
