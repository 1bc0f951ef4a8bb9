use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Payment gateway (PesaPal) configuration.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Gateway API base URL (sandbox or live).
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    #[validate(length(min = 1, message = "Gateway consumer key is required"))]
    pub consumer_key: String,

    #[validate(length(min = 1, message = "Gateway consumer secret is required"))]
    pub consumer_secret: String,

    /// Public URL the gateway delivers IPN callbacks to.
    pub callback_url: String,

    /// Registered IPN notification id, if the gateway requires one per merchant.
    #[serde(default)]
    pub ipn_id: Option<String>,

    /// HTTP timeout for gateway calls, seconds.
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_gateway_base_url() -> String {
    "https://cybqa.pesapal.com/pesapalv3".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    30
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Settlement currency for checkout (ISO 4217).
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Flat delivery fee added to every order total.
    #[serde(default = "default_delivery_fee")]
    pub delivery_fee: Decimal,

    /// Event channel capacity
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Interval between reconciliation sweep runs, seconds. 0 disables the
    /// scheduled sweep (it stays invokable over HTTP).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Minimum age before a still-PENDING transaction is re-verified against the
    /// gateway by the sweep.
    #[serde(default = "default_sweep_pending_min_age_secs")]
    pub sweep_pending_min_age_secs: i64,

    /// Max transactions examined per sweep run.
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: u64,

    /// Payment gateway settings
    #[validate]
    pub gateway: GatewayConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_db_idle_timeout_secs() -> u64 {
    600
}

fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_currency() -> String {
    "KES".to_string()
}

fn default_delivery_fee() -> Decimal {
    Decimal::ZERO
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_sweep_pending_min_age_secs() -> i64 {
    600
}

fn default_sweep_batch_size() -> u64 {
    200
}

impl AppConfig {
    /// Creates a minimal configuration, used by tests and local tooling.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            default_currency: default_currency(),
            delivery_fee: default_delivery_fee(),
            event_channel_capacity: default_event_channel_capacity(),
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_pending_min_age_secs: default_sweep_pending_min_age_secs(),
            sweep_batch_size: default_sweep_batch_size(),
            gateway: GatewayConfig {
                base_url: default_gateway_base_url(),
                consumer_key: "test-consumer-key".to_string(),
                consumer_secret: "test-consumer-secret".to_string(),
                callback_url: "http://localhost:8080/api/v1/payments/callback".to_string(),
                ipn_id: None,
                timeout_secs: default_gateway_timeout_secs(),
            },
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration load error: {0}")]
    Load(#[from] ConfigError),
    #[error("Configuration validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Loads configuration from `config/{default,<env>}.toml` plus `APP__*`
/// environment variables (double underscore separates nesting, e.g.
/// `APP__GATEWAY__CONSUMER_KEY`).
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://aquamart.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    Ok(app_config)
}

/// Initializes the tracing subscriber. Honors `RUST_LOG` when set, otherwise
/// derives a directive from the configured level.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("aquamart_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::try_new(filter_directive)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_has_sane_defaults() {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18080,
            "test".to_string(),
        );
        assert_eq!(cfg.default_currency, "KES");
        assert_eq!(cfg.delivery_fee, Decimal::ZERO);
        assert!(!cfg.is_production());
        assert!(cfg.sweep_interval_secs > 0);
    }
}
