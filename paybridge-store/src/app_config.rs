use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub retry: RetryConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub redis_url: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "paybridge:ledger".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound on a single adapter call
    pub call_timeout_ms: u64,
}

fn default_multiplier() -> f64 { 2.0 }

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub default_limit: u64,
    pub max_limit: u64,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // PAYBRIDGE__RETRY__MAX_ATTEMPTS=5 sets retry.max_attempts
            .add_source(config::Environment::with_prefix("PAYBRIDGE").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Parse a TOML document directly, without touching the filesystem or environment.
    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(config::ConfigError::Message(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.search.default_limit == 0 || self.search.default_limit > self.search.max_limit {
            return Err(config::ConfigError::Message(
                "search.default_limit must be within 1..=search.max_limit".to_string(),
            ));
        }
        if self.ledger.backend == LedgerBackend::Redis && self.ledger.redis_url.is_none() {
            return Err(config::ConfigError::Message(
                "ledger.redis_url is required for the redis backend".to_string(),
            ));
        }
        Ok(())
    }
}
