//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in secrecy::SecretString since it
//! may carry credentials.

pub mod secrets;

use std::time::Duration;

use crate::db::DbOptions;
use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Overrides `log_level` for docflow's own spans and events.
    pub flow_log_level: Option<String>,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = DbOptions::default();
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            flow_log_level: std::env::var("FLOW_LOG_LEVEL").ok(),
            max_connections: parsed_var("DOCFLOW_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            busy_timeout: parsed_var("DOCFLOW_BUSY_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.busy_timeout),
        })
    }

    /// Pool options derived from this configuration.
    pub fn db_options(&self) -> DbOptions {
        DbOptions {
            max_connections: self.max_connections,
            busy_timeout: self.busy_timeout,
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("environment variable {name} is malformed: {raw}"))),
        Err(_) => Ok(None),
    }
}
