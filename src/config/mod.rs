//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.
//! Client tuning (retry, leases, poll interval) is not environmental — it
//! travels in `queue::ClientOptions`, passed explicitly to the constructor.

pub mod secrets;

use crate::error::{Error, Result};
use crate::transport::pgmq::PgmqConfig;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub queue_name: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load a `.env` file if present, then read the environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            queue_name: std::env::var("QUEUE_NAME").unwrap_or_else(|_| "work".to_string()),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Transport configuration for the pgmq backend.
    pub fn pgmq(&self) -> PgmqConfig {
        PgmqConfig::new(self.database_url.clone(), self.queue_name.clone())
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
