//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.
//! Worker tunables come from an optional TOML file (see [`WorkerSettings`]).

pub mod settings;

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::path::PathBuf;

pub use settings::WorkerSettings;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Where draft regeneration is requested; retries are skipped without it.
    pub draft_endpoint: Option<String>,
    pub draft_token: Option<SecretString>,
    pub cache_health_url: Option<String>,
    pub payment_health_url: Option<String>,
    pub settings: WorkerSettings,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let settings = match optional_var("REVIEW_QUEUE_CONFIG") {
            Some(path) => WorkerSettings::load(&PathBuf::from(path))?,
            None => WorkerSettings::default(),
        };
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            draft_endpoint: optional_var("DRAFT_ENDPOINT"),
            draft_token: optional_var("DRAFT_SERVICE_TOKEN").map(SecretString::from),
            cache_health_url: optional_var("CACHE_HEALTH_URL"),
            payment_health_url: optional_var("PAYMENT_HEALTH_URL"),
            settings,
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Unset and empty are the same.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
