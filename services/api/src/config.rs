//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use storyforge_core::jobs::RetryPolicy;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Print provider credentials and endpoint. The base URL selects sandbox or production.
#[derive(Clone, Debug)]
pub struct PrintProviderConfig {
    pub base_url: String,
    pub client_key: String,
    pub client_secret: String,
    pub pod_package_id: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub story_model: String,
    pub image_model: String,
    pub style_reference_base_url: String,
    pub asset_store_url: String,
    pub asset_store_key: Option<String>,
    pub asset_bucket: String,
    pub document_store_url: String,
    pub document_content_url: String,
    pub document_store_token: Option<String>,
    pub print_provider: PrintProviderConfig,
    pub max_order_quantity: u32,
    pub font_path: Option<PathBuf>,
    pub story_retry: RetryPolicy,
    pub illustration_retry: RetryPolicy,
    pub fulfillment_retry: RetryPolicy,
    pub illustration_concurrency: usize,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

fn parsed<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn retry_policy(prefix: &str, default: RetryPolicy) -> Result<RetryPolicy, ConfigError> {
    let max_attempts = parsed(&format!("{}_MAX_ATTEMPTS", prefix), default.max_attempts)?;
    if max_attempts == 0 {
        return Err(ConfigError::InvalidValue(
            format!("{}_MAX_ATTEMPTS", prefix),
            "must be at least 1".to_string(),
        ));
    }
    let backoff_secs = parsed(
        &format!("{}_BACKOFF_SECS", prefix),
        default.initial_backoff.as_secs(),
    )?;
    Ok(RetryPolicy::new(max_attempts, Duration::from_secs(backoff_secs)))
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = required("DATABASE_URL")?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Model Settings ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let openai_base_url = var_or("OPENAI_BASE_URL", "https://api.openai.com/v1");
        let story_model = var_or("STORY_MODEL", "gpt-4o");
        let image_model = var_or("IMAGE_MODEL", "gpt-image-1");
        let style_reference_base_url = required("STYLE_REFERENCE_BASE_URL")?;

        // --- Load Storage Settings ---
        let asset_store_url = required("ASSET_STORE_URL")?;
        let asset_store_key = std::env::var("ASSET_STORE_KEY").ok();
        let asset_bucket = var_or("ASSET_BUCKET", "book-assets");
        let document_store_url = var_or("DOCUMENT_STORE_URL", "https://api.dropboxapi.com/2");
        let document_content_url =
            var_or("DOCUMENT_CONTENT_URL", "https://content.dropboxapi.com/2");
        let document_store_token = std::env::var("DOCUMENT_STORE_TOKEN").ok();

        // --- Load Print Settings ---
        let print_provider = PrintProviderConfig {
            base_url: var_or("LULU_BASE_URL", "https://api.sandbox.lulu.com"),
            client_key: var_or("LULU_CLIENT_KEY", ""),
            client_secret: var_or("LULU_CLIENT_SECRET", ""),
            pod_package_id: var_or("LULU_POD_PACKAGE_ID", "0850X0850FCPRESS080CW444GXX"),
        };
        let max_order_quantity = parsed("MAX_ORDER_QUANTITY", 10u32)?;
        let font_path = std::env::var("FONT_PATH").ok().map(PathBuf::from);

        // --- Load Worker Settings ---
        let story_retry = retry_policy("STORY", RetryPolicy::story())?;
        let illustration_retry = retry_policy("ILLUSTRATION", RetryPolicy::illustration())?;
        let fulfillment_retry = retry_policy("FULFILLMENT", RetryPolicy::fulfillment())?;
        let illustration_concurrency = parsed("ILLUSTRATION_CONCURRENCY", 4usize)?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            openai_base_url,
            story_model,
            image_model,
            style_reference_base_url,
            asset_store_url,
            asset_store_key,
            asset_bucket,
            document_store_url,
            document_content_url,
            document_store_token,
            print_provider,
            max_order_quantity,
            font_path,
            story_retry,
            illustration_retry,
            fulfillment_retry,
            illustration_concurrency,
        })
    }

    pub fn openai_api_key(&self) -> Result<&str, ConfigError> {
        self.openai_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))
    }
}
