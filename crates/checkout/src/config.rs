//! Checkout engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CHECKOUT_API_BASE_URL` - Base URL of the billing backend
//! - `CHECKOUT_API_TOKEN` - Bearer token for the cart and tax endpoints
//!
//! ## Optional
//! - `CHECKOUT_SYNC_DEBOUNCE_MS` - Mutation coalescing window (default: 300)
//! - `CHECKOUT_SYNC_BACKOFF_MS` - Base retry backoff (default: 1000)
//! - `CHECKOUT_SYNC_MAX_ATTEMPTS` - Attempts per payload (default: 3)
//! - `CHECKOUT_SYNC_REQUEST_TIMEOUT_SECS` - Per-request bound (default: 15)
//! - `CHECKOUT_SYNC_PENDING_TIMEOUT_SECS` - Overdue threshold (default: 45)
//! - `CHECKOUT_TAX_CACHE_CAPACITY` - Cached validations (default: 1000)
//! - `CHECKOUT_TAX_CACHE_TTL_SECS` - Validation freshness (default: 600)

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use crate::cart::schedule::SyncPolicy;
use crate::tax::TaxCacheConfig;

const MIN_API_TOKEN_LENGTH: usize = 20;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-", "changeme", "replace", "placeholder", "example", "secret", "password", "xxx",
    "todo", "fixme", "insert", "enter-",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Billing backend endpoint configuration.
///
/// Implements `Debug` manually to redact the token.
#[derive(Clone)]
pub struct ApiConfig {
    /// Base URL of the billing backend.
    pub base_url: Url,
    /// Bearer token for the cart and tax endpoints.
    pub api_token: SecretString,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_token", &"[REDACTED]")
            .finish()
    }
}

/// Checkout engine configuration.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Billing backend endpoints.
    pub api: ApiConfig,
    /// Sync scheduling tunables.
    pub sync: SyncPolicy,
    /// Tax validation cache tuning.
    pub tax_cache: TaxCacheConfig,
}

impl CheckoutConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or
    /// invalid, or if the API token fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let base_url = require_env("CHECKOUT_API_BASE_URL")?;
        let base_url = Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("CHECKOUT_API_BASE_URL".to_string(), e.to_string())
        })?;

        let api_token = require_env("CHECKOUT_API_TOKEN")?;
        validate_api_token("CHECKOUT_API_TOKEN", &api_token)?;

        let sync = SyncPolicy {
            debounce: Duration::from_millis(optional_env_parse(
                "CHECKOUT_SYNC_DEBOUNCE_MS",
                300,
            )?),
            backoff_base: Duration::from_millis(optional_env_parse(
                "CHECKOUT_SYNC_BACKOFF_MS",
                1_000,
            )?),
            max_attempts: optional_env_parse("CHECKOUT_SYNC_MAX_ATTEMPTS", 3)?,
            request_timeout: Duration::from_secs(optional_env_parse(
                "CHECKOUT_SYNC_REQUEST_TIMEOUT_SECS",
                15,
            )?),
            pending_timeout: Duration::from_secs(optional_env_parse(
                "CHECKOUT_SYNC_PENDING_TIMEOUT_SECS",
                45,
            )?),
        };

        let tax_cache = TaxCacheConfig {
            capacity: optional_env_parse("CHECKOUT_TAX_CACHE_CAPACITY", 1_000)?,
            ttl: Duration::from_secs(optional_env_parse("CHECKOUT_TAX_CACHE_TTL_SECS", 600)?),
        };

        Ok(Self {
            api: ApiConfig {
                base_url,
                api_token: SecretString::from(api_token),
            },
            sync,
            tax_cache,
        })
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidEnvVar(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Reject tokens that are too short or look like placeholders.
fn validate_api_token(name: &str, token: &str) -> Result<(), ConfigError> {
    if token.len() < MIN_API_TOKEN_LENGTH {
        return Err(ConfigError::InsecureSecret(
            name.to_string(),
            format!("must be at least {MIN_API_TOKEN_LENGTH} characters"),
        ));
    }
    let lowered = token.to_ascii_lowercase();
    for pattern in PLACEHOLDER_PATTERNS {
        if lowered.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                name.to_string(),
                format!("looks like a placeholder (contains \"{pattern}\")"),
            ));
        }
    }
    Ok(())
}
