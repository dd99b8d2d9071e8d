//! Environment-driven configuration for the gateway.
//!
//! Everything is read once at startup through [`Config::from_env`]; a
//! validation failure is fatal and the process exits non-zero. Defaults live
//! in [`config_defaults`] so the fallback chain (env var, then hardcoded
//! default) is visible in one place.

use std::net::IpAddr;
use std::time::Duration;
use url::Url;

const MIN_JWT_SECRET_BYTES: usize = 32;

/// Fully validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: IpAddr,
    /// When unset the gateway runs on the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// HMAC secret for bearer tokens. At least 32 bytes.
    pub jwt_secret: String,
    pub jwt_expiry: Duration,
    pub ethereum_rpc: Option<Url>,
    pub ethereum_rpc_fallback: Option<Url>,
    pub chain_id: u64,
    pub rpc_timeout: Duration,
    pub cache_ttl: Duration,
    pub nonce_ttl: Duration,
    /// Inline policy document; takes precedence over `policy_file`.
    pub policy_json: Option<String>,
    pub policy_file: Option<String>,
    /// Admission default for routes without a matching policy.
    pub policy_default_allow: bool,
    /// Report policy-evaluation faults as 403 instead of 500.
    pub policy_error_as_forbidden: bool,
    /// Header name a single trusted proxy puts the client IP in.
    pub trusted_proxy_header: Option<String>,
    pub rate_limit_per_minute: f64,
    pub rate_limit_burst: f64,
    pub key_create_per_hour: f64,
    pub key_create_burst: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("JWT_SECRET must be at least {MIN_JWT_SECRET_BYTES} bytes, got {0}")]
    JwtSecretTooShort(usize),
}

impl Config {
    /// Reads and validates the full configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_JWT_SECRET_BYTES {
            return Err(ConfigError::JwtSecretTooShort(jwt_secret.len()));
        }

        Ok(Self {
            port: parsed_or("PORT", config_defaults::DEFAULT_PORT)?,
            host: parsed_or("HOST", config_defaults::default_host())?,
            database_url: optional_var("DATABASE_URL"),
            db_max_connections: parsed_or(
                "DB_MAX_CONNECTIONS",
                config_defaults::DEFAULT_DB_MAX_CONNECTIONS,
            )?,
            jwt_secret,
            jwt_expiry: Duration::from_secs(
                parsed_or("JWT_EXPIRY_HOURS", config_defaults::DEFAULT_JWT_EXPIRY_HOURS)? * 3600,
            ),
            ethereum_rpc: optional_parsed("ETHEREUM_RPC")?,
            ethereum_rpc_fallback: optional_parsed("ETHEREUM_RPC_FALLBACK")?,
            chain_id: parsed_or("CHAIN_ID", config_defaults::DEFAULT_CHAIN_ID)?,
            rpc_timeout: Duration::from_secs(parsed_or(
                "RPC_TIMEOUT",
                config_defaults::DEFAULT_RPC_TIMEOUT_SECS,
            )?),
            cache_ttl: Duration::from_secs(parsed_or(
                "CACHE_TTL",
                config_defaults::DEFAULT_CACHE_TTL_SECS,
            )?),
            nonce_ttl: Duration::from_secs(
                parsed_or("NONCE_TTL_MINUTES", config_defaults::DEFAULT_NONCE_TTL_MINUTES)? * 60,
            ),
            policy_json: optional_var("POLICY_JSON"),
            policy_file: optional_var("POLICY_FILE"),
            policy_default_allow: parsed_or("POLICY_DEFAULT_ALLOW", true)?,
            policy_error_as_forbidden: parsed_or("POLICY_ERROR_AS_FORBIDDEN", false)?,
            trusted_proxy_header: optional_var("TRUSTED_PROXY_HEADER"),
            rate_limit_per_minute: parsed_or(
                "RATE_LIMIT_PER_MINUTE",
                config_defaults::DEFAULT_RATE_LIMIT_PER_MINUTE,
            )?,
            rate_limit_burst: parsed_or(
                "RATE_LIMIT_BURST",
                config_defaults::DEFAULT_RATE_LIMIT_BURST,
            )?,
            key_create_per_hour: parsed_or(
                "KEY_CREATE_PER_HOUR",
                config_defaults::DEFAULT_KEY_CREATE_PER_HOUR,
            )?,
            key_create_burst: parsed_or(
                "KEY_CREATE_BURST",
                config_defaults::DEFAULT_KEY_CREATE_BURST,
            )?,
        })
    }

    /// A config suitable for tests: in-memory store, no chain endpoints.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            host: config_defaults::default_host(),
            database_url: None,
            db_max_connections: config_defaults::DEFAULT_DB_MAX_CONNECTIONS,
            jwt_secret: "test-secret-test-secret-test-secret!".to_string(),
            jwt_expiry: Duration::from_secs(24 * 3600),
            ethereum_rpc: None,
            ethereum_rpc_fallback: None,
            chain_id: config_defaults::DEFAULT_CHAIN_ID,
            rpc_timeout: Duration::from_secs(config_defaults::DEFAULT_RPC_TIMEOUT_SECS),
            cache_ttl: Duration::from_secs(config_defaults::DEFAULT_CACHE_TTL_SECS),
            nonce_ttl: Duration::from_secs(config_defaults::DEFAULT_NONCE_TTL_MINUTES * 60),
            policy_json: None,
            policy_file: None,
            policy_default_allow: true,
            policy_error_as_forbidden: false,
            trusted_proxy_header: None,
            rate_limit_per_minute: config_defaults::DEFAULT_RATE_LIMIT_PER_MINUTE,
            rate_limit_burst: config_defaults::DEFAULT_RATE_LIMIT_BURST,
            key_create_per_hour: config_defaults::DEFAULT_KEY_CREATE_PER_HOUR,
            key_create_burst: config_defaults::DEFAULT_KEY_CREATE_BURST,
        }
    }
}

fn optional_var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

fn optional_parsed<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    optional_var(name)
        .map(|raw| {
            raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            })
        })
        .transpose()
}

pub mod config_defaults {
    use std::net::IpAddr;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
    pub const DEFAULT_JWT_EXPIRY_HOURS: u64 = 24;
    pub const DEFAULT_CHAIN_ID: u64 = 1;
    pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 5;
    pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
    pub const DEFAULT_NONCE_TTL_MINUTES: u64 = 5;
    pub const DEFAULT_RATE_LIMIT_PER_MINUTE: f64 = 60.0;
    pub const DEFAULT_RATE_LIMIT_BURST: f64 = 10.0;
    pub const DEFAULT_KEY_CREATE_PER_HOUR: f64 = 10.0;
    pub const DEFAULT_KEY_CREATE_BURST: f64 = 3.0;

    pub fn default_host() -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
    }
}
