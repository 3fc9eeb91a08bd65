use std::env;

use serde::Deserialize;

use crate::lifecycle::DEFAULT_RETRY_DELAY_MS;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub email: EmailConfig,
    pub dispatch: DispatchConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// HTTP endpoint of the transactional email provider.
    pub provider_url: String,
    /// API key sent as a bearer token to the provider.
    pub api_key: Option<String>,
    /// From address used for outgoing notification emails.
    pub from_address: String,
    /// Shared secret for verifying provider webhook signatures.
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Whether the dispatch sweep worker is enabled.
    pub enabled: bool,
    /// How often (seconds) the worker polls for due pending records.
    pub poll_interval_seconds: u64,
    /// Maximum records picked up per sweep.
    pub batch_size: u32,
    /// Default maximum delivery attempts for new records.
    pub default_max_retries: u32,
    /// Backoff for the first retry attempt (milliseconds). The retry
    /// scheduler itself never grows delays; the dispatcher computes
    /// exponential backoff from this base.
    pub initial_backoff_ms: u64,
    /// Cap for exponential backoff (milliseconds).
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for the webhook endpoint.
    pub webhook_per_second: u32,
    /// Burst size for the webhook endpoint.
    pub webhook_burst: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/notifications.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            email: EmailConfig {
                provider_url: env::var("EMAIL_PROVIDER_URL")
                    .unwrap_or_else(|_| "http://localhost:9925/v1/send".to_string()),
                api_key: env::var("EMAIL_PROVIDER_API_KEY").ok(),
                from_address: env::var("EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| "notifications@taskmaster.local".to_string()),
                webhook_secret: env::var("EMAIL_WEBHOOK_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("EMAIL_WEBHOOK_SECRET".to_string()))?,
            },
            dispatch: DispatchConfig {
                enabled: match env::var("DISPATCH_ENABLED") {
                    Ok(v) => match v.to_lowercase().as_str() {
                        "1" | "true" | "yes" => true,
                        "0" | "false" | "no" => false,
                        _ => true,
                    },
                    Err(_) => true,
                },
                poll_interval_seconds: env::var("DISPATCH_POLL_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5u64),
                batch_size: env::var("DISPATCH_BATCH_SIZE")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10u32),
                default_max_retries: env::var("DISPATCH_DEFAULT_MAX_RETRIES")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .unwrap_or(3u32),
                initial_backoff_ms: env::var("DISPATCH_INITIAL_BACKOFF_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_RETRY_DELAY_MS as u64),
                max_backoff_ms: env::var("DISPATCH_MAX_BACKOFF_MS")
                    .unwrap_or_else(|_| "3600000".to_string())
                    .parse()
                    .unwrap_or(3_600_000u64),
            },
            rate_limit: RateLimitConfig {
                webhook_per_second: env::var("RATE_LIMIT_WEBHOOKS_PER_SECOND")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                webhook_burst: env::var("RATE_LIMIT_WEBHOOKS_BURST")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/notifications.db".to_string(),
                max_connections: 5,
            },
            email: EmailConfig {
                provider_url: "http://localhost:9925/v1/send".to_string(),
                api_key: None,
                from_address: "notifications@taskmaster.local".to_string(),
                webhook_secret: String::new(),
            },
            dispatch: DispatchConfig {
                enabled: true,
                poll_interval_seconds: 5,
                batch_size: 10,
                default_max_retries: 3,
                initial_backoff_ms: DEFAULT_RETRY_DELAY_MS as u64,
                max_backoff_ms: 3_600_000,
            },
            rate_limit: RateLimitConfig {
                webhook_per_second: 10,
                webhook_burst: 50,
            },
        }
    }
}
