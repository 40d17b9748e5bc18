//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Broker connection and naming
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// NATS server URL
    pub url: String,

    /// JetStream stream holding every subject below
    pub stream: String,

    /// Credit submissions
    pub subject: String,

    /// Query-audit events
    pub audit_subject: String,

    /// Dead-letter sink
    pub dead_letter_subject: String,

    /// Durable consumer name
    pub consumer_name: String,

    /// Deliveries per message before it is dead-lettered
    pub max_deliveries: u32,

    /// Delay before an abandoned message is redelivered
    pub redelivery_delay: Duration,
}

/// Background processor timing
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub enabled: bool,
    pub start_delay: Duration,
    pub restart_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            start_delay: Duration::from_millis(5000),
            restart_interval: Duration::from_millis(5000),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub open_duration: Duration,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    pub log_format: LogFormat,

    pub broker: BrokerSettings,

    pub consumer: ConsumerSettings,

    pub breaker: BreakerSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = required(&lookup, "DATABASE_URL")?;
        let database_max_connections = parsed(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?;
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parsed(&lookup, "PORT", 3000)?;
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(_) => return Err(ConfigError::InvalidValue("LOG_FORMAT")),
        };

        let broker = BrokerSettings {
            url: required(&lookup, "BROKER_URL")?,
            stream: lookup("BROKER_STREAM").unwrap_or_else(|| "CREDITOS".to_string()),
            subject: lookup("BROKER_SUBJECT").unwrap_or_else(|| "creditos.integrar".to_string()),
            audit_subject: lookup("BROKER_AUDIT_SUBJECT")
                .unwrap_or_else(|| "creditos.auditoria".to_string()),
            dead_letter_subject: lookup("BROKER_DEAD_LETTER_SUBJECT")
                .unwrap_or_else(|| "creditos.deadletter".to_string()),
            consumer_name: lookup("BROKER_CONSUMER_NAME")
                .unwrap_or_else(|| "credit-processor".to_string()),
            max_deliveries: parsed(&lookup, "BROKER_MAX_DELIVERIES", 10)?,
            redelivery_delay: Duration::from_millis(parsed(
                &lookup,
                "BROKER_REDELIVERY_DELAY_MS",
                5000,
            )?),
        };

        if broker.max_deliveries == 0 {
            return Err(ConfigError::InvalidValue("BROKER_MAX_DELIVERIES"));
        }

        let consumer = ConsumerSettings {
            enabled: parsed(&lookup, "CONSUMER_ENABLED", true)?,
            start_delay: Duration::from_millis(parsed(&lookup, "CONSUMER_START_DELAY_MS", 5000)?),
            restart_interval: Duration::from_millis(parsed(
                &lookup,
                "CONSUMER_RESTART_INTERVAL_MS",
                5000,
            )?),
            shutdown_timeout: Duration::from_secs(parsed(
                &lookup,
                "CONSUMER_SHUTDOWN_TIMEOUT_SECS",
                30,
            )?),
        };

        let breaker = BreakerSettings {
            failure_threshold: parsed(&lookup, "BREAKER_FAILURE_THRESHOLD", 3)?,
            open_duration: Duration::from_secs(parsed(&lookup, "BREAKER_OPEN_SECS", 30)?),
        };

        if breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue("BREAKER_FAILURE_THRESHOLD"));
        }

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            log_format,
            broker,
            consumer,
            breaker,
        })
    }
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnv(key)),
    }
}

fn parsed<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key)),
        None => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
