use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub log_level: String,
    pub queue: QueueConfig,
}

/// Tunables for claiming, backoff and delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub dispatch_interval: Duration,
    pub batch_size: i64,
    /// How long a claimed entry stays invisible to other claimants.
    pub claim_lease: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: i32,
    pub backoff_multiplier: f64,
    pub delivery_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_millis(30_000),
            batch_size: 10,
            claim_lease: Duration::from_secs(300),
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(300_000),
            max_attempts: 5,
            backoff_multiplier: 2.0,
            delivery_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;

        let max_connections: u32 = env_or("QUEUE_MAX_CONNECTIONS", "10")
            .parse()
            .map_err(|e| format!("Invalid QUEUE_MAX_CONNECTIONS: {e}"))?;

        let log_level = env_or("QUEUE_LOG_LEVEL", "info");

        Ok(Config {
            database_url,
            max_connections,
            log_level,
            queue: QueueConfig::from_env()?,
        })
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; `from_env` passes the process environment.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let dispatch_interval =
            Duration::from_millis(parse_var(&lookup, "QUEUE_DISPATCH_INTERVAL_MS", "30000")?);
        let batch_size: i64 = parse_var(&lookup, "QUEUE_BATCH_SIZE", "10")?;
        if batch_size < 1 {
            return Err(format!("Invalid QUEUE_BATCH_SIZE: must be positive, got {batch_size}"));
        }

        let claim_lease = Duration::from_secs(parse_var(&lookup, "QUEUE_CLAIM_LEASE_SECS", "300")?);
        let base_delay = Duration::from_millis(parse_var(&lookup, "QUEUE_BASE_DELAY_MS", "1000")?);
        let max_delay = Duration::from_millis(parse_var(&lookup, "QUEUE_MAX_DELAY_MS", "300000")?);
        if max_delay < base_delay {
            return Err("Invalid QUEUE_MAX_DELAY_MS: must not be below QUEUE_BASE_DELAY_MS".to_string());
        }

        let max_attempts: i32 = parse_var(&lookup, "QUEUE_MAX_ATTEMPTS", "5")?;
        if max_attempts < 1 {
            return Err(format!("Invalid QUEUE_MAX_ATTEMPTS: must be at least 1, got {max_attempts}"));
        }

        let backoff_multiplier: f64 =
            parse_var(&lookup, "QUEUE_BACKOFF_MULTIPLIER", "2.0")?;
        if !backoff_multiplier.is_finite() || backoff_multiplier <= 0.0 {
            return Err(format!("Invalid QUEUE_BACKOFF_MULTIPLIER: {backoff_multiplier}"));
        }

        let delivery_timeout =
            Duration::from_secs(parse_var(&lookup, "QUEUE_DELIVERY_TIMEOUT_SECS", "30")?);

        Ok(QueueConfig {
            dispatch_interval,
            batch_size,
            claim_lease,
            base_delay,
            max_delay,
            max_attempts,
            backoff_multiplier,
            delivery_timeout,
        })
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .as_deref()
        .unwrap_or(default)
        .parse()
        .map_err(|e| format!("Invalid {key}: {e}"))
}
