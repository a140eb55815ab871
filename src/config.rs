use std::str::FromStr;
use std::time::Duration;

use crate::error::{CsvServiceError, Result};

pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_MAIL_SENDER: &str = "noreply@localhost";

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub database_url: String,
    pub notification_recipient: String,
    pub mail_relay_url: Option<String>,
    pub mail_relay_token: Option<String>,
    pub mail_sender: String,
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// `None` disables the periodic retry scan.
    pub retry_interval: Option<Duration>,
}

impl ServiceConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| CsvServiceError::ConfigError {
                    message: format!("{} environment variable is required", key),
                })
        };

        let worker_count: usize = parse_or(&lookup, "WORKER_COUNT", DEFAULT_WORKER_COUNT)?;
        if worker_count == 0 {
            return Err(CsvServiceError::ConfigError {
                message: "WORKER_COUNT must be at least 1".to_string(),
            });
        }

        let queue_capacity: usize = parse_or(&lookup, "QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;
        if queue_capacity == 0 {
            return Err(CsvServiceError::ConfigError {
                message: "QUEUE_CAPACITY must be at least 1".to_string(),
            });
        }

        let retry_secs: u64 = parse_or(
            &lookup,
            "RETRY_INTERVAL_SECS",
            DEFAULT_RETRY_INTERVAL_SECS,
        )?;

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            notification_recipient: required("NOTIFICATION_RECIPIENT")?,
            mail_relay_url: lookup("MAIL_RELAY_URL").filter(|v| !v.trim().is_empty()),
            mail_relay_token: lookup("MAIL_RELAY_TOKEN").filter(|v| !v.trim().is_empty()),
            mail_sender: lookup("MAIL_SENDER").unwrap_or_else(|| DEFAULT_MAIL_SENDER.to_string()),
            worker_count,
            queue_capacity,
            retry_interval: (retry_secs > 0).then(|| Duration::from_secs(retry_secs)),
        })
    }

    /// The database URL with the credentials section replaced by `***`.
    pub fn masked_database_url(&self) -> String {
        mask_credentials(&self.database_url)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e| CsvServiceError::ConfigError {
            message: format!("Invalid {} '{}': {}", key, raw, e),
        }),
    }
}

fn mask_credentials(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end + 3 => {
            format!("{}***{}", &url[..scheme_end + 3], &url[at..])
        }
        _ => url.to_string(),
    }
}
