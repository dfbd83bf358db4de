use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result, bail};
use chrono::TimeDelta;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sweep: SweepConfig,
    pub doses: DoseConfig,
    pub push: PushConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `None` runs the service on the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    pub grace: TimeDelta,
}

#[derive(Debug, Clone)]
pub struct DoseConfig {
    pub on_time_tolerance: TimeDelta,
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub fcm_endpoint: Option<String>,
    pub fcm_access_token: Option<String>,
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig { port: 3000 },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                timeout: Duration::from_millis(5_000),
            },
            sweep: SweepConfig {
                interval: Duration::from_secs(3_600),
                grace: TimeDelta::minutes(120),
            },
            doses: DoseConfig {
                on_time_tolerance: TimeDelta::minutes(30),
            },
            push: PushConfig {
                fcm_endpoint: None,
                fcm_access_token: None,
                timeout: Duration::from_millis(10_000),
            },
        }
    }
}

/// Reads the configuration from the process environment (`.env` is loaded by bootstrap).
pub fn load() -> Result<Config> {
    from_lookup(|key| std::env::var(key).ok())
}

fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let defaults = Config::default();

    Ok(Config {
        server: ServerConfig {
            port: parse_or(&lookup, "SERVER_PORT", defaults.server.port)?,
        },
        database: DatabaseConfig {
            url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            max_connections: non_zero(
                "DATABASE_MAX_CONNECTIONS",
                parse_or(
                    &lookup,
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
            )?,
            timeout: Duration::from_millis(parse_or(&lookup, "STORAGE_TIMEOUT_MS", 5_000)?),
        },
        sweep: SweepConfig {
            interval: Duration::from_secs(non_zero(
                "SWEEP_INTERVAL_SECS",
                parse_or(&lookup, "SWEEP_INTERVAL_SECS", 3_600)?,
            )?),
            grace: minutes(&lookup, "SWEEP_GRACE_MINUTES", 120)?,
        },
        doses: DoseConfig {
            on_time_tolerance: minutes(&lookup, "DOSE_TOLERANCE_MINUTES", 30)?,
        },
        push: PushConfig {
            fcm_endpoint: lookup("FCM_ENDPOINT").filter(|v| !v.is_empty()),
            fcm_access_token: lookup("FCM_ACCESS_TOKEN").filter(|v| !v.is_empty()),
            timeout: Duration::from_millis(parse_or(&lookup, "PUSH_TIMEOUT_MS", 10_000)?),
        },
    })
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

fn non_zero<T: Default + PartialEq>(key: &str, value: T) -> Result<T> {
    if value == T::default() {
        bail!("Invalid value for {key}: must be greater than zero");
    }
    Ok(value)
}

fn minutes(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: i64) -> Result<TimeDelta> {
    let value: i64 = parse_or(lookup, key, default)?;
    if value < 0 {
        bail!("Invalid value for {key}: {value} is negative");
    }
    TimeDelta::try_minutes(value)
        .with_context(|| format!("Invalid value for {key}: {value} minutes is out of range"))
}
