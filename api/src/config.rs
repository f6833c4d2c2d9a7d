use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_LAUNCH_MAX_AGE_SECS: u64 = 86_400;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Process configuration, read once at startup and passed down explicitly.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub bot_token: String,
    pub webapp_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    /// `None` disables the launch credential freshness check.
    pub launch_max_age: Option<Duration>,
    pub shutdown_grace: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("webapp_url", &self.webapp_url)
            .field("port", &self.port)
            .field("db_max_connections", &self.db_max_connections)
            .field("launch_max_age", &self.launch_max_age)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let database_url = require("DATABASE_URL")?;
        let bot_token = require("BOT_TOKEN")?;
        let webapp_url = require("WEBAPP_URL")?;

        let port = parse_or("PORT", get("PORT"), DEFAULT_PORT)?;
        let db_max_connections = parse_or(
            "DB_MAX_CONNECTIONS",
            get("DB_MAX_CONNECTIONS"),
            DEFAULT_DB_MAX_CONNECTIONS,
        )?;
        let launch_max_age_secs: u64 = parse_or(
            "LAUNCH_MAX_AGE_SECS",
            get("LAUNCH_MAX_AGE_SECS"),
            DEFAULT_LAUNCH_MAX_AGE_SECS,
        )?;
        let shutdown_grace_secs: u64 = parse_or(
            "SHUTDOWN_GRACE_SECS",
            get("SHUTDOWN_GRACE_SECS"),
            DEFAULT_SHUTDOWN_GRACE_SECS,
        )?;

        Ok(Self {
            database_url,
            bot_token,
            webapp_url,
            port,
            db_max_connections,
            launch_max_age: (launch_max_age_secs > 0)
                .then(|| Duration::from_secs(launch_max_age_secs)),
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
