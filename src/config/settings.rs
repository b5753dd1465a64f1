//! Application settings and Telegram configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::commands::RateLimitConfig;

/// Telegram API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Path to the session file.
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,
}

fn default_session_path() -> PathBuf {
    PathBuf::from("session.db")
}

impl TelegramConfig {
    #[must_use]
    pub fn new(api_id: i32, api_hash: String) -> Self {
        Self {
            api_id,
            api_hash,
            session_path: default_session_path(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `TG_API_ID` and `TG_API_HASH` to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_id: i32 = lookup("TG_API_ID")
            .ok_or(ConfigError::MissingEnvVar("TG_API_ID"))?
            .trim()
            .parse()
            .ok()
            .filter(|id| *id > 0)
            .ok_or(ConfigError::InvalidApiId)?;

        let api_hash = lookup("TG_API_HASH").ok_or(ConfigError::MissingEnvVar("TG_API_HASH"))?;

        let session_path = lookup("TG_SESSION_PATH").map_or_else(default_session_path, PathBuf::from);

        Ok(Self {
            api_id,
            api_hash,
            session_path,
        })
    }
}

/// Bot-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Command prefix in production.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Command prefix used when running in development mode.
    #[serde(default = "default_dev_prefix")]
    pub dev_prefix: String,

    /// Whether `BOT_ENV=development` is set.
    #[serde(default)]
    pub development: bool,

    /// Account allowed to run commands. Falls back to the logged-in account.
    #[serde(default)]
    pub owner_id: Option<i64>,

    /// Path to the SQLite store.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u32,

    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,

    #[serde(default = "default_rate_limit_block")]
    pub rate_limit_block_secs: u64,

    /// Period of the health monitor loop.
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,

    /// Log level for the application.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_command_prefix() -> String {
    ".".to_owned()
}

fn default_dev_prefix() -> String {
    "!".to_owned()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/nexbot.db")
}

const fn default_rate_limit_max() -> u32 {
    10
}

const fn default_rate_limit_window() -> u64 {
    60
}

const fn default_rate_limit_block() -> u64 {
    300
}

const fn default_health_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            command_prefix: default_command_prefix(),
            dev_prefix: default_dev_prefix(),
            development: false,
            owner_id: None,
            db_path: default_db_path(),
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_secs: default_rate_limit_window(),
            rate_limit_block_secs: default_rate_limit_block(),
            health_interval_secs: default_health_interval(),
            log_level: default_log_level(),
        }
    }
}

impl BotSettings {
    /// Creates bot settings from environment variables with defaults.
    ///
    /// Unparseable numeric values fall back to their defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        /// Zero means "unset" for counts and periods.
        fn positive<T>(value: Option<String>, default: T) -> T
        where
            T: std::str::FromStr + Default + PartialEq,
        {
            value
                .and_then(|s| s.trim().parse().ok())
                .filter(|v| *v != T::default())
                .unwrap_or(default)
        }

        Self {
            command_prefix: lookup("CMD_PREFIX")
                .filter(|prefix| !prefix.is_empty())
                .unwrap_or_else(default_command_prefix),
            dev_prefix: default_dev_prefix(),
            development: lookup("BOT_ENV").is_some_and(|env| env.eq_ignore_ascii_case("development")),
            owner_id: lookup("OWNER_ID").and_then(|id| id.trim().parse().ok()),
            db_path: lookup("DB_PATH").map_or_else(default_db_path, PathBuf::from),
            rate_limit_max: positive(lookup("RATE_LIMIT_MAX"), default_rate_limit_max()),
            rate_limit_window_secs: positive(lookup("RATE_LIMIT_WINDOW_SECS"), default_rate_limit_window()),
            rate_limit_block_secs: positive(lookup("RATE_LIMIT_BLOCK_SECS"), default_rate_limit_block()),
            health_interval_secs: positive(lookup("HEALTH_INTERVAL_SECS"), default_health_interval()),
            log_level: lookup("LOG_LEVEL")
                .filter(|level| !level.trim().is_empty())
                .unwrap_or_else(default_log_level),
        }
    }

    /// Prefix the command handler should use: the development prefix in
    /// development mode, otherwise the configured one.
    #[must_use]
    pub fn active_prefix(&self) -> &str {
        if self.development {
            &self.dev_prefix
        } else {
            &self.command_prefix
        }
    }

    #[must_use]
    pub const fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit_max,
            window: Duration::from_secs(self.rate_limit_window_secs),
            block_duration: Duration::from_secs(self.rate_limit_block_secs),
        }
    }

    #[must_use]
    pub const fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,
}
