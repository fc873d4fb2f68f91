//! Application settings and Telegram configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broadcast::PacingPolicy;

/// Telegram API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Bot token issued by `@BotFather`.
    pub bot_token: String,

    /// Path to the session file.
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,
}

fn default_session_path() -> PathBuf {
    PathBuf::from("session.db")
}

impl TelegramConfig {
    /// Creates configuration from environment variables.
    ///
    /// Expects `TG_API_ID`, `TG_API_HASH` and `BOT_TOKEN` to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id: i32 = std::env::var("TG_API_ID")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_ID"))?
            .parse()
            .map_err(|_| ConfigError::InvalidApiId)?;

        let api_hash = std::env::var("TG_API_HASH")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_HASH"))?;

        let bot_token =
            std::env::var("BOT_TOKEN").map_err(|_| ConfigError::MissingEnvVar("BOT_TOKEN"))?;

        let session_path = std::env::var("TG_SESSION_PATH")
            .map_or_else(|_| default_session_path(), PathBuf::from);

        Ok(Self {
            api_id,
            api_hash,
            bot_token,
            session_path,
        })
    }
}

/// Bot-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Telegram user ids allowed to run admin commands.
    #[serde(default)]
    pub admins: Vec<i64>,

    /// Command prefix for bot commands.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Minimum interval between two handled messages of one user, in milliseconds.
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,

    /// Number of broadcast sends between two pacing pauses.
    #[serde(default = "default_batch_size")]
    pub broadcast_batch_size: usize,

    /// Length of a pacing pause, in milliseconds.
    #[serde(default = "default_batch_delay_ms")]
    pub broadcast_batch_delay_ms: u64,

    /// Number of broadcast sends between two progress reports.
    #[serde(default = "default_progress_every")]
    pub broadcast_progress_every: usize,

    /// Trailing window that counts a user as recently active, in days.
    #[serde(default = "default_active_window_days")]
    pub active_window_days: i64,

    /// Path to the JSON user directory.
    #[serde(default = "default_users_path")]
    pub users_path: PathBuf,

    /// Path to the JSON broadcast history.
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
}

fn default_command_prefix() -> String {
    "/".to_owned()
}

fn default_rate_limit_ms() -> u64 {
    500
}

fn default_batch_size() -> usize {
    25 // Telegram allows roughly 30 messages per second for bots
}

fn default_batch_delay_ms() -> u64 {
    1000
}

fn default_progress_every() -> usize {
    100
}

fn default_active_window_days() -> i64 {
    30
}

fn default_users_path() -> PathBuf {
    PathBuf::from("users.json")
}

fn default_history_path() -> PathBuf {
    PathBuf::from("broadcasts.json")
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            admins: Vec::new(),
            command_prefix: default_command_prefix(),
            rate_limit_ms: default_rate_limit_ms(),
            broadcast_batch_size: default_batch_size(),
            broadcast_batch_delay_ms: default_batch_delay_ms(),
            broadcast_progress_every: default_progress_every(),
            active_window_days: default_active_window_days(),
            users_path: default_users_path(),
            history_path: default_history_path(),
        }
    }
}

impl BotSettings {
    /// Creates bot settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self {
            admins: std::env::var("ADMINS")
                .map(|s| parse_admins(&s))
                .unwrap_or_default(),
            command_prefix: std::env::var("COMMAND_PREFIX")
                .unwrap_or_else(|_| default_command_prefix()),
            rate_limit_ms: env_parse("RATE_LIMIT_MS").unwrap_or_else(default_rate_limit_ms),
            broadcast_batch_size: env_parse("BROADCAST_BATCH_SIZE")
                .unwrap_or_else(default_batch_size),
            broadcast_batch_delay_ms: env_parse("BROADCAST_BATCH_DELAY_MS")
                .unwrap_or_else(default_batch_delay_ms),
            broadcast_progress_every: env_parse("BROADCAST_PROGRESS_EVERY")
                .unwrap_or_else(default_progress_every),
            active_window_days: env_parse("ACTIVE_WINDOW_DAYS")
                .unwrap_or_else(default_active_window_days),
            users_path: std::env::var("USERS_PATH")
                .map_or_else(|_| default_users_path(), PathBuf::from),
            history_path: std::env::var("BROADCAST_HISTORY_PATH")
                .map_or_else(|_| default_history_path(), PathBuf::from),
        }
    }

    /// Returns the interactive rate limit window.
    #[must_use]
    pub const fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    /// Returns the pause applied between broadcast batches.
    #[must_use]
    pub const fn broadcast_batch_delay(&self) -> Duration {
        Duration::from_millis(self.broadcast_batch_delay_ms)
    }

    /// Returns the broadcast send cadence.
    #[must_use]
    pub const fn pacing(&self) -> PacingPolicy {
        PacingPolicy {
            batch_size: self.broadcast_batch_size,
            pause: self.broadcast_batch_delay(),
            progress_every: self.broadcast_progress_every,
        }
    }

    /// Checks whether the given user id is a configured admin.
    #[must_use]
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admins.contains(&user_id)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Parses a comma separated admin list, skipping blank and malformed entries.
fn parse_admins(raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,
}
