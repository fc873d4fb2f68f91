//! Configuration module for the bot.
//!
//! Loads Telegram API credentials and bot settings from the environment.

mod settings;

pub use settings::{BotSettings, ConfigError, TelegramConfig};
