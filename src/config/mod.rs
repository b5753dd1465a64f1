//! Configuration module for the userbot.
//!
//! Settings come from environment variables (optionally loaded from a
//! `.env` file by the binaries) with defaults for everything except the
//! Telegram API credentials.

mod settings;

pub use settings::{BotSettings, ConfigError, TelegramConfig};
