//! NexBot Library
//!
//! A plugin-based Telegram userbot.
//!
//! This crate provides the core functionality for:
//! - Registering plugins and resolving their commands and aliases
//! - Dispatching prefixed commands with owner checks and rate limiting
//! - Fanning every message out to plugin observers
//! - Persisting plugin state, aliases and sudo users
//! - Connecting to Telegram via `MTProto`

pub mod commands;
pub mod config;
pub mod health;
pub mod plugins;
pub mod storage;
pub mod telegram;
pub mod transport;
