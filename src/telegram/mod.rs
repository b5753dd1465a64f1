//! Telegram client wrapper module.
//!
//! Connects over `MTProto`, handles interactive sign-in and exposes the
//! account's new-message stream and a [`crate::transport::Transport`]
//! implementation for the dispatcher.

mod client;

pub use client::{PwdToken as PasswordToken, TelegramBot, TelegramError, Token as LoginToken};
