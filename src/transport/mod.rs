//! Messaging transport boundary.
//!
//! The dispatch core only needs to read a few facts from an incoming message
//! and to send, edit or delete messages relative to it. Everything here is
//! independent of the wire protocol; the grammers-backed implementation lives
//! in [`crate::telegram`] and an in-process recording one in [`memory`].

mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::{MemoryTransport, TransportEvent};

/// Errors that can occur while talking to the messaging service.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Message {message_id} in chat {chat_id} is not known to the transport")]
    UnknownMessage { chat_id: i64, message_id: i32 },

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Transport disconnected")]
    Disconnected,
}

/// Classification of the chat a message was received in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatKind {
    /// One-to-one conversation with a user.
    Private,
    /// Small legacy group.
    Group,
    /// Megagroup (a channel with group semantics).
    Supergroup,
    /// Broadcast channel.
    Channel,
    #[default]
    Unknown,
}

impl ChatKind {
    #[must_use]
    pub const fn is_private(self) -> bool {
        matches!(self, Self::Private)
    }

    #[must_use]
    pub const fn is_group(self) -> bool {
        matches!(self, Self::Group | Self::Supergroup)
    }

    #[must_use]
    pub const fn is_channel(self) -> bool {
        matches!(self, Self::Channel)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Supergroup => "supergroup",
            Self::Channel => "channel",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of a single message: the chat it lives in and its id there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i32,
}

impl MessageRef {
    #[must_use]
    pub const fn new(chat_id: i64, message_id: i32) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

/// A message delivered by the transport's new-message stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Message id within its chat.
    pub id: i32,

    /// Bare id of the chat the message was sent in.
    pub chat_id: i64,

    /// Chat classification at receive time.
    pub chat_kind: ChatKind,

    /// Bare id of the sender, if the transport could determine one.
    pub sender_id: Option<i64>,

    /// Textual content; empty for media-only messages.
    pub text: String,

    /// Whether the logged-in account sent this message.
    pub outgoing: bool,

    /// Id of the message this one replies to.
    pub reply_to_message_id: Option<i32>,

    /// Server-side send time.
    pub date: DateTime<Utc>,
}

impl IncomingMessage {
    /// Creates a message with the given chat, id and text; everything else
    /// takes neutral defaults.
    #[must_use]
    pub fn new(chat_id: i64, id: i32, text: impl Into<String>) -> Self {
        Self {
            id,
            chat_id,
            chat_kind: ChatKind::Unknown,
            sender_id: None,
            text: text.into(),
            outgoing: false,
            reply_to_message_id: None,
            date: Utc::now(),
        }
    }

    #[must_use]
    pub const fn with_sender(mut self, sender_id: i64) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    #[must_use]
    pub const fn with_chat_kind(mut self, chat_kind: ChatKind) -> Self {
        self.chat_kind = chat_kind;
        self
    }

    /// Reference to this message for reply/edit/delete operations.
    #[must_use]
    pub const fn reference(&self) -> MessageRef {
        MessageRef::new(self.chat_id, self.id)
    }

    /// Returns the text if the message has any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        if self.text.is_empty() {
            None
        } else {
            Some(&self.text)
        }
    }
}

/// Rendering mode for outgoing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    #[default]
    Plain,
    Html,
    Markdown,
}

/// A message to be sent or used as the new content of an edit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingMessage {
    pub text: String,
    pub parse_mode: ParseMode,
    /// Message id in the same chat to reply to.
    pub reply_to: Option<i32>,
    /// Send without a notification.
    pub silent: bool,
    /// Render link previews.
    pub link_preview: bool,
}

impl OutgoingMessage {
    /// Plain-text message.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// HTML-formatted message.
    #[must_use]
    pub fn html(html: impl Into<String>) -> Self {
        Self {
            text: html.into(),
            parse_mode: ParseMode::Html,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn reply_to(mut self, message_id: Option<i32>) -> Self {
        self.reply_to = message_id;
        self
    }
}

/// Operations the dispatch core needs from a messaging client.
///
/// All operations are addressed relative to a known message: sends go to
/// the chat that `anchor` belongs to.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a new message into the chat of `anchor`.
    async fn send_message(
        &self,
        anchor: &MessageRef,
        message: OutgoingMessage,
    ) -> Result<MessageRef, TransportError>;

    /// Replaces the content of `target`.
    async fn edit_message(
        &self,
        target: &MessageRef,
        message: OutgoingMessage,
    ) -> Result<MessageRef, TransportError>;

    /// Deletes `target`, for everyone when `revoke` is set.
    async fn delete_message(&self, target: &MessageRef, revoke: bool)
    -> Result<(), TransportError>;
}
