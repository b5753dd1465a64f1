//! Per-invocation execution context handed to command handlers.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::transport::{
    IncomingMessage, MessageRef, OutgoingMessage, ParseMode, Transport, TransportError,
};

/// Which message a reply is linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyTo {
    /// The message that triggered the command.
    #[default]
    Trigger,
    /// Another message in the same chat.
    Message(i32),
    /// Send as a standalone message.
    None,
}

/// Options for replies and edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplyOptions {
    /// Rendering mode; `None` keeps the mode implied by the method used.
    pub parse_mode: Option<ParseMode>,
    pub reply_to: ReplyTo,
    pub silent: bool,
    pub link_preview: bool,
}

impl ReplyOptions {
    #[must_use]
    pub const fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    #[must_use]
    pub const fn with_link_preview(mut self) -> Self {
        self.link_preview = true;
        self
    }

    #[must_use]
    pub const fn reply_to(mut self, reply_to: ReplyTo) -> Self {
        self.reply_to = reply_to;
        self
    }
}

/// Facade over the transport bound to one triggering message.
#[derive(Clone)]
pub struct CommandContext {
    transport: Arc<dyn Transport>,
    trigger: MessageRef,
    pub is_sudo: bool,
    pub is_private: bool,
    pub is_group: bool,
    pub is_channel: bool,
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("trigger", &self.trigger)
            .field("is_sudo", &self.is_sudo)
            .field("is_private", &self.is_private)
            .field("is_group", &self.is_group)
            .field("is_channel", &self.is_channel)
            .finish_non_exhaustive()
    }
}

impl CommandContext {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, message: &IncomingMessage, is_sudo: bool) -> Self {
        Self {
            transport,
            trigger: message.reference(),
            is_sudo,
            is_private: message.chat_kind.is_private(),
            is_group: message.chat_kind.is_group(),
            is_channel: message.chat_kind.is_channel(),
        }
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// The message that triggered the command.
    #[must_use]
    pub const fn trigger(&self) -> MessageRef {
        self.trigger
    }

    /// Sends a new message into the trigger's chat.
    pub async fn reply(
        &self,
        text: impl Into<String>,
        options: ReplyOptions,
    ) -> Result<MessageRef, TransportError> {
        let message = self.outgoing(text.into(), ParseMode::Plain, options);
        self.transport.send_message(&self.trigger, message).await
    }

    pub async fn reply_html(
        &self,
        html: impl Into<String>,
        options: ReplyOptions,
    ) -> Result<MessageRef, TransportError> {
        let message = self.outgoing(html.into(), ParseMode::Html, options);
        self.transport.send_message(&self.trigger, message).await
    }

    /// Replaces the content of the triggering message.
    pub async fn edit(
        &self,
        text: impl Into<String>,
        options: ReplyOptions,
    ) -> Result<MessageRef, TransportError> {
        let message = self.outgoing(text.into(), ParseMode::Plain, options).reply_to(None);
        self.transport.edit_message(&self.trigger, message).await
    }

    pub async fn edit_html(
        &self,
        html: impl Into<String>,
        options: ReplyOptions,
    ) -> Result<MessageRef, TransportError> {
        let message = self.outgoing(html.into(), ParseMode::Html, options).reply_to(None);
        self.transport.edit_message(&self.trigger, message).await
    }

    /// Deletes the triggering message for everyone. Failures are ignored;
    /// the message may already be gone.
    pub async fn delete_message(&self) {
        if let Err(e) = self.transport.delete_message(&self.trigger, true).await {
            debug!("Ignoring delete failure for {:?}: {}", self.trigger, e);
        }
    }

    fn outgoing(&self, text: String, mode: ParseMode, options: ReplyOptions) -> OutgoingMessage {
        let reply_to = match options.reply_to {
            ReplyTo::Trigger => Some(self.trigger.message_id),
            ReplyTo::Message(id) => Some(id),
            ReplyTo::None => None,
        };

        OutgoingMessage {
            text,
            parse_mode: options.parse_mode.unwrap_or(mode),
            reply_to,
            silent: options.silent,
            link_preview: options.link_preview,
        }
    }
}

/// Escapes text for inclusion in HTML-formatted messages.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChatKind, MemoryTransport, TransportEvent};

    fn setup(kind: ChatKind) -> (Arc<MemoryTransport>, CommandContext) {
        let transport = Arc::new(MemoryTransport::new());
        let message = IncomingMessage::new(-100, 55, ".id")
            .with_sender(42)
            .with_chat_kind(kind);
        let ctx = CommandContext::new(transport.clone(), &message, true);
        (transport, ctx)
    }

    #[test]
    fn test_chat_flags() {
        let (_, ctx) = setup(ChatKind::Supergroup);
        assert!(ctx.is_group);
        assert!(!ctx.is_channel);
        assert!(!ctx.is_private);

        let (_, ctx) = setup(ChatKind::Channel);
        assert!(ctx.is_channel);
        assert!(!ctx.is_group);

        let (_, ctx) = setup(ChatKind::Private);
        assert!(ctx.is_private);
    }

    #[tokio::test]
    async fn test_reply_defaults_to_trigger() {
        let (transport, ctx) = setup(ChatKind::Private);
        ctx.reply("pong", ReplyOptions::default()).await.unwrap();
        ctx.reply_html("<b>x</b>", ReplyOptions::default().reply_to(ReplyTo::None).silent())
            .await
            .unwrap();

        let events = transport.events().await;
        let TransportEvent::Sent { anchor, message, .. } = &events[0] else {
            panic!("expected send");
        };
        assert_eq!(*anchor, MessageRef::new(-100, 55));
        assert_eq!(message.reply_to, Some(55));
        assert_eq!(message.parse_mode, ParseMode::Plain);
        assert!(!message.link_preview);

        let TransportEvent::Sent { message, .. } = &events[1] else {
            panic!("expected send");
        };
        assert_eq!(message.reply_to, None);
        assert_eq!(message.parse_mode, ParseMode::Html);
        assert!(message.silent);
    }

    #[tokio::test]
    async fn test_edit_targets_trigger() {
        let (transport, ctx) = setup(ChatKind::Group);
        ctx.edit_html("<i>done</i>", ReplyOptions::default()).await.unwrap();

        let events = transport.events().await;
        assert_eq!(
            events,
            vec![TransportEvent::Edited {
                target: MessageRef::new(-100, 55),
                message: OutgoingMessage::html("<i>done</i>"),
            }]
        );
    }

    #[tokio::test]
    async fn test_delete_revokes() {
        let (transport, ctx) = setup(ChatKind::Private);
        ctx.delete_message().await;
        assert_eq!(
            transport.events().await,
            vec![TransportEvent::Deleted {
                target: MessageRef::new(-100, 55),
                revoke: true
            }]
        );
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
        assert_eq!(escape_html("plain"), "plain");
    }
}
