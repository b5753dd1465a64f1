//! Plugin contract and command definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::commands::CommandContext;
use crate::transport::{IncomingMessage, Transport};

/// Version reported by plugins that do not declare one.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Future returned by command handlers.
pub type CommandFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Declarative command handler: `(message, args, context)`.
pub type CommandFn =
    Arc<dyn Fn(IncomingMessage, Vec<String>, CommandContext) -> CommandFuture + Send + Sync>;

/// Legacy command handler: `(message, args)` without a context.
pub type LegacyFn = Arc<dyn Fn(IncomingMessage, Vec<String>) -> CommandFuture + Send + Sync>;

/// How a command was declared by its plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStyle {
    /// Through [`Plugin::commands`].
    Declarative,
    /// Through [`Plugin::cmd_handlers`].
    Legacy,
}

/// A named, invocable command.
#[derive(Clone)]
pub struct CommandDefinition {
    pub description: String,
    pub handler: CommandFn,
    pub aliases: Vec<String>,
    pub examples: Vec<String>,
    /// Advisory flag; dispatch authorizes by owner identity only.
    pub sudo: bool,
    pub style: RegistrationStyle,
}

impl CommandDefinition {
    /// Creates a declarative command from an async closure.
    pub fn new<F, Fut>(description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(IncomingMessage, Vec<String>, CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            description: description.into(),
            handler: Arc::new(move |message, args, ctx| Box::pin(handler(message, args, ctx))),
            aliases: Vec::new(),
            examples: Vec::new(),
            sudo: false,
            style: RegistrationStyle::Declarative,
        }
    }

    /// Wraps a legacy handler. The context is dropped and the arguments are
    /// forwarded unchanged.
    #[must_use]
    pub fn from_legacy(name: &str, handler: LegacyFn) -> Self {
        Self {
            description: format!("{name} command"),
            handler: Arc::new(move |message, args, _ctx| handler(message, args)),
            aliases: Vec::new(),
            examples: Vec::new(),
            sudo: false,
            style: RegistrationStyle::Legacy,
        }
    }

    #[must_use]
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_examples<I, S>(mut self, examples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.examples = examples.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// Runs the handler.
    pub async fn invoke(
        &self,
        message: IncomingMessage,
        args: Vec<String>,
        ctx: CommandContext,
    ) -> anyhow::Result<()> {
        (self.handler)(message, args, ctx).await
    }
}

impl fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("description", &self.description)
            .field("aliases", &self.aliases)
            .field("examples", &self.examples)
            .field("sudo", &self.sudo)
            .field("style", &self.style)
            .finish_non_exhaustive()
    }
}

/// Boxes an async closure as a [`LegacyFn`].
pub fn legacy<F, Fut>(handler: F) -> LegacyFn
where
    F: Fn(IncomingMessage, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |message, args| Box::pin(handler(message, args)))
}

/// An independently loadable unit exposing commands and/or a message
/// observer.
///
/// Lifetime of a registered plugin: `on_init` once, then any number of
/// `on_message` calls and command invocations, then `on_unload` once.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        DEFAULT_VERSION
    }

    fn description(&self) -> &str;

    fn author(&self) -> Option<&str> {
        None
    }

    /// Commands keyed by canonical name.
    fn commands(&self) -> BTreeMap<String, CommandDefinition> {
        BTreeMap::new()
    }

    /// Legacy handlers keyed by command name.
    fn cmd_handlers(&self) -> BTreeMap<String, LegacyFn> {
        BTreeMap::new()
    }

    async fn on_init(&self, _transport: Arc<dyn Transport>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_unload(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Passive observer for every non-command message.
    async fn on_message(
        &self,
        _message: &IncomingMessage,
        _transport: Arc<dyn Transport>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::transport::MemoryTransport;

    fn context() -> CommandContext {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
        CommandContext::new(transport, &IncomingMessage::new(1, 1, ".x"), true)
    }

    #[tokio::test]
    async fn test_from_legacy_forwards_args() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = legacy(move |_message, args| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().extend(args);
                Ok(())
            }
        });

        let definition = CommandDefinition::from_legacy("weather", handler);
        assert_eq!(definition.description, "weather command");
        assert_eq!(definition.style, RegistrationStyle::Legacy);
        assert!(definition.aliases.is_empty());

        definition
            .invoke(
                IncomingMessage::new(1, 1, ".weather Paris now"),
                vec!["Paris".to_owned(), "now".to_owned()],
                context(),
            )
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["Paris", "now"]);
    }

    #[tokio::test]
    async fn test_declarative_builder() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let definition = CommandDefinition::new("Echo text", move |_message, _args, _ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .with_aliases(["say"])
        .with_examples([".echo hi"])
        .sudo(true);

        assert_eq!(definition.style, RegistrationStyle::Declarative);
        assert_eq!(definition.aliases, vec!["say"]);
        assert!(definition.sudo);

        definition
            .invoke(IncomingMessage::new(1, 1, ".echo"), Vec::new(), context())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
