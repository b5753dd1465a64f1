//! Command handler implementation.
//!
//! Each incoming message is handled independently:
//! 1. Messages without text are ignored
//! 2. Text without the prefix goes to the plugin observers
//! 3. The command is resolved; unknown commands are ignored silently
//! 4. Senders other than the owner are ignored silently
//! 5. The `(sender, command)` pair is rate limited
//! 6. The handler runs; failures are reported back to the chat

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::context::CommandContext;
use super::rate_limiter::{RateLimiter, rate_limit_key};
use super::types::{CommandLine, ParsedCommand};
use crate::health::HealthMonitor;
use crate::plugins::{ObserverReport, PluginManager};
use crate::transport::{IncomingMessage, MessageRef, OutgoingMessage, Transport};

/// What happened to a dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No text, or only the prefix.
    Ignored,
    /// Plain text passed to the plugin observers.
    Observed(ObserverReport),
    UnknownCommand,
    Unauthorized,
    RateLimited { retry_after_secs: u64 },
    Executed,
    Failed,
}

/// Single entry point for incoming messages.
pub struct CommandHandler {
    /// Active command prefix.
    prefix: String,

    /// The only account allowed to run commands.
    owner_id: i64,

    manager: Arc<PluginManager>,
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    health: Arc<HealthMonitor>,
}

impl CommandHandler {
    /// Creates a handler using the manager's prefix, limiter and health
    /// monitor.
    #[must_use]
    pub fn new(manager: Arc<PluginManager>, transport: Arc<dyn Transport>, owner_id: i64) -> Self {
        let services = manager.services().clone();
        Self {
            prefix: services.prefix,
            owner_id,
            manager,
            transport,
            limiter: services.limiter,
            health: services.health,
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub const fn owner_id(&self) -> i64 {
        self.owner_id
    }

    /// Processes one incoming message.
    pub async fn handle_message(&self, message: IncomingMessage) -> DispatchOutcome {
        let Some(text) = message.text() else {
            return DispatchOutcome::Ignored;
        };

        let command = match ParsedCommand::parse(text, &self.prefix) {
            CommandLine::Plain => {
                let report = self.manager.handle_message(&message).await;
                self.health.record_message(report.is_success());
                return DispatchOutcome::Observed(report);
            }
            CommandLine::Empty => return DispatchOutcome::Ignored,
            CommandLine::Command(command) => command,
        };

        let Some(resolved) = self.manager.get_command(&command.name).await else {
            debug!("Ignoring unknown command: {}", command.name);
            return DispatchOutcome::UnknownCommand;
        };

        let Some(sender_id) = message.sender_id else {
            warn!("Could not determine sender of message {}", message.id);
            return DispatchOutcome::Unauthorized;
        };
        if sender_id != self.owner_id {
            debug!("Ignoring command {} from {}", command.name, sender_id);
            return DispatchOutcome::Unauthorized;
        }

        let trigger = message.reference();
        let decision = self
            .limiter
            .record(&rate_limit_key(sender_id, &command.name))
            .await;
        if !decision.allowed {
            let retry_after_secs = decision.retry_after_secs();
            let notice = OutgoingMessage::text(format!(
                "⏱️ Too many requests, try again in {retry_after_secs} seconds"
            ))
            .reply_to(Some(trigger.message_id));
            if let Err(e) = self.transport.send_message(&trigger, notice).await {
                error!("Failed to send rate limit notice: {}", e);
            }
            self.health.record_command(false);
            return DispatchOutcome::RateLimited { retry_after_secs };
        }

        let ctx = CommandContext::new(Arc::clone(&self.transport), &message, true);
        let result = AssertUnwindSafe(resolved.definition.invoke(message, command.args, ctx))
            .catch_unwind()
            .await;

        let failure = match result {
            Ok(Ok(())) => {
                debug!("Command executed: {} [{}]", command.name, sender_id);
                self.health.record_command(true);
                return DispatchOutcome::Executed;
            }
            Ok(Err(e)) => {
                error!("Command {} failed: {:?}", command.name, e);
                e.to_string()
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!("Command {} panicked: {}", command.name, reason);
                reason
            }
        };

        self.health.record_command(false);
        self.notify_failure(&trigger, &failure).await;
        DispatchOutcome::Failed
    }

    async fn notify_failure(&self, trigger: &MessageRef, reason: &str) {
        let notice = OutgoingMessage::text(format!("❌ Command execution error: {reason}"));
        if let Err(e) = self.transport.send_message(trigger, notice).await {
            error!("Failed to send error notice: {}", e);
        }
    }

    /// Dispatches messages from `rx`, each on its own task, until the
    /// stream ends or `shutdown` fires.
    ///
    /// When the stream ends in-flight commands are awaited; on shutdown
    /// they are aborted.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<IncomingMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Command handler started (prefix {:?})", self.prefix);

        let mut tasks = JoinSet::new();
        let aborted = loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(message) = msg else {
                        info!("Message stream closed");
                        break false;
                    };
                    let handler = Arc::clone(&self);
                    tasks.spawn(async move { handler.handle_message(message).await });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_joined(joined);
                }
                _ = shutdown.changed() => {
                    info!("Command handler shutting down");
                    break true;
                }
            }
        };

        if aborted {
            tasks.shutdown().await;
        } else {
            while let Some(joined) = tasks.join_next().await {
                log_joined(joined);
            }
        }
    }
}

fn log_joined(joined: Result<DispatchOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) => debug!("Dispatch finished: {:?}", outcome),
        Err(e) if e.is_panic() => error!("Dispatch task panicked: {}", e),
        Err(_) => {}
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_owned())
}
