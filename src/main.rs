//! NexBot - Main Entry Point
//!
//! Runs the plugin-based userbot against Telegram, or against a local
//! console session with `--console`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Input, Password};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use nexbot::commands::{CommandHandler, RateLimiter};
use nexbot::config::{BotSettings, TelegramConfig};
use nexbot::health::{HealthMessage, HealthMonitor};
use nexbot::plugins::{PluginCatalog, PluginManager, Services};
use nexbot::storage::Database;
use nexbot::telegram::{TelegramBot, TelegramError};
use nexbot::transport::{ChatKind, IncomingMessage, MemoryTransport, Transport, TransportEvent};

/// Chat id used for the local console session.
const CONSOLE_CHAT_ID: i64 = 1;

/// Owner id assumed by the console session when none is configured.
const CONSOLE_OWNER_ID: i64 = 1;

/// How often the rate limiter drops expired entries.
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Plugin-based Telegram userbot.
#[derive(Parser, Debug)]
#[command(name = "nexbot")]
#[command(about = "Plugin-based Telegram userbot")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error). Overrides `LOG_LEVEL`;
    /// `RUST_LOG` overrides both.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Read commands from stdin instead of connecting to Telegram.
    #[arg(long)]
    console: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logging level may come from .env, so load it first and report after.
    let env_loaded = dotenvy::from_filename(&args.env_file);

    let settings = BotSettings::from_env_with_defaults();
    init_logging(args.log_level.as_deref().unwrap_or(&settings.log_level));

    if let Err(e) = env_loaded {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    if let Some(parent) = settings.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let store = Database::open(&settings.db_path)
        .with_context(|| format!("Failed to open database {}", settings.db_path.display()))?;

    let services = Services {
        store: Arc::new(store),
        health: Arc::new(HealthMonitor::new()),
        limiter: Arc::new(RateLimiter::new(settings.rate_limit())),
        prefix: settings.active_prefix().to_owned(),
    };

    let manager = PluginManager::new(services, PluginCatalog::with_builtins())
        .context("Failed to create plugin manager")?;

    if args.console {
        run_console(manager, &settings).await
    } else {
        run_telegram(manager, &settings).await
    }
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run_telegram(manager: Arc<PluginManager>, settings: &BotSettings) -> Result<()> {
    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;

    let bot = TelegramBot::connect(&tg_config)
        .await
        .context("Failed to connect to Telegram")?;

    if !bot.is_authorized().await.context("Failed to check authorization")? {
        authenticate(&bot, &tg_config).await?;
    }

    let owner_id = match settings.owner_id {
        Some(id) => id,
        None => bot.account_id().await.context("Failed to resolve own user id")?,
    };

    let bot = Arc::new(bot);
    let (tx, rx) = mpsc::channel::<IncomingMessage>(256);
    let pump = bot.listen(tx).await.context("Failed to start update stream")?;

    let transport: Arc<dyn Transport> = bot.clone();
    serve(manager, transport, owner_id, rx, settings).await;

    pump.abort();
    bot.disconnect();
    Ok(())
}

async fn run_console(manager: Arc<PluginManager>, settings: &BotSettings) -> Result<()> {
    let owner_id = settings.owner_id.unwrap_or(CONSOLE_OWNER_ID);

    let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new().with_sink(sink_tx));

    let printer = tokio::spawn(async move {
        while let Some(event) = sink_rx.recv().await {
            match event {
                TransportEvent::Sent { message, .. } => println!("<< {}", message.text),
                TransportEvent::Edited { target, message } => {
                    println!("<< [edit #{}] {}", target.message_id, message.text);
                }
                TransportEvent::Deleted { target, .. } => {
                    println!("<< [deleted #{}]", target.message_id);
                }
            }
        }
    });

    let (tx, rx) = mpsc::channel::<IncomingMessage>(32);
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut next_id = 1;
        while let Ok(Some(line)) = lines.next_line().await {
            let mut message = IncomingMessage::new(CONSOLE_CHAT_ID, next_id, line)
                .with_sender(owner_id)
                .with_chat_kind(ChatKind::Private);
            message.outgoing = true;
            next_id += 1;

            if tx.send(message).await.is_err() {
                break;
            }
        }
        debug!("Console input closed");
    });

    info!("Console mode, type commands with prefix {:?}", settings.active_prefix());
    serve(manager, transport, owner_id, rx, settings).await;

    reader.abort();
    printer.abort();
    Ok(())
}

/// Loads plugins, runs the dispatcher and background tasks until a shutdown
/// signal or until the message stream ends, then unloads everything.
async fn serve(
    manager: Arc<PluginManager>,
    transport: Arc<dyn Transport>,
    owner_id: i64,
    rx: mpsc::Receiver<IncomingMessage>,
    settings: &BotSettings,
) {
    manager.set_transport(Arc::clone(&transport)).await;

    let builtins = manager.load_builtins().await;
    let externals = manager.load_externals().await;
    info!("Loaded {} builtin and {} external plugins", builtins, externals);

    let services = manager.services().clone();

    let (health_tx, health_rx) = mpsc::channel::<HealthMessage>(8);
    let health = Arc::clone(&services.health);
    let interval = settings.health_interval();
    let health_handle = tokio::spawn(async move {
        health.run(interval, health_rx).await;
    });

    let sweeper = services.limiter.spawn_sweeper(SWEEP_INTERVAL);

    let handler = Arc::new(CommandHandler::new(
        Arc::clone(&manager),
        transport,
        owner_id,
    ));
    info!("Command prefix: {}", handler.prefix());
    info!("Owner: {}", owner_id);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handler_handle = tokio::spawn(Arc::clone(&handler).run(rx, shutdown_rx));

    info!("Bot is running. Use Ctrl+C to stop.");

    tokio::select! {
        () = shutdown_signal() => {
            let _ = shutdown_tx.send(true);
            if let Err(e) = (&mut handler_handle).await {
                warn!("Command handler ended abnormally: {}", e);
            }
        }
        result = &mut handler_handle => {
            if let Err(e) = result {
                warn!("Command handler ended abnormally: {}", e);
            }
        }
    }

    info!("Shutting down...");
    let _ = health_tx.send(HealthMessage::Shutdown).await;
    if let Err(e) = health_handle.await {
        warn!("Health monitor ended abnormally: {}", e);
    }
    sweeper.abort();

    manager.unload_all().await;
    info!("{}", services.health.summary());
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
                    _ = term.recv() => info!("Received SIGTERM, shutting down..."),
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }

    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, shutting down...");
}

/// Handles Telegram authentication.
async fn authenticate(bot: &TelegramBot, config: &TelegramConfig) -> Result<()> {
    info!("Authentication required");

    let phone: String = Input::new()
        .with_prompt("Enter your phone number (with country code)")
        .interact_text()?;

    let token = bot
        .request_login_code(&phone, &config.api_hash)
        .await
        .context("Failed to request login code")?;

    info!("Login code sent to your Telegram app");

    let code: String = Input::new()
        .with_prompt("Enter the login code")
        .interact_text()?;

    match bot.sign_in(&token, &code).await {
        Ok(()) => Ok(()),
        Err(TelegramError::PasswordRequired(password_token)) => {
            info!("Two-factor authentication is enabled");

            let hint = password_token.hint().unwrap_or("no hint");
            info!("Password hint: {}", hint);

            let password: String = Password::new()
                .with_prompt("Enter your 2FA password")
                .interact()?;

            bot.check_password(password_token, &password)
                .await
                .context("2FA authentication failed")?;
            Ok(())
        }
        Err(e) => Err(e).context("Authentication failed"),
    }
}
