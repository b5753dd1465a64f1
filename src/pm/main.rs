//! Offline plugin-state manager.
//!
//! Inspects and edits the store the daemon uses: which plugins are enabled,
//! persisted command aliases and the sudo table. Changes take effect on the
//! daemon's next start or reload.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use nexbot::config::BotSettings;
use nexbot::storage::{Database, StoreError};

/// Plugin-state manager for the userbot store.
#[derive(Parser, Debug)]
#[command(name = "nexbot-pm")]
#[command(about = "Manage plugin state, aliases and sudo users of a NexBot store")]
#[command(version)]
struct Args {
    /// Path to the SQLite store. Defaults to `DB_PATH` or data/nexbot.db.
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List recorded plugins and their state.
    List,

    /// Enable a plugin.
    Enable { name: String },

    /// Disable a plugin; it is skipped at the next load.
    Disable { name: String },

    /// Forget a plugin record.
    Remove { name: String },

    /// Manage command aliases.
    Alias {
        #[command(subcommand)]
        action: AliasAction,
    },

    /// Manage sudo users.
    Sudo {
        #[command(subcommand)]
        action: SudoAction,
    },
}

#[derive(Subcommand, Debug)]
enum AliasAction {
    List,
    Add { alias: String, command: String },
    Remove { alias: String },
}

#[derive(Subcommand, Debug)]
enum SudoAction {
    List,
    Add { user_id: i64 },
    Remove { user_id: i64 },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let _ = dotenvy::from_filename(&args.env_file);
    let path = args
        .db
        .unwrap_or_else(|| BotSettings::from_env_with_defaults().db_path);

    let store = match Database::open(&path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("✗ Failed to open {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };

    match run(&store, args.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("✗ {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(store: &Database, command: Command) -> Result<ExitCode, StoreError> {
    match command {
        Command::List => {
            let plugins = store.list_plugins()?;
            if plugins.is_empty() {
                println!("No plugins recorded");
            }
            for plugin in &plugins {
                let state = if plugin.enabled { "enabled" } else { "disabled" };
                println!("{:<20} {:<10} {}", plugin.name, plugin.version, state);
            }
        }

        Command::Enable { name } => {
            store.enable_plugin(&name)?;
            println!("✓ Enabled {name}");
        }

        Command::Disable { name } => {
            store.disable_plugin(&name)?;
            println!("✓ Disabled {name}");
        }

        Command::Remove { name } => {
            if store.remove_plugin(&name)? {
                println!("✓ Removed {name}");
            } else {
                eprintln!("✗ No record for {name}");
                return Ok(ExitCode::FAILURE);
            }
        }

        Command::Alias { action } => return alias(store, action),
        Command::Sudo { action } => sudo(store, action)?,
    }

    Ok(ExitCode::SUCCESS)
}

fn alias(store: &Database, action: AliasAction) -> Result<ExitCode, StoreError> {
    match action {
        AliasAction::List => {
            let aliases = store.get_all_aliases()?;
            if aliases.is_empty() {
                println!("No aliases");
            }
            for (alias, command) in &aliases {
                println!("{alias} -> {command}");
            }
        }
        AliasAction::Add { alias, command } => {
            let alias = alias.to_lowercase();
            let command = command.to_lowercase();
            store.set_alias(&alias, &command)?;
            println!("✓ Alias set: {alias} -> {command}");
        }
        AliasAction::Remove { alias } => {
            if !store.remove_alias(&alias.to_lowercase())? {
                eprintln!("✗ No alias {alias}");
                return Ok(ExitCode::FAILURE);
            }
            println!("✓ Alias removed: {alias}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn sudo(store: &Database, action: SudoAction) -> Result<(), StoreError> {
    match action {
        SudoAction::List => {
            let users = store.get_sudo_list()?;
            if users.is_empty() {
                println!("Sudo list is empty");
            }
            for user_id in users {
                println!("{user_id}");
            }
        }
        SudoAction::Add { user_id } => {
            store.add_sudo(user_id)?;
            println!("✓ Sudo granted: {user_id}");
        }
        SudoAction::Remove { user_id } => {
            store.remove_sudo(user_id)?;
            println!("✓ Sudo revoked: {user_id}");
        }
    }
    Ok(())
}
