use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::commands::{CommandContext, ReplyOptions, escape_html};
use crate::plugins::{CommandDefinition, Plugin, PluginContext, PluginError};

use super::{AUTHOR, blockquote, bold, code, usage_line};

/// Runtime plugin management: listing, reload, install/remove and aliases.
pub struct PluginAdminPlugin {
    ctx: PluginContext,
}

impl PluginAdminPlugin {
    #[must_use]
    pub const fn new(ctx: PluginContext) -> Self {
        Self { ctx }
    }
}

impl Plugin for PluginAdminPlugin {
    fn name(&self) -> &str {
        "plugin"
    }

    fn description(&self) -> &str {
        "Plugin manager"
    }

    fn author(&self) -> Option<&str> {
        Some(AUTHOR)
    }

    fn commands(&self) -> BTreeMap<String, CommandDefinition> {
        let plugin_ctx = self.ctx.clone();
        let plugin = CommandDefinition::new("Manage plugins", move |_message, args, ctx| {
            let plugin_ctx = plugin_ctx.clone();
            async move { manage(&plugin_ctx, &args, &ctx).await }
        })
        .sudo(true)
        .with_aliases(["pm", "plugins"])
        .with_examples(["plugin list", "plugin install <name>", "plugin remove <name>"]);

        BTreeMap::from([("plugin".to_owned(), plugin)])
    }
}

async fn manage(
    plugin_ctx: &PluginContext,
    args: &[String],
    ctx: &CommandContext,
) -> anyhow::Result<()> {
    let manager = plugin_ctx.manager()?;
    let prefix = plugin_ctx.services.prefix.as_str();
    let action = args.first().map(|arg| arg.to_lowercase());
    let target = args.get(1).map(String::as_str);
    let options = ReplyOptions::default();

    match action.as_deref() {
        Some("list" | "ls") => {
            let mut listing = String::new();
            for summary in manager.list_plugins().await {
                let split = manager.get_plugin_commands(&summary.name).await;
                let commands: Vec<String> = split
                    .commands
                    .iter()
                    .chain(&split.cmd_handlers)
                    .map(|command| code(command))
                    .collect();

                if commands.is_empty() {
                    let _ = writeln!(
                        listing,
                        "{} v{} [{}]\n  (no commands)\n",
                        escape_html(&summary.name),
                        escape_html(&summary.version),
                        summary.origin
                    );
                } else {
                    let _ = writeln!(
                        listing,
                        "{} v{} [{}] ({} commands)\n  {}\n",
                        escape_html(&summary.name),
                        escape_html(&summary.version),
                        summary.origin,
                        commands.len(),
                        commands.join(" ")
                    );
                }
            }

            let text = format!(
                "{}\n\n{}\n\nUse {} for details",
                bold("📦 Loaded plugins"),
                blockquote(&listing),
                code(&format!("{prefix}help <command>"))
            );
            ctx.reply_html(text, options).await?;
        }

        Some("reload" | "r") => {
            let Some(name) = target else {
                ctx.reply("❓ Specify a plugin name", options).await?;
                return Ok(());
            };
            if manager.reload_plugin(name).await {
                ctx.reply(format!("✅ Plugin {name} reloaded"), options).await?;
            } else {
                ctx.reply(format!("❌ Failed to reload plugin {name}"), options)
                    .await?;
            }
        }

        Some("reloadall" | "ra") => {
            let summary = manager.reload_all().await;
            let text = if summary.failed == 0 {
                format!("✅ All plugins reloaded ({})", summary.reloaded)
            } else {
                format!(
                    "⚠️ Reloaded {} plugins, {} failed",
                    summary.reloaded, summary.failed
                )
            };
            ctx.reply(text, options).await?;
        }

        Some("install" | "i") => {
            let Some(name) = target else {
                ctx.reply("❓ Specify a plugin name\nUsage: plugin install <name>", options)
                    .await?;
                return Ok(());
            };
            let text = match manager.install_plugin(name).await {
                Ok(()) => format!("✅ Plugin \"{name}\" installed"),
                Err(PluginError::NotFound(_)) => format!(
                    "❌ Plugin \"{name}\" does not exist\nUse {prefix}plugin list to see loaded plugins"
                ),
                Err(PluginError::AlreadyInstalled(_)) => {
                    format!("⚠️ Plugin \"{name}\" is already installed")
                }
                Err(e) => format!("❌ Plugin \"{name}\" failed to load:\n{e}"),
            };
            ctx.reply(text, options).await?;
        }

        Some("remove" | "uninstall" | "rm") => {
            let Some(name) = target else {
                ctx.reply("❓ Specify a plugin name\nUsage: plugin remove <name>", options)
                    .await?;
                return Ok(());
            };
            let text = match manager.uninstall_plugin(name).await {
                Ok(()) => format!("✅ Plugin \"{name}\" removed"),
                Err(PluginError::NotInstalled(_)) => {
                    format!("⚠️ Plugin \"{name}\" is not installed")
                }
                Err(PluginError::Builtin(_)) => {
                    format!("⚠️ Plugin \"{name}\" is builtin and cannot be removed")
                }
                Err(e) => return Err(e.into()),
            };
            ctx.reply(text, options).await?;
        }

        Some("alias") => alias(plugin_ctx, &args[1..], ctx).await?,

        _ => {
            let text = [
                bold("🔌 Plugin management"),
                String::new(),
                usage_line(prefix, "plugin list", "list loaded plugins"),
                usage_line(prefix, "plugin install <name>", "install a plugin"),
                usage_line(prefix, "plugin remove <name>", "remove a plugin"),
                usage_line(prefix, "plugin reload <name>", "reload one plugin"),
                usage_line(prefix, "plugin reloadall", "reload all plugins"),
                usage_line(prefix, "plugin alias", "show command aliases"),
            ]
            .join("\n");
            ctx.reply_html(text, options).await?;
        }
    }

    Ok(())
}

async fn alias(
    plugin_ctx: &PluginContext,
    args: &[String],
    ctx: &CommandContext,
) -> anyhow::Result<()> {
    let manager = plugin_ctx.manager()?;
    let options = ReplyOptions::default();

    match args.first().map(|arg| arg.to_lowercase()).as_deref() {
        Some("add") => {
            let (Some(alias), Some(command)) = (args.get(1), args.get(2)) else {
                ctx.reply("❓ Usage: plugin alias add <alias> <command>", options)
                    .await?;
                return Ok(());
            };
            manager.set_alias(alias, command).await?;
            ctx.reply(format!("✅ Alias set: {alias} -> {command}"), options)
                .await?;
        }

        Some("remove" | "rm") => {
            let Some(alias) = args.get(1) else {
                ctx.reply("❓ Specify an alias", options).await?;
                return Ok(());
            };
            manager.remove_alias(alias).await?;
            ctx.reply(format!("✅ Alias removed: {alias}"), options).await?;
        }

        _ => {
            let aliases = manager.get_aliases().await;
            let title = bold("🏷️ Command aliases");
            if aliases.is_empty() {
                ctx.reply_html(format!("{title}\n\nNo aliases"), options)
                    .await?;
                return Ok(());
            }

            let mut listing = String::new();
            for (alias, command) in &aliases {
                let _ = writeln!(listing, "{} -&gt; {}", escape_html(alias), escape_html(command));
            }
            ctx.reply_html(format!("{title}\n\n{}", blockquote(&listing)), options)
                .await?;
        }
    }

    Ok(())
}
