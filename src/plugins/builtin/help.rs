use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::commands::{CommandContext, ReplyOptions, escape_html};
use crate::plugins::{CommandDefinition, Plugin, PluginContext};

use super::{AUTHOR, blockquote, bold, code};

/// Command list and per-command help.
pub struct HelpPlugin {
    ctx: PluginContext,
}

impl HelpPlugin {
    #[must_use]
    pub const fn new(ctx: PluginContext) -> Self {
        Self { ctx }
    }
}

impl Plugin for HelpPlugin {
    fn name(&self) -> &str {
        "help"
    }

    fn description(&self) -> &str {
        "Help system and command list"
    }

    fn author(&self) -> Option<&str> {
        Some(AUTHOR)
    }

    fn commands(&self) -> BTreeMap<String, CommandDefinition> {
        let plugin_ctx = self.ctx.clone();
        let help = CommandDefinition::new("Show help", move |_message, args, ctx| {
            let plugin_ctx = plugin_ctx.clone();
            async move { show_help(&plugin_ctx, &args, &ctx).await }
        })
        .with_aliases(["h", "start"])
        .with_examples(["help", "help ping", "help plugin"]);

        BTreeMap::from([("help".to_owned(), help)])
    }
}

async fn show_help(
    plugin_ctx: &PluginContext,
    args: &[String],
    ctx: &CommandContext,
) -> anyhow::Result<()> {
    let manager = plugin_ctx.manager()?;
    let prefix = plugin_ctx.services.prefix.as_str();

    let Some(name) = args.first().map(|arg| arg.to_lowercase()) else {
        let mut by_plugin: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        for (trigger, command) in manager.get_all_commands().await {
            by_plugin
                .entry(command.plugin)
                .or_default()
                .push((trigger, command.definition.description.clone()));
        }

        let mut listing = String::new();
        for (plugin, commands) in &by_plugin {
            let _ = writeln!(listing, "{}", bold(plugin));
            for (trigger, description) in commands {
                let _ = writeln!(
                    listing,
                    "{} - {}",
                    code(&format!("{prefix}{trigger}")),
                    escape_html(description)
                );
            }
            listing.push('\n');
        }

        let text = format!(
            "{} <i>v{}</i>\n\nPrefix {} · {} for details\n\n{}",
            bold("🤖 NexBot"),
            env!("CARGO_PKG_VERSION"),
            code(prefix),
            code(&format!("{prefix}help <command>")),
            blockquote(&listing),
        );
        ctx.reply_html(text, ReplyOptions::default()).await?;
        return Ok(());
    };

    let Some(command) = manager.get_command(&name).await else {
        ctx.reply(format!("❓ Unknown command: {name}"), ReplyOptions::default())
            .await?;
        return Ok(());
    };

    let definition = &command.definition;
    let mut detail = format!(
        "Description: {}\nPlugin: {}\n",
        escape_html(&definition.description),
        escape_html(&command.plugin)
    );

    if manager.is_cmd_handler_command(&name).await
        && let Some(plugin) = manager.get_plugin(&command.plugin).await
    {
        let split = manager.get_plugin_commands(&command.plugin).await;
        detail.push_str("\n📋 This plugin provides:\n");
        if !split.cmd_handlers.is_empty() {
            let _ = writeln!(detail, "Handlers: {}", escape_html(&split.cmd_handlers.join(", ")));
        }
        if !split.commands.is_empty() {
            let _ = writeln!(detail, "Commands: {}", escape_html(&split.commands.join(", ")));
        }
        if !plugin.description().is_empty() {
            let _ = write!(detail, "\nAbout:\n{}\n", escape_html(plugin.description()));
        }
    }

    if !definition.aliases.is_empty() {
        let _ = writeln!(detail, "\nAliases: {}", escape_html(&definition.aliases.join(", ")));
    }

    if !definition.examples.is_empty() {
        detail.push_str("\nExamples:\n");
        for example in &definition.examples {
            let _ = writeln!(detail, "  {}", escape_html(&format!("{prefix}{example}")));
        }
    }

    let text = format!(
        "{}\n\n{}",
        bold(&format!("📖 Help: {name}")),
        blockquote(&detail)
    );
    ctx.reply_html(text, ReplyOptions::default()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::testing::Harness;
    use crate::plugins::{LegacyFn, PluginCatalog, legacy};

    struct Classic;

    impl crate::plugins::Plugin for Classic {
        fn name(&self) -> &str {
            "classic"
        }

        fn description(&self) -> &str {
            "Old-style plugin"
        }

        fn cmd_handlers(&self) -> std::collections::BTreeMap<String, LegacyFn> {
            std::collections::BTreeMap::from([(
                "weather".to_owned(),
                legacy(|_, _| async { Ok(()) }),
            )])
        }
    }

    #[tokio::test]
    async fn test_overview_lists_canonical_commands() {
        let harness = Harness::builtins().await;
        let replies = harness.run(".help").await;

        assert_eq!(replies.len(), 1);
        let text = &replies[0];
        assert!(text.contains("<code>.ping</code>"));
        assert!(text.contains("<code>.plugin</code>"));
        assert!(!text.contains("<code>.pm</code>"), "aliases are not listed");
    }

    #[tokio::test]
    async fn test_command_detail() {
        let harness = Harness::builtins().await;
        let replies = harness.run(".h plugin").await;

        let text = &replies[0];
        assert!(text.contains("📖 Help: plugin"));
        assert!(text.contains("Aliases: pm, plugins"));
        assert!(text.contains(".plugin list"));
    }

    #[tokio::test]
    async fn test_legacy_detail_lists_plugin_commands() {
        let catalog =
            PluginCatalog::with_builtins().builtin("classic", |_| Ok(Arc::new(Classic)));
        let harness = Harness::new(catalog).await;
        let replies = harness.run(".help weather").await;

        let text = &replies[0];
        assert!(text.contains("Description: weather command"));
        assert!(text.contains("Handlers: weather"));
        assert!(text.contains("Old-style plugin"));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let harness = Harness::builtins().await;
        assert_eq!(harness.run(".help nope").await, vec!["❓ Unknown command: nope"]);
    }
}
