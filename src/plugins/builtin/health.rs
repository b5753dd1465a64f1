use std::collections::BTreeMap;

use crate::commands::{ReplyOptions, escape_html};
use crate::health::format_uptime;
use crate::plugins::{CommandDefinition, Plugin, PluginContext};

use super::{AUTHOR, bold};

/// Reports runtime health.
pub struct HealthPlugin {
    ctx: PluginContext,
}

impl HealthPlugin {
    #[must_use]
    pub const fn new(ctx: PluginContext) -> Self {
        Self { ctx }
    }
}

impl Plugin for HealthPlugin {
    fn name(&self) -> &str {
        "health"
    }

    fn description(&self) -> &str {
        "Health status"
    }

    fn author(&self) -> Option<&str> {
        Some(AUTHOR)
    }

    fn commands(&self) -> BTreeMap<String, CommandDefinition> {
        let plugin_ctx = self.ctx.clone();
        let health = CommandDefinition::new("Show health status", move |_message, _args, ctx| {
            let plugin_ctx = plugin_ctx.clone();
            async move {
                let services = &plugin_ctx.services;
                let limiter = services.limiter.stats().await;
                let plugins = plugin_ctx.manager()?.list_plugins().await.len();

                let text = format!(
                    "{}\n\n{}\n🔌 Plugins: {}\n🚦 Rate limiter: {} tracked, {} blocked",
                    bold("🩺 Health"),
                    escape_html(&services.health.summary()),
                    plugins,
                    limiter.tracked,
                    limiter.blocked,
                );
                ctx.reply_html(text, ReplyOptions::default()).await?;
                Ok(())
            }
        })
        .with_aliases(["hc"]);

        let plugin_ctx = self.ctx.clone();
        let uptime = CommandDefinition::new("Show bot uptime", move |_message, _args, ctx| {
            let plugin_ctx = plugin_ctx.clone();
            async move {
                let report = plugin_ctx.services.health.report();
                let text = format!(
                    "{} {}",
                    bold("⏱️ Uptime:"),
                    escape_html(&format_uptime(report.uptime))
                );
                ctx.reply_html(text, ReplyOptions::default()).await?;
                Ok(())
            }
        })
        .with_aliases(["up"]);

        let plugin_ctx = self.ctx.clone();
        let db = CommandDefinition::new("Show database statistics", move |_message, _args, ctx| {
            let plugin_ctx = plugin_ctx.clone();
            async move {
                let store = &plugin_ctx.services.store;
                let plugins = store.list_plugins()?;
                let enabled = plugins.iter().filter(|record| record.enabled).count();
                let aliases = store.get_all_aliases()?.len();
                let sudo = store.get_sudo_list()?.len();

                let text = format!(
                    "{}\n\n🔌 Plugins: {} ({} enabled)\n🔗 Aliases: {}\n👑 Sudo users: {}",
                    bold("🗄️ Database"),
                    plugins.len(),
                    enabled,
                    aliases,
                    sudo,
                );
                ctx.reply_html(text, ReplyOptions::default()).await?;
                Ok(())
            }
        })
        .with_aliases(["database"]);

        BTreeMap::from([
            ("health".to_owned(), health),
            ("uptime".to_owned(), uptime),
            ("db".to_owned(), db),
        ])
    }
}
