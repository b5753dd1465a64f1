use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::commands::{CommandContext, ReplyOptions};
use crate::plugins::{CommandDefinition, Plugin, PluginContext};

use super::{AUTHOR, blockquote, bold, usage_line};

/// Maintains the sudo user table.
pub struct SudoPlugin {
    ctx: PluginContext,
}

impl SudoPlugin {
    #[must_use]
    pub const fn new(ctx: PluginContext) -> Self {
        Self { ctx }
    }
}

impl Plugin for SudoPlugin {
    fn name(&self) -> &str {
        "sudo"
    }

    fn description(&self) -> &str {
        "Permission management"
    }

    fn author(&self) -> Option<&str> {
        Some(AUTHOR)
    }

    fn commands(&self) -> BTreeMap<String, CommandDefinition> {
        let plugin_ctx = self.ctx.clone();
        let sudo = CommandDefinition::new("Manage sudo users", move |_message, args, ctx| {
            let plugin_ctx = plugin_ctx.clone();
            async move { manage(&plugin_ctx, &args, &ctx).await }
        })
        .sudo(true)
        .with_aliases(["admin"])
        .with_examples(["sudo add <user id>", "sudo remove <user id>", "sudo list"]);

        BTreeMap::from([("sudo".to_owned(), sudo)])
    }
}

async fn manage(
    plugin_ctx: &PluginContext,
    args: &[String],
    ctx: &CommandContext,
) -> anyhow::Result<()> {
    let store = &plugin_ctx.services.store;
    let options = ReplyOptions::default();
    let target = args.get(1);

    match args.first().map(|arg| arg.to_lowercase()).as_deref() {
        Some("add" | "a") => {
            let Some(target) = target else {
                ctx.reply("❓ Specify a user", options).await?;
                return Ok(());
            };
            let Ok(user_id) = target.parse::<i64>() else {
                ctx.reply("❓ Cannot identify user, use a numeric user id", options)
                    .await?;
                return Ok(());
            };
            store.add_sudo(user_id)?;
            ctx.reply(format!("✅ Sudo granted: {user_id}"), options).await?;
        }

        Some("remove" | "rm" | "r") => {
            let Some(target) = target else {
                ctx.reply("❓ Specify a user id", options).await?;
                return Ok(());
            };
            let Ok(user_id) = target.parse::<i64>() else {
                ctx.reply("❌ Invalid user id", options).await?;
                return Ok(());
            };
            store.remove_sudo(user_id)?;
            ctx.reply(format!("✅ Sudo revoked: {user_id}"), options).await?;
        }

        Some("list" | "ls" | "l") => {
            let users = store.get_sudo_list()?;
            if users.is_empty() {
                ctx.reply("👑 Sudo list is empty", options).await?;
                return Ok(());
            }

            let mut listing = String::new();
            for user_id in &users {
                let _ = writeln!(listing, "{user_id}");
            }
            let _ = write!(listing, "\nTotal: {}", users.len());

            let text = format!("{}\n\n{}", bold("👑 Sudo users"), blockquote(&listing));
            ctx.reply_html(text, options).await?;
        }

        _ => {
            let prefix = plugin_ctx.services.prefix.as_str();
            let text = [
                bold("👑 Sudo management"),
                String::new(),
                usage_line(prefix, "sudo add <user id>", "grant sudo"),
                usage_line(prefix, "sudo remove <user id>", "revoke sudo"),
                usage_line(prefix, "sudo list", "list sudo users"),
            ]
            .join("\n");
            ctx.reply_html(text, options).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;

    #[tokio::test]
    async fn test_add_list_remove() {
        let harness = Harness::builtins().await;
        let store = &harness.manager.services().store;

        assert_eq!(harness.run(".sudo add 777").await, vec!["✅ Sudo granted: 777"]);
        assert!(store.is_sudo(777).unwrap());

        let listing = harness.run(".admin list").await;
        assert!(listing[0].contains("777"));
        assert!(listing[0].contains("Total: 1"));

        assert_eq!(harness.run(".sudo rm 777").await, vec!["✅ Sudo revoked: 777"]);
        assert!(!store.is_sudo(777).unwrap());
        assert_eq!(harness.run(".sudo list").await, vec!["👑 Sudo list is empty"]);
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let harness = Harness::builtins().await;
        assert_eq!(harness.run(".sudo add").await, vec!["❓ Specify a user"]);
        assert_eq!(
            harness.run(".sudo add @someone").await,
            vec!["❓ Cannot identify user, use a numeric user id"]
        );
        assert_eq!(harness.run(".sudo remove abc").await, vec!["❌ Invalid user id"]);
        assert!(harness.run(".sudo").await[0].contains("Sudo management"));
    }
}
