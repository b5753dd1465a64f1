//! Plugins that ship with the bot and are always loaded.

mod debug;
mod health;
mod help;
mod plugin;
mod sudo;

use std::sync::Arc;

pub use debug::DebugPlugin;
pub use health::HealthPlugin;
pub use help::HelpPlugin;
pub use plugin::PluginAdminPlugin;
pub use sudo::SudoPlugin;

use super::catalog::PluginCatalog;
use crate::commands::escape_html;

/// Author reported by builtin plugins.
const AUTHOR: &str = "NexBot";

/// Adds every builtin plugin to `catalog`.
pub(super) fn register(catalog: PluginCatalog) -> PluginCatalog {
    catalog
        .builtin("help", |ctx| Ok(Arc::new(HelpPlugin::new(ctx.clone()))))
        .builtin("plugin", |ctx| Ok(Arc::new(PluginAdminPlugin::new(ctx.clone()))))
        .builtin("sudo", |ctx| Ok(Arc::new(SudoPlugin::new(ctx.clone()))))
        .builtin("debug", |_| Ok(Arc::new(DebugPlugin)))
        .builtin("health", |ctx| Ok(Arc::new(HealthPlugin::new(ctx.clone()))))
}

fn bold(text: &str) -> String {
    format!("<b>{}</b>", escape_html(text))
}

fn code(text: &str) -> String {
    format!("<code>{}</code>", escape_html(text))
}

/// Collapsible quote around already-formatted HTML.
fn blockquote(html: &str) -> String {
    format!("<blockquote expandable>{}</blockquote>", html.trim())
}

/// Usage line for a subcommand: `<code>.cmd</code> - description`.
fn usage_line(prefix: &str, command: &str, description: &str) -> String {
    format!("{} - {}", code(&format!("{prefix}{command}")), escape_html(description))
}
