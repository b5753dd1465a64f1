use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Instant;

use crate::commands::{CommandContext, ReplyOptions, escape_html};
use crate::plugins::{CommandDefinition, Plugin};
use crate::transport::IncomingMessage;

use super::{AUTHOR, bold};

/// Longest message dump sent back by `msg`.
const MAX_DUMP_CHARS: usize = 4000;

/// Diagnostics: latency, chat info, echo and raw message dumps.
pub struct DebugPlugin;

impl Plugin for DebugPlugin {
    fn name(&self) -> &str {
        "debug"
    }

    fn description(&self) -> &str {
        "Debugging tools"
    }

    fn author(&self) -> Option<&str> {
        Some(AUTHOR)
    }

    fn commands(&self) -> BTreeMap<String, CommandDefinition> {
        BTreeMap::from([
            (
                "ping".to_owned(),
                CommandDefinition::new("Measure response time", |_message, _args, ctx| async move {
                    ping(&ctx).await
                })
                .with_aliases(["pong"]),
            ),
            (
                "id".to_owned(),
                CommandDefinition::new("Show chat and sender info", |message, _args, ctx| async move {
                    ctx.reply_html(chat_info(&message), ReplyOptions::default())
                        .await?;
                    Ok(())
                })
                .with_aliases(["chatid", "chat"]),
            ),
            (
                "echo".to_owned(),
                CommandDefinition::new("Repeat text back", |_message, args, ctx| async move {
                    let text = if args.is_empty() {
                        "👋 Hello from NexBot!".to_owned()
                    } else {
                        args.join(" ")
                    };
                    ctx.reply(format!("📢 {text}"), ReplyOptions::default())
                        .await?;
                    Ok(())
                })
                .with_aliases(["say"])
                .with_examples(["echo Hello World"]),
            ),
            (
                "msg".to_owned(),
                CommandDefinition::new("Dump the raw message", |message, _args, ctx| async move {
                    let mut dump = format!("{message:#?}");
                    if dump.chars().count() > MAX_DUMP_CHARS {
                        dump = dump.chars().take(MAX_DUMP_CHARS).collect();
                        dump.push_str("\n... (truncated)");
                    }
                    ctx.reply_html(
                        format!("<pre>{}</pre>", escape_html(&dump)),
                        ReplyOptions::default(),
                    )
                    .await?;
                    Ok(())
                }),
            ),
        ])
    }
}

async fn ping(ctx: &CommandContext) -> anyhow::Result<()> {
    let started = Instant::now();
    ctx.edit("🏓 Pong!", ReplyOptions::default()).await?;
    let latency = started.elapsed().as_millis();

    ctx.edit_html(
        format!("{}\nLatency: {latency}ms", bold("🏓 Pong!")),
        ReplyOptions::default(),
    )
    .await?;
    Ok(())
}

fn chat_info(message: &IncomingMessage) -> String {
    let mut text = format!("{}\n\n", bold("🆔 Chat info"));
    let _ = writeln!(text, "{} {}", bold("Chat ID:"), message.chat_id);
    let _ = writeln!(text, "{} {}", bold("Chat type:"), message.chat_kind);

    let _ = write!(text, "\n{}\n", bold("📨 Sender"));
    let sender = message
        .sender_id
        .map_or_else(|| "N/A".to_owned(), |id| id.to_string());
    let _ = writeln!(text, "{} {}", bold("User ID:"), sender);

    let _ = write!(text, "\n{}\n", bold("💬 Message"));
    let _ = writeln!(text, "{} {}", bold("Message ID:"), message.id);
    if let Some(reply_to) = message.reply_to_message_id {
        let _ = writeln!(text, "{} {}", bold("Reply to:"), reply_to);
    }
    let _ = writeln!(
        text,
        "{} {}",
        bold("Date:"),
        message.date.format("%Y-%m-%d %H:%M:%S UTC")
    );
    text
}
