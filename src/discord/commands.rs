//! Admin commands (!claim, !link, !show_config, etc).
//!
//! Parsing and execution run against `BridgeContext` only, so every command
//! can be exercised without a gateway connection. `CommandHandler` is the
//! thin serenity layer that posts the reply.

use std::sync::Arc;

use serenity::model::channel::Message;
use serenity::model::id::{ChannelId, GuildId, UserId};
use serenity::prelude::*;
use tracing::{debug, info, warn};

use crate::bridge::BridgeContext;
use crate::common::error::StoreError;
use crate::relay::content::truncate;
use crate::store::{LogRole, RelayDirection, ServerPair};

/// Platform limit on message content.
const MESSAGE_LIMIT: usize = 2000;

/// Error lines listed in a `link` reply.
const MAX_LISTED_ERRORS: usize = 10;

const HELP_TEXT: &str = r#"**Available Commands:**
• `claim` - Register this server as a mirror destination
• `link <serverID>` - Link the source server and mirror its channels
• `show_config` / `check` - Show this server's mirror configuration
• `set_channel <DEBUG|VC_LOG|AUDIT|OTHER> [channelID]` - Assign a log channel
• `set_direction <A_TO_B|BOTH>` - One-way or two-way relay
• `save_preset <name>` / `load_preset <name>` - Snapshot or restore the configuration
• `add_admin <userID>` / `add_reader <userID>` - Grant admin or read access
• `stopbot` - Shut the bot down
• `help` - Show this help message"#;

/// Who ran a command and where.
#[derive(Debug, Clone, Copy)]
pub struct Invocation {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
}

/// Reply to a recognised command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub text: String,
    /// Set by `stopbot`; shutdown starts once the reply has been posted.
    pub shutdown: bool,
}

impl CommandReply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            shutdown: false,
        }
    }
}

/// Parse a raw ID or a `<@id>` / `<@!id>` / `<#id>` mention.
fn parse_id(arg: &str) -> Option<u64> {
    arg.trim()
        .trim_start_matches('<')
        .trim_start_matches(['@', '#', '!', '&'])
        .trim_end_matches('>')
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
}

fn store_error_reply(e: &StoreError) -> CommandReply {
    match e {
        StoreError::PairNotFound { .. } => {
            CommandReply::text("This server is not registered. Run `claim` first.")
        }
        other => CommandReply::text(format!("Error: {}", other)),
    }
}

fn format_config(pair: &ServerPair) -> String {
    let users = |set: &std::collections::BTreeSet<UserId>| {
        if set.is_empty() {
            "none".to_string()
        } else {
            set.iter().map(|id| format!("<@{}>", id)).collect::<Vec<_>>().join(", ")
        }
    };
    let channel = |id: Option<ChannelId>| {
        id.map(|id| format!("<#{}>", id))
            .unwrap_or_else(|| "not set".to_string())
    };

    let mut lines = vec![
        "**Mirror configuration**".to_string(),
        format!(
            "Source server: {}",
            pair.source_guild
                .map(|id| id.to_string())
                .unwrap_or_else(|| "not linked".to_string())
        ),
        format!("Destination server: {}", pair.dest_guild),
        format!("Direction: {}", pair.direction.name()),
        format!("Admins: {}", users(&pair.admins)),
        format!("Readers: {}", users(&pair.read_users)),
    ];
    for role in [LogRole::Debug, LogRole::VcLog, LogRole::Audit, LogRole::Other] {
        lines.push(format!("{}: {}", role.name(), channel(pair.log_channels.get(role))));
    }
    if !pair.presets.is_empty() {
        let names: Vec<&str> = pair.presets.keys().map(String::as_str).collect();
        lines.push(format!("Presets: {}", names.join(", ")));
    }
    lines.push(format!("Mappings ({}):", pair.mapping.len()));
    lines.extend(
        pair.mapping
            .iter()
            .map(|(key, dest)| format!("`{}` → <#{}>", key, dest)),
    );

    truncate(&lines.join("\n"), MESSAGE_LIMIT)
}

/// Run `content` as an admin command.
///
/// Returns `None` if the text is not a known command, in which case the
/// message is treated as ordinary chat.
pub async fn execute(bridge: &BridgeContext, invocation: &Invocation, content: &str) -> Option<CommandReply> {
    let body = content.trim().strip_prefix(bridge.prefix.as_str())?;

    let parts: Vec<&str> = body.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args: Vec<&str> = parts
        .get(1)
        .map(|s| s.split_whitespace().collect())
        .unwrap_or_default();

    let known = matches!(
        command.as_str(),
        "claim"
            | "link"
            | "show_config"
            | "check"
            | "set_channel"
            | "set_direction"
            | "save_preset"
            | "load_preset"
            | "add_admin"
            | "add_reader"
            | "stopbot"
            | "help"
    );
    if !known {
        return None;
    }

    debug!("Processing command: {} with args: {:?}", command, args);

    let store = &bridge.store;
    let dest = invocation.guild_id;
    let user = invocation.user_id;

    if command == "help" {
        return Some(CommandReply::text(HELP_TEXT));
    }

    if command == "claim" {
        info!("claim command from {} in {}", user, dest);
        return Some(match store.claim(dest, user).await {
            Ok((_, true)) => CommandReply::text(format!(
                "This server is now a mirror destination. <@{}> is its first admin.",
                user
            )),
            Ok((_, false)) => CommandReply::text("This server is already registered."),
            Err(e) => store_error_reply(&e),
        });
    }

    let Some(pair) = store.pair(dest).await else {
        return Some(CommandReply::text(
            "This server is not registered. Run `claim` first.",
        ));
    };

    if matches!(command.as_str(), "show_config" | "check") {
        if !pair.can_read(user) {
            return Some(CommandReply::text(
                "You are not allowed to view this server's configuration.",
            ));
        }
        return Some(CommandReply::text(format_config(&pair)));
    }

    if !pair.is_admin(user) {
        return Some(CommandReply::text("Only admins of this server pair can do that."));
    }

    info!("{} command from {} in {} with args: {:?}", command, user, dest, args);

    let reply = match command.as_str() {
        "link" => link(bridge, dest, args.first().copied()).await,
        "set_channel" => {
            let Some(role) = args.first().and_then(|s| LogRole::parse(s)) else {
                return Some(CommandReply::text(
                    "Usage: `set_channel <DEBUG|VC_LOG|AUDIT|OTHER> [channelID]`",
                ));
            };
            let channel = match args.get(1) {
                Some(arg) => match parse_id(arg) {
                    Some(id) => ChannelId::new(id),
                    None => return Some(CommandReply::text(format!("Invalid channel ID: {}", arg))),
                },
                None => invocation.channel_id,
            };
            match store.set_log_channel(dest, role, Some(channel)).await {
                Ok(()) => CommandReply::text(format!("{} channel set to <#{}>.", role.name(), channel)),
                Err(e) => store_error_reply(&e),
            }
        }
        "set_direction" => {
            let Some(direction) = args.first().and_then(|s| RelayDirection::parse(s)) else {
                return Some(CommandReply::text("Usage: `set_direction <A_TO_B|BOTH>`"));
            };
            match store.set_direction(dest, direction).await {
                Ok(()) => CommandReply::text(format!("Relay direction set to {}.", direction.name())),
                Err(e) => store_error_reply(&e),
            }
        }
        "save_preset" => match args.first() {
            None => CommandReply::text("Usage: `save_preset <name>`"),
            Some(name) => match store.save_preset(dest, name).await {
                Ok(preset) => CommandReply::text(format!(
                    "Preset `{}` saved ({} mappings).",
                    name,
                    preset.mapping.len()
                )),
                Err(e) => store_error_reply(&e),
            },
        },
        "load_preset" => match args.first() {
            None => CommandReply::text("Usage: `load_preset <name>`"),
            Some(name) => match store.load_preset(dest, name).await {
                Ok(outcome) => CommandReply::text(format!(
                    "Preset `{}` loaded: {} mappings merged, {} conflicts kept as is.",
                    name, outcome.merged, outcome.conflicts
                )),
                Err(e) => store_error_reply(&e),
            },
        },
        "add_admin" | "add_reader" => {
            let Some(target) = args.first().and_then(|s| parse_id(s)).map(UserId::new) else {
                return Some(CommandReply::text(format!("Usage: `{} <userID>`", command)));
            };
            let result = if command == "add_admin" {
                store.add_admin(dest, target).await
            } else {
                store.add_reader(dest, target).await
            };
            let what = if command == "add_admin" { "an admin" } else { "a reader" };
            match result {
                Ok(true) => CommandReply::text(format!("<@{}> is now {}.", target, what)),
                Ok(false) => CommandReply::text(format!("<@{}> already is {}.", target, what)),
                Err(e) => store_error_reply(&e),
            }
        }
        "stopbot" => CommandReply {
            text: "Shutting down.".to_string(),
            shutdown: true,
        },
        _ => return None,
    };

    Some(reply)
}

async fn link(bridge: &BridgeContext, dest: GuildId, arg: Option<&str>) -> CommandReply {
    let Some(arg) = arg else {
        return CommandReply::text("Usage: `link <serverID>`");
    };
    let Some(source) = parse_id(arg).map(GuildId::new) else {
        return CommandReply::text(format!("Invalid server ID: {}", arg));
    };
    if source == dest {
        return CommandReply::text("A server cannot be linked to itself.");
    }

    if let Err(e) = bridge.store.link(dest, source).await {
        return store_error_reply(&e);
    }

    match bridge.synchronizer().sync(dest).await {
        Ok(report) => {
            let mut lines = vec![format!("Linked to {}. Sync: {}", source, report.summary())];
            lines.extend(
                report
                    .errors
                    .iter()
                    .take(MAX_LISTED_ERRORS)
                    .map(|e| format!("• {}", e)),
            );
            if report.errors.len() > MAX_LISTED_ERRORS {
                lines.push(format!("… and {} more", report.errors.len() - MAX_LISTED_ERRORS));
            }
            CommandReply::text(truncate(&lines.join("\n"), MESSAGE_LIMIT))
        }
        Err(e) => store_error_reply(&e),
    }
}

/// Command handler for the Discord bot.
#[derive(Clone)]
pub struct CommandHandler {
    bridge: Arc<BridgeContext>,
}

impl CommandHandler {
    pub fn new(bridge: Arc<BridgeContext>) -> Self {
        Self { bridge }
    }

    /// Parse and execute a command from Discord.
    ///
    /// Returns `true` if the message was a command, `false` otherwise.
    pub async fn handle_command(&self, ctx: &Context, msg: &Message, content: &str) -> anyhow::Result<bool> {
        let Some(guild_id) = msg.guild_id else {
            return Ok(false);
        };
        let invocation = Invocation {
            guild_id,
            channel_id: msg.channel_id,
            user_id: msg.author.id,
        };

        let Some(reply) = execute(&self.bridge, &invocation, content).await else {
            return Ok(false);
        };

        if let Err(e) = msg.channel_id.say(&ctx.http, &reply.text).await {
            warn!("Failed to reply to command: {}", e);
        }
        if reply.shutdown {
            self.bridge.request_shutdown();
        }
        Ok(true)
    }
}
