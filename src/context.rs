//! Snapshot of a single command invocation.
//!
//! A [`CommandContext`] is captured when a command is dispatched, whether it
//! arrived as a prefixed message or as a slash-command interaction, and
//! travels with any failure the command raises.

use crate::types::{jump_url, Interaction, Message, Permissions, Snowflake, User};

/// Enough of an interaction to answer it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionHandle {
    pub id: Snowflake,
    pub token: String,
    pub application_id: Snowflake,
}

#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Qualified command name (`roll`, not `!roll`).
    pub command: String,
    /// Prefix the invoker used; `/` for slash commands.
    pub prefix: String,
    /// Raw argument text following the command name.
    pub args: String,
    pub author: User,
    pub channel_id: Snowflake,
    pub channel_name: Option<String>,
    pub guild_id: Option<Snowflake>,
    pub guild_name: Option<String>,
    /// Message id, or the interaction id for slash commands.
    pub message_id: Snowflake,
    /// Invocation text as the user typed it.
    pub content: String,
    /// Set when the invocation can be answered with an interaction response.
    pub interaction: Option<InteractionHandle>,
    /// Invoker's resolved channel permissions, when Discord supplied them.
    pub author_permissions: Option<Permissions>,
    /// The bot's resolved channel permissions, when Discord supplied them.
    pub bot_permissions: Option<Permissions>,
}

impl CommandContext {
    /// Context for a prefixed text command.
    pub fn from_message(msg: &Message, prefix: &str, command: &str, args: &str) -> Self {
        Self {
            command: command.to_string(),
            prefix: prefix.to_string(),
            args: args.to_string(),
            author: msg.author.clone(),
            channel_id: msg.channel_id.clone(),
            channel_name: None,
            guild_id: msg.guild_id.clone(),
            guild_name: None,
            message_id: msg.id.clone(),
            content: msg.content.clone(),
            interaction: None,
            author_permissions: msg.member.as_ref().and_then(|m| m.permissions),
            bot_permissions: None,
        }
    }

    /// Context for a slash command. Returns `None` for interactions that are
    /// not application commands or lack an author or channel.
    pub fn from_interaction(interaction: &Interaction, args: &str) -> Option<Self> {
        let command = interaction.command_name()?;
        let author = interaction.author()?.clone();
        let channel_id = interaction
            .channel_id
            .clone()
            .or_else(|| interaction.channel.as_ref().map(|c| c.id.clone()))?;

        Some(Self {
            command: command.to_string(),
            prefix: "/".to_string(),
            args: args.to_string(),
            author,
            channel_id,
            channel_name: interaction.channel.as_ref().and_then(|c| c.name.clone()),
            guild_id: interaction.guild_id.clone(),
            guild_name: None,
            message_id: interaction.id.clone(),
            content: format!("/{} {}", command, args).trim_end().to_string(),
            interaction: Some(InteractionHandle {
                id: interaction.id.clone(),
                token: interaction.token.clone(),
                application_id: interaction.application_id.clone(),
            }),
            author_permissions: interaction.member.as_ref().and_then(|m| m.permissions),
            bot_permissions: interaction.app_permissions,
        })
    }

    /// Whether replies can be made visible to the invoker only.
    pub fn supports_ephemeral(&self) -> bool {
        self.interaction.is_some()
    }

    pub fn in_guild(&self) -> bool {
        self.guild_id.is_some()
    }

    pub fn jump_url(&self) -> String {
        jump_url(self.guild_id.as_deref(), &self.channel_id, &self.message_id)
    }

    /// `Guild | #channel` for guild invocations, `Direct Messages` otherwise.
    pub fn location(&self) -> String {
        match &self.guild_id {
            Some(guild_id) => {
                let guild = self.guild_name.as_deref().unwrap_or(guild_id);
                let channel = self.channel_name.as_deref().unwrap_or(&self.channel_id);
                format!("{} | #{}", guild, channel)
            }
            None => "Direct Messages".to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn author() -> User {
        User {
            id: "4242".to_string(),
            username: "dave".to_string(),
            discriminator: Some("0".to_string()),
            avatar: None,
            bot: false,
            global_name: None,
        }
    }

    /// A prefix invocation of `command` in a guild channel.
    pub fn guild_context(command: &str) -> CommandContext {
        CommandContext {
            command: command.to_string(),
            prefix: "!".to_string(),
            args: String::new(),
            author: author(),
            channel_id: "200".to_string(),
            channel_name: Some("general".to_string()),
            guild_id: Some("100".to_string()),
            guild_name: Some("Shrine".to_string()),
            message_id: "300".to_string(),
            content: format!("!{}", command),
            interaction: None,
            author_permissions: None,
            bot_permissions: None,
        }
    }

    /// The same invocation arriving as a slash command.
    pub fn slash_context(command: &str) -> CommandContext {
        CommandContext {
            prefix: "/".to_string(),
            content: format!("/{}", command),
            interaction: Some(InteractionHandle {
                id: "300".to_string(),
                token: "tok".to_string(),
                application_id: "1".to_string(),
            }),
            ..guild_context(command)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn location_names_guild_and_channel() {
        assert_eq!(guild_context("ping").location(), "Shrine | #general");

        let mut dm = guild_context("ping");
        dm.guild_id = None;
        assert_eq!(dm.location(), "Direct Messages");
    }

    #[test]
    fn only_interactions_support_ephemeral_replies() {
        assert!(!guild_context("roll").supports_ephemeral());
        assert!(slash_context("roll").supports_ephemeral());
    }

    #[test]
    fn from_interaction_reads_permissions_and_handle() {
        let interaction: Interaction = serde_json::from_value(json!({
            "id": "900",
            "application_id": "1",
            "type": 2,
            "data": {"id": "5", "name": "say", "options": [{"name": "text", "type": 3, "value": "hi"}]},
            "guild_id": "100",
            "channel_id": "200",
            "member": {
                "user": {"id": "4242", "username": "dave", "discriminator": "0", "avatar": null},
                "nick": null,
                "permissions": "2048"
            },
            "token": "abc",
            "app_permissions": "16384"
        }))
        .expect("valid interaction JSON");

        let ctx = CommandContext::from_interaction(&interaction, "hi").expect("command context");
        assert_eq!(ctx.command, "say");
        assert_eq!(ctx.content, "/say hi");
        assert_eq!(ctx.author_permissions, Some(Permissions::SEND_MESSAGES));
        assert_eq!(ctx.bot_permissions, Some(Permissions::EMBED_LINKS));
        assert_eq!(ctx.interaction.as_ref().map(|h| h.token.as_str()), Some("abc"));
        assert_eq!(ctx.jump_url(), "https://discord.com/channels/100/200/900");
    }
}
