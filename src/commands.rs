//! Built-in commands: prefix resolution, checks and bodies.
//!
//! Every command is reachable as a prefixed message (`!roll 20`, or with a
//! mention prefix) and as a slash command. [`Command::check`] raises check
//! failures unwrapped; [`Command::execute`] is the body, whose errors the
//! caller wraps with [`CommandError::invoke`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::BotConfig;
use crate::context::CommandContext;
use crate::failure::CommandError;
use crate::paste::PasteService;
use crate::pipeline::{Courier, Reply};
use crate::types::{
    snowflake_timestamp_ms, ApplicationCommand, ApplicationCommandOption, CreateMessage, Embed,
    Guild, Interaction, Permissions,
};

// ---------------------------------------------------------------------------
// Invocation parsing
// ---------------------------------------------------------------------------

/// A prefixed message split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation<'a> {
    pub prefix: String,
    /// Lowercased command name.
    pub name: String,
    pub args: &'a str,
}

/// Match `content` against the mention prefixes and then `prefixes`, in
/// order. Returns the prefix used and the remaining text.
pub fn resolve_prefix<'a>(
    content: &'a str,
    bot_id: Option<&str>,
    prefixes: &[String],
) -> Option<(String, &'a str)> {
    if let Some(id) = bot_id {
        for mention in [format!("<@{}>", id), format!("<@!{}>", id)] {
            if let Some(rest) = content.strip_prefix(mention.as_str()) {
                if rest.starts_with(char::is_whitespace) {
                    return Some((format!("{} ", mention), rest.trim_start()));
                }
            }
        }
    }
    prefixes
        .iter()
        .find_map(|p| content.strip_prefix(p.as_str()).map(|rest| (p.clone(), rest)))
}

/// Split a message into prefix, command name and arguments. `None` when the
/// message is not addressed to the bot.
pub fn parse_invocation<'a>(
    content: &'a str,
    bot_id: Option<&str>,
    prefixes: &[String],
) -> Option<Invocation<'a>> {
    let (prefix, rest) = resolve_prefix(content.trim_start(), bot_id, prefixes)?;
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    if name.is_empty() {
        return None;
    }
    Some(Invocation {
        prefix,
        name: name.to_lowercase(),
        args,
    })
}

// ---------------------------------------------------------------------------
// Command table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Ping,
    Uptime,
    Roll,
    Say,
    ServerInfo,
    Help,
    Paste,
    Unpaste,
}

/// A command's single optional or required argument.
#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub description: &'static str,
    /// Discord option type: 3 = STRING, 4 = INTEGER.
    pub kind: u8,
    pub required: bool,
}

/// Static metadata and checks of a command.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub param: Option<Param>,
    pub owner_only: bool,
    pub guild_only: bool,
    pub user_permissions: Permissions,
    pub bot_permissions: Permissions,
    pub cooldown: Option<Duration>,
}

const fn spec(name: &'static str, description: &'static str) -> CommandSpec {
    CommandSpec {
        name,
        description,
        param: None,
        owner_only: false,
        guild_only: false,
        user_permissions: Permissions::empty(),
        bot_permissions: Permissions::empty(),
        cooldown: None,
    }
}

const ROLL_COOLDOWN: Duration = Duration::from_secs(3);
const MIN_SIDES: i64 = 2;
const MAX_SIDES: i64 = 1000;
const DEFAULT_SIDES: i64 = 6;

impl Command {
    pub const ALL: [Command; 8] = [
        Command::Ping,
        Command::Uptime,
        Command::Roll,
        Command::Say,
        Command::ServerInfo,
        Command::Help,
        Command::Paste,
        Command::Unpaste,
    ];

    pub fn from_name(name: &str) -> Option<Command> {
        Command::ALL
            .into_iter()
            .find(|c| c.spec().name.eq_ignore_ascii_case(name))
    }

    pub fn spec(self) -> CommandSpec {
        match self {
            Command::Ping => spec("ping", "Check bot latency"),
            Command::Uptime => spec("uptime", "See how long the bot has been running"),
            Command::Roll => CommandSpec {
                param: Some(Param {
                    name: "sides",
                    description: "Number of sides (default: 6)",
                    kind: 4,
                    required: false,
                }),
                cooldown: Some(ROLL_COOLDOWN),
                ..spec("roll", "Roll a die")
            },
            Command::Say => CommandSpec {
                param: Some(Param {
                    name: "text",
                    description: "What to say",
                    kind: 3,
                    required: true,
                }),
                user_permissions: Permissions::MANAGE_MESSAGES,
                ..spec("say", "Make the bot say something")
            },
            Command::ServerInfo => CommandSpec {
                guild_only: true,
                bot_permissions: Permissions::EMBED_LINKS,
                ..spec("serverinfo", "Show server information")
            },
            Command::Help => CommandSpec {
                param: Some(Param {
                    name: "command",
                    description: "Command to describe",
                    kind: 3,
                    required: false,
                }),
                ..spec("help", "Show available commands")
            },
            Command::Paste => CommandSpec {
                param: Some(Param {
                    name: "text",
                    description: "Text to upload",
                    kind: 3,
                    required: true,
                }),
                owner_only: true,
                ..spec("paste", "Upload text to the paste service")
            },
            Command::Unpaste => CommandSpec {
                param: Some(Param {
                    name: "token",
                    description: "Security token of the paste",
                    kind: 3,
                    required: true,
                }),
                owner_only: true,
                ..spec("unpaste", "Delete an uploaded paste")
            },
        }
    }

    /// `roll [sides]`, `say <text>`.
    pub fn usage(self) -> String {
        let spec = self.spec();
        match spec.param {
            Some(p) if p.required => format!("{} <{}>", spec.name, p.name),
            Some(p) => format!("{} [{}]", spec.name, p.name),
            None => spec.name.to_string(),
        }
    }

    /// Argument text of a slash invocation.
    pub fn slash_args(self, interaction: &Interaction) -> String {
        self.spec()
            .param
            .and_then(|p| interaction.option_str(p.name))
            .unwrap_or_default()
    }

    /// Run the checks in order: disabled, owner, guild-only, caller
    /// permissions, bot permissions, cooldown.
    ///
    /// Permission checks only run when Discord supplied the bitsets.
    pub fn check(
        self,
        ctx: &CommandContext,
        config: &BotConfig,
        owner_id: Option<&str>,
        cooldowns: &mut Cooldowns,
        now: Instant,
    ) -> Result<(), CommandError> {
        let spec = self.spec();

        if config.is_disabled(spec.name) {
            return Err(CommandError::DisabledCommand);
        }
        if spec.owner_only && owner_id != Some(ctx.author.id.as_str()) {
            return Err(CommandError::NotOwner);
        }
        if spec.guild_only && !ctx.in_guild() {
            return Err(CommandError::NoPrivateMessage);
        }
        if let Some(granted) = ctx.author_permissions {
            let missing = Permissions::missing_from(spec.user_permissions, granted);
            if !missing.is_empty() {
                return Err(CommandError::MissingPermissions(missing));
            }
        }
        if let Some(granted) = ctx.bot_permissions {
            let missing = Permissions::missing_from(spec.bot_permissions, granted);
            if !missing.is_empty() {
                return Err(CommandError::BotMissingPermissions(missing));
            }
        }
        if let Some(per) = spec.cooldown {
            cooldowns
                .hit(self, &ctx.author.id, per, now)
                .map_err(|retry_after| CommandError::CommandOnCooldown { retry_after })?;
        }
        Ok(())
    }

    /// The command body.
    pub async fn execute(
        self,
        ctx: &CommandContext,
        services: &Services<'_>,
    ) -> Result<(), CommandError> {
        let courier = services.courier;
        let reply = |text: String| courier.reply(ctx, Reply::public(text));

        match self {
            Command::Ping => {
                let latency = snowflake_timestamp_ms(&ctx.message_id)
                    .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
                    .map(|sent_at| format!("{}ms", (Utc::now() - sent_at).num_milliseconds()))
                    .unwrap_or_else(|| "unknown".to_string());
                reply(format!("Pong! Latency: {}", latency)).await?;
            }
            Command::Uptime => {
                let elapsed = Utc::now() - services.config.started_at;
                reply(format!("Bot uptime: {}", format_uptime(elapsed))).await?;
            }
            Command::Roll => {
                let sides = parse_sides(&ctx.args)?;
                let result = rand::thread_rng().gen_range(1..=sides);
                reply(format!("Rolling a d{}... **{}**!", sides, result)).await?;
            }
            Command::Say => {
                let text = required(&ctx.args, "text")?;
                reply(text.to_string()).await?;
            }
            Command::ServerInfo => {
                let guild_id = ctx.guild_id.as_deref().ok_or(CommandError::NoPrivateMessage)?;
                let guild = services.guilds.guild(guild_id).await?;
                courier
                    .reply(ctx, Reply::public("").with_embed(guild_embed(&guild)))
                    .await?;
            }
            Command::Help => {
                reply(help_text(&ctx.prefix, ctx.args.trim())?).await?;
            }
            Command::Paste => {
                let text = required(&ctx.args, "text")?;
                let (paste, _) = services
                    .paste
                    .create_paste("paste.txt", text, None, false)
                    .await
                    .map_err(CommandError::other)?;
                let text = format!(
                    "Uploaded to {}\nSecurity token: `{}`",
                    paste.url, paste.security_token
                );
                if ctx.supports_ephemeral() {
                    courier.reply(ctx, Reply::ephemeral(text)).await?;
                } else {
                    courier
                        .send_direct(&ctx.author.id, CreateMessage::new().content(text))
                        .await?;
                }
            }
            Command::Unpaste => {
                let token = required(&ctx.args, "token")?;
                services
                    .paste
                    .delete_paste(token)
                    .await
                    .map_err(CommandError::other)?;
                reply("Paste deleted.".to_string()).await?;
            }
        }
        Ok(())
    }
}

/// Slash command definitions registered on READY.
pub fn slash_commands() -> Vec<ApplicationCommand> {
    Command::ALL
        .into_iter()
        .map(|command| {
            let spec = command.spec();
            ApplicationCommand {
                id: None,
                name: spec.name.to_string(),
                description: spec.description.to_string(),
                options: spec
                    .param
                    .map(|p| ApplicationCommandOption {
                        name: p.name.to_string(),
                        description: p.description.to_string(),
                        kind: p.kind,
                        required: p.required,
                    })
                    .into_iter()
                    .collect(),
                kind: 1,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Guild lookup for `serverinfo`.
#[async_trait]
pub trait GuildDirectory: Send + Sync {
    async fn guild(&self, guild_id: &str) -> Result<Guild, CommandError>;
}

/// Everything a command body may talk to.
pub struct Services<'a> {
    pub courier: &'a dyn Courier,
    pub paste: &'a dyn PasteService,
    pub guilds: &'a dyn GuildDirectory,
    pub config: &'a BotConfig,
}

impl From<crate::pipeline::DeliveryError> for CommandError {
    fn from(err: crate::pipeline::DeliveryError) -> Self {
        CommandError::other(err)
    }
}

// ---------------------------------------------------------------------------
// Cooldowns
// ---------------------------------------------------------------------------

/// Per-user, per-command cooldowns of one use per period.
#[derive(Debug, Default)]
pub struct Cooldowns {
    ready_at: HashMap<(Command, String), Instant>,
}

impl Cooldowns {
    /// Record a use at `now`, or return how long until the next one is
    /// allowed. Expired entries are dropped on every call.
    pub fn hit(
        &mut self,
        command: Command,
        user_id: &str,
        per: Duration,
        now: Instant,
    ) -> Result<(), Duration> {
        self.ready_at.retain(|_, ready_at| *ready_at > now);
        let key = (command, user_id.to_string());
        if let Some(&ready_at) = self.ready_at.get(&key) {
            return Err(ready_at - now);
        }
        self.ready_at.insert(key, now + per);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn required<'a>(args: &'a str, param: &str) -> Result<&'a str, CommandError> {
    let args = args.trim();
    if args.is_empty() {
        return Err(CommandError::MissingRequiredArgument {
            param: param.to_string(),
        });
    }
    Ok(args)
}

fn parse_sides(args: &str) -> Result<i64, CommandError> {
    let args = args.trim();
    if args.is_empty() {
        return Ok(DEFAULT_SIDES);
    }
    let sides: i64 = args.parse().map_err(|_| {
        CommandError::BadArgument(format!(
            "Converting to \"int\" failed for parameter \"sides\": {:?}",
            args
        ))
    })?;
    Ok(sides.clamp(MIN_SIDES, MAX_SIDES))
}

fn format_uptime(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    let (days, hours, minutes, seconds) = (
        secs / 86_400,
        (secs % 86_400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
    );
    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else {
        format!("{}h {}m {}s", hours, minutes, seconds)
    }
}

fn guild_embed(guild: &Guild) -> Embed {
    let count = |n: Option<u64>| n.map(|n| n.to_string()).unwrap_or_else(|| "unknown".into());
    let created = guild
        .created_at_ms()
        .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
        .map(|dt| dt.format("%B %d, %Y").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut embed = Embed::new()
        .title(&guild.name)
        .field("Members", count(guild.approximate_member_count), true)
        .field("Online", count(guild.approximate_presence_count), true)
        .field("Created", created, true);
    if let Some(owner) = &guild.owner_id {
        embed = embed.field("Owner", format!("<@{}>", owner), true);
    }
    embed.footer(format!("ID: {}", guild.id))
}

fn help_text(prefix: &str, topic: &str) -> Result<String, CommandError> {
    if !topic.is_empty() {
        let command = Command::from_name(topic).ok_or_else(|| {
            CommandError::BadArgument(format!("No command called \"{}\" found.", topic))
        })?;
        return Ok(format!(
            "`{}{}`\n{}",
            prefix,
            command.usage(),
            command.spec().description
        ));
    }

    let mut out = String::from("**Available commands:**\n");
    for command in Command::ALL {
        out.push_str(&format!(
            "• `{}{}` - {}\n",
            prefix,
            command.usage(),
            command.spec().description
        ));
    }
    out.push_str(&format!(
        "\nType `{}help <command>` for more info on a command.",
        prefix
    ));
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::test_config;
    use crate::context::fixtures::{guild_context, slash_context};
    use crate::failure::{classify, Classification};
    use crate::paste::{Paste, PasteError};
    use crate::pipeline::DeliveryError;

    fn prefixes(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    // -- parsing ------------------------------------------------------------

    #[test]
    fn configured_prefix_and_lowercased_name() {
        let inv = parse_invocation("!RoLL  20 ", None, &prefixes(&["!"])).unwrap();
        assert_eq!(inv.prefix, "!");
        assert_eq!(inv.name, "roll");
        assert_eq!(inv.args, "20");
    }

    #[test]
    fn mention_prefixes_are_accepted() {
        let list = prefixes(&["!"]);
        let inv = parse_invocation("<@42> ping", Some("42"), &list).unwrap();
        assert_eq!(inv.prefix, "<@42> ");
        assert_eq!(inv.name, "ping");

        let inv = parse_invocation("<@!42>   say hi there", Some("42"), &list).unwrap();
        assert_eq!(inv.name, "say");
        assert_eq!(inv.args, "hi there");

        // Someone else's mention is not a prefix.
        assert!(parse_invocation("<@43> ping", Some("42"), &list).is_none());
    }

    #[test]
    fn unprefixed_text_is_not_an_invocation() {
        let list = prefixes(&["!", "?"]);
        assert!(parse_invocation("hello there", Some("42"), &list).is_none());
        assert!(parse_invocation("!", None, &list).is_none());
        assert!(parse_invocation("! ping", None, &list).is_none());
    }

    #[test]
    fn longest_prefix_wins_when_listed_first() {
        let inv = parse_invocation("!!ping", None, &prefixes(&["!!", "!"])).unwrap();
        assert_eq!(inv.prefix, "!!");
        assert_eq!(inv.name, "ping");
    }

    // -- table --------------------------------------------------------------

    #[test]
    fn every_command_resolves_by_name() {
        for command in Command::ALL {
            assert_eq!(Command::from_name(command.spec().name), Some(command));
        }
        assert_eq!(Command::from_name("SERVERINFO"), Some(Command::ServerInfo));
        assert_eq!(Command::from_name("eval"), None);
    }

    #[test]
    fn usage_marks_required_and_optional_params() {
        assert_eq!(Command::Roll.usage(), "roll [sides]");
        assert_eq!(Command::Say.usage(), "say <text>");
        assert_eq!(Command::Ping.usage(), "ping");
    }

    #[test]
    fn slash_definitions_mirror_the_table() {
        let cmds = slash_commands();
        assert_eq!(cmds.len(), Command::ALL.len());
        let say = cmds.iter().find(|c| c.name == "say").unwrap();
        assert_eq!(say.options.len(), 1);
        assert!(say.options[0].required);
        let roll = cmds.iter().find(|c| c.name == "roll").unwrap();
        assert_eq!(roll.options[0].kind, 4);
    }

    // -- checks -------------------------------------------------------------

    fn check(
        command: Command,
        ctx: &CommandContext,
        config: &BotConfig,
        cooldowns: &mut Cooldowns,
    ) -> Result<(), CommandError> {
        command.check(ctx, config, Some("1000"), cooldowns, Instant::now())
    }

    #[test]
    fn disabled_is_checked_before_owner() {
        let mut config = test_config();
        config.disabled_commands.insert("paste".to_string());
        let err = check(
            Command::Paste,
            &guild_context("paste"),
            &config,
            &mut Cooldowns::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CommandError::DisabledCommand));
    }

    #[test]
    fn owner_only_commands_reject_others() {
        let config = test_config();
        let mut cooldowns = Cooldowns::default();
        let err = check(Command::Unpaste, &guild_context("unpaste"), &config, &mut cooldowns)
            .unwrap_err();
        assert!(matches!(err, CommandError::NotOwner));

        let mut owner_ctx = guild_context("unpaste");
        owner_ctx.author.id = "1000".to_string();
        assert!(check(Command::Unpaste, &owner_ctx, &config, &mut cooldowns).is_ok());
    }

    #[test]
    fn guild_only_commands_reject_direct_messages() {
        let mut ctx = guild_context("serverinfo");
        ctx.guild_id = None;
        let err = check(Command::ServerInfo, &ctx, &test_config(), &mut Cooldowns::default())
            .unwrap_err();
        assert!(matches!(err, CommandError::NoPrivateMessage));
    }

    #[test]
    fn permissions_are_only_checked_when_known() {
        let config = test_config();
        let mut cooldowns = Cooldowns::default();

        let ctx = guild_context("say");
        assert!(check(Command::Say, &ctx, &config, &mut cooldowns).is_ok());

        let mut ctx = slash_context("say");
        ctx.author_permissions = Some(Permissions::SEND_MESSAGES);
        let err = check(Command::Say, &ctx, &config, &mut cooldowns).unwrap_err();
        assert_eq!(
            classify(&err),
            Classification::MissingPermissions(vec!["manage_messages".to_string()])
        );

        let mut ctx = slash_context("serverinfo");
        ctx.bot_permissions = Some(Permissions::SEND_MESSAGES);
        let err = check(Command::ServerInfo, &ctx, &config, &mut cooldowns).unwrap_err();
        assert_eq!(
            classify(&err),
            Classification::BotMissingPermissions(vec!["embed_links".to_string()])
        );
    }

    #[test]
    fn roll_cooldown_is_per_user() {
        let config = test_config();
        let mut cooldowns = Cooldowns::default();
        let now = Instant::now();
        let ctx = guild_context("roll");

        assert!(Command::Roll.check(&ctx, &config, None, &mut cooldowns, now).is_ok());
        let err = Command::Roll
            .check(&ctx, &config, None, &mut cooldowns, now + Duration::from_secs(1))
            .unwrap_err();
        match err {
            CommandError::CommandOnCooldown { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(2))
            }
            other => panic!("expected cooldown, got {:?}", other),
        }

        let mut other_user = guild_context("roll");
        other_user.author.id = "7".to_string();
        assert!(Command::Roll
            .check(&other_user, &config, None, &mut cooldowns, now + Duration::from_secs(1))
            .is_ok());

        assert!(Command::Roll
            .check(&ctx, &config, None, &mut cooldowns, now + Duration::from_secs(3))
            .is_ok());
    }

    #[test]
    fn expired_cooldowns_are_forgotten() {
        let mut cooldowns = Cooldowns::default();
        let per = Duration::from_secs(3);
        let now = Instant::now();
        for user in ["1", "2", "3"] {
            assert!(cooldowns.hit(Command::Roll, user, per, now).is_ok());
        }
        assert_eq!(cooldowns.ready_at.len(), 3);

        assert!(cooldowns
            .hit(Command::Roll, "4", per, now + Duration::from_secs(5))
            .is_ok());
        assert_eq!(cooldowns.ready_at.len(), 1);
    }

    // -- bodies -------------------------------------------------------------

    #[derive(Default)]
    struct Replies(Mutex<Vec<Reply>>);

    #[async_trait]
    impl Courier for Replies {
        async fn reply(&self, _ctx: &CommandContext, reply: Reply) -> Result<(), DeliveryError> {
            self.0.lock().unwrap().push(reply);
            Ok(())
        }

        async fn send_direct(
            &self,
            _user_id: &str,
            message: CreateMessage,
        ) -> Result<(), DeliveryError> {
            self.0
                .lock()
                .unwrap()
                .push(Reply::public(message.content.unwrap_or_default()));
            Ok(())
        }
    }

    struct NoPaste;

    #[async_trait]
    impl PasteService for NoPaste {
        async fn create_paste(
            &self,
            _filename: &str,
            _content: &str,
            _expires: Option<DateTime<Utc>>,
            _password: bool,
        ) -> Result<(Paste, Option<String>), PasteError> {
            Ok((
                Paste {
                    id: "p".to_string(),
                    url: "https://mystb.in/p".to_string(),
                    security_token: "tok".to_string(),
                    expires: None,
                },
                None,
            ))
        }

        async fn delete_paste(&self, _security_token: &str) -> Result<(), PasteError> {
            Err(PasteError::Api {
                status: 404,
                body: "not found".to_string(),
            })
        }
    }

    struct Guilds;

    #[async_trait]
    impl GuildDirectory for Guilds {
        async fn guild(&self, guild_id: &str) -> Result<Guild, CommandError> {
            Ok(Guild {
                id: guild_id.to_string(),
                name: "Shrine".to_string(),
                owner_id: Some("1000".to_string()),
                approximate_member_count: Some(12),
                approximate_presence_count: None,
            })
        }
    }

    async fn run(command: Command, ctx: &CommandContext) -> (Result<(), CommandError>, Vec<Reply>) {
        let courier = Replies::default();
        let config = test_config();
        let services = Services {
            courier: &courier,
            paste: &NoPaste,
            guilds: &Guilds,
            config: &config,
        };
        let result = command.execute(ctx, &services).await;
        let replies = courier.0.lock().unwrap().clone();
        (result, replies)
    }

    #[tokio::test]
    async fn roll_stays_within_bounds() {
        let mut ctx = guild_context("roll");
        ctx.args = "5000".to_string();
        let (result, replies) = run(Command::Roll, &ctx).await;
        assert!(result.is_ok());
        assert!(replies[0].content.starts_with("Rolling a d1000..."));
    }

    #[tokio::test]
    async fn roll_with_garbage_is_a_bad_argument_once_wrapped() {
        let mut ctx = guild_context("roll");
        ctx.args = "lots".to_string();
        let (result, replies) = run(Command::Roll, &ctx).await;
        let err = CommandError::invoke(result.unwrap_err());
        assert!(matches!(classify(&err), Classification::BadArgument(_)));
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn say_requires_text() {
        let (result, _) = run(Command::Say, &guild_context("say")).await;
        let err = CommandError::invoke(result.unwrap_err());
        assert_eq!(
            classify(&err),
            Classification::MissingRequiredArgument("text".to_string())
        );

        let mut ctx = guild_context("say");
        ctx.args = "hello @everyone".to_string();
        let (result, replies) = run(Command::Say, &ctx).await;
        assert!(result.is_ok());
        assert_eq!(replies[0].content, "hello @everyone");
    }

    #[tokio::test]
    async fn serverinfo_replies_with_an_embed() {
        let (result, replies) = run(Command::ServerInfo, &guild_context("serverinfo")).await;
        assert!(result.is_ok());
        let embed = &replies[0].embeds[0];
        assert_eq!(embed.title.as_deref(), Some("Shrine"));
        assert!(embed.fields.iter().any(|f| f.name == "Members" && f.value == "12"));
    }

    #[tokio::test]
    async fn help_lists_every_command_with_the_invokers_prefix() {
        let (_, replies) = run(Command::Help, &slash_context("help")).await;
        for command in Command::ALL {
            assert!(replies[0].content.contains(&format!("`/{}", command.usage())));
        }

        let mut ctx = guild_context("help");
        ctx.args = "nope".to_string();
        let (result, _) = run(Command::Help, &ctx).await;
        assert!(matches!(result, Err(CommandError::BadArgument(_))));
    }

    #[tokio::test]
    async fn paste_token_stays_private() {
        let mut ctx = slash_context("paste");
        ctx.args = "some text".to_string();
        let (result, replies) = run(Command::Paste, &ctx).await;
        assert!(result.is_ok());
        assert!(replies[0].ephemeral);
        assert!(replies[0].content.contains("Security token: `tok`"));
    }

    #[tokio::test]
    async fn unpaste_failures_are_unclassified() {
        let mut ctx = guild_context("unpaste");
        ctx.args = "tok".to_string();
        let (result, _) = run(Command::Unpaste, &ctx).await;
        let err = CommandError::invoke(result.unwrap_err());
        assert_eq!(classify(&err), Classification::Unclassified);
    }

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(chrono::Duration::seconds(3725)), "1h 2m 5s");
        assert_eq!(format_uptime(chrono::Duration::seconds(90_061)), "1d 1h 1m 1s");
    }
}
