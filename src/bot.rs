//! Bot wiring: the gateway event loop, command dispatch and failure capture.
//!
//! Every command failure and every failed event handler becomes a
//! [`FailureEvent`] that is handed to the [`ErrorPipeline`] in its own task,
//! so a slow escalation never blocks the event loop.

use std::sync::Arc;
use std::time::Instant;

use async_lock::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::commands::{self, Command, Cooldowns, Services};
use crate::config::{BotConfig, ConfigError, SlashCommandMode};
use crate::context::CommandContext;
use crate::events::GatewayEvent;
use crate::failure::{CommandError, FailureEvent};
use crate::gateway::{self, GatewayConfig, GatewayError};
use crate::http::{DiscordHttpClient, HttpError};
use crate::paste::PasteClient;
use crate::pipeline::{ErrorPipeline, ReadyGate, TracingSink};
use crate::types::{
    ApplicationInfo, Interaction, InteractionCallbackType, InteractionResponse, InteractionType, Message,
    ReadyEvent, Snowflake,
};

pub type Pipeline = ErrorPipeline<DiscordHttpClient, PasteClient, TracingSink>;

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("gateway task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("could not resolve the bot owner: {0}")]
    OwnerUnresolved(String),
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Mutable bot state shared by event handlers.
#[derive(Debug, Default)]
pub struct BotState {
    /// The bot's own user ID (set on READY).
    pub bot_user_id: Option<Snowflake>,
    /// The application ID (set on READY).
    pub application_id: Option<Snowflake>,
    /// Whether slash commands have been registered this process.
    pub commands_registered: bool,
    pub cooldowns: Cooldowns,
}

pub struct Bot {
    config: BotConfig,
    http: DiscordHttpClient,
    pipeline: Arc<Pipeline>,
    state: Mutex<BotState>,
}

impl Bot {
    pub fn new(config: BotConfig) -> Self {
        let http = DiscordHttpClient::new(config.token.clone());
        let pipeline = ErrorPipeline::new(
            http.clone(),
            PasteClient::new(config.paste_url.clone()),
            TracingSink,
            Arc::new(ReadyGate::new()),
        );
        Self {
            config,
            http,
            pipeline: Arc::new(pipeline),
            state: Mutex::new(BotState::default()),
        }
    }

    /// Resolve the owner, connect and process events until the gateway
    /// stops.
    pub async fn run(self: Arc<Self>) -> Result<(), BotError> {
        self.resolve_owner().await?;
        let gw = gateway::connect(GatewayConfig::new(self.config.token.clone()));
        info!("gateway started, entering event loop");

        while let Ok(event) = gw.events.recv().await {
            self.handle_event(event).await;
        }

        warn!("event stream ended, bot shutting down");
        gw.driver.await??;
        Ok(())
    }

    async fn handle_event(self: &Arc<Self>, event: GatewayEvent) {
        match event {
            GatewayEvent::Ready(ready) => {
                if let Err(error) = self.on_ready(&ready).await {
                    let args = vec![format!("session {}", ready.session_id)];
                    self.report(FailureEvent::event("READY", args, error));
                }
            }

            GatewayEvent::MessageCreate(msg) => {
                if msg.author.bot {
                    return;
                }
                let bot = Arc::clone(self);
                tokio::spawn(async move { bot.on_message(msg).await });
            }

            GatewayEvent::InteractionCreate(interaction) => {
                let bot = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(error) = bot.on_interaction(&interaction).await {
                        let args = vec![format!("interaction {}", interaction.id)];
                        bot.report(FailureEvent::event("INTERACTION_CREATE", args, error));
                    }
                });
            }

            GatewayEvent::Unknown {
                event_name: Some(ref name),
                ..
            } => {
                trace!(event = %name, "unhandled gateway event");
            }

            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------

    /// Open the ready gate for the configured owner, or the application
    /// owner when none is configured. The pipeline cannot run without one.
    async fn resolve_owner(&self) -> Result<(), BotError> {
        let owner = match &self.config.owner_id {
            Some(owner) => owner.clone(),
            None => owner_from_application(self.http.current_application().await)?,
        };
        info!(owner = %owner, "escalation target resolved");
        self.pipeline.gate().open(owner);
        Ok(())
    }

    /// Record identity and register slash commands once.
    async fn on_ready(&self, ready: &ReadyEvent) -> Result<(), CommandError> {
        info!(user = %ready.user.tag(), guilds = ready.guilds.len(), "bot is ready");
        {
            let mut state = self.state.lock().await;
            state.bot_user_id = Some(ready.user.id.clone());
            state.application_id = Some(ready.application.id.clone());
        }

        if self.config.slash_commands == SlashCommandMode::Off
            || self.state.lock().await.commands_registered
        {
            return Ok(());
        }
        let registered = self
            .http
            .bulk_overwrite_global_commands(&ready.application.id, &commands::slash_commands())
            .await?;
        self.state.lock().await.commands_registered = true;
        info!(count = registered.len(), "registered global slash commands");
        Ok(())
    }

    async fn on_message(&self, msg: Message) {
        let bot_id = self.state.lock().await.bot_user_id.clone();
        let prefixes = &self.config.prefixes;
        let Some(inv) = commands::parse_invocation(&msg.content, bot_id.as_deref(), prefixes) else {
            return;
        };

        debug!(message_id = %msg.id, command = %inv.name, "handling prefix command");
        let ctx = CommandContext::from_message(&msg, &inv.prefix, &inv.name, inv.args);
        self.run_command(ctx).await;
    }

    async fn on_interaction(&self, interaction: &Interaction) -> Result<(), CommandError> {
        match interaction.kind {
            InteractionType::Ping => {
                let pong = InteractionResponse {
                    kind: InteractionCallbackType::Pong,
                    data: None,
                };
                self.http
                    .create_interaction_response(&interaction.id, &interaction.token, &pong)
                    .await?;
            }
            InteractionType::ApplicationCommand => {
                let args = interaction
                    .command_name()
                    .and_then(Command::from_name)
                    .map(|c| c.slash_args(interaction))
                    .unwrap_or_default();
                let ctx = CommandContext::from_interaction(interaction, &args).ok_or_else(|| {
                    CommandError::other("application command without an author or channel")
                })?;
                self.run_command(ctx).await;
            }
            other => debug!(kind = ?other, "ignoring interaction"),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Commands and failures
    // ------------------------------------------------------------------

    async fn run_command(&self, ctx: CommandContext) {
        if let Err(error) = self.invoke(&ctx).await {
            debug!(command = %ctx.command, error = %error, "command failed");
            self.report(FailureEvent::command(ctx, error));
        }
    }

    /// Look up, check and run a command. Check errors are returned as-is;
    /// body errors are wrapped.
    async fn invoke(&self, ctx: &CommandContext) -> Result<(), CommandError> {
        let command = Command::from_name(&ctx.command)
            .ok_or_else(|| CommandError::CommandNotFound(ctx.command.clone()))?;

        let owner = self.pipeline.gate().owner();
        {
            let mut state = self.state.lock().await;
            command.check(
                ctx,
                &self.config,
                owner.as_deref(),
                &mut state.cooldowns,
                Instant::now(),
            )?;
        }

        info!(
            command = %ctx.command,
            author = %ctx.author.tag(),
            location = %ctx.location(),
            "running command"
        );
        let services = Services {
            courier: &self.http,
            paste: self.pipeline.paste(),
            guilds: &self.http,
            config: &self.config,
        };
        command
            .execute(ctx, &services)
            .await
            .map_err(CommandError::invoke)
    }

    /// Hand a failure to the pipeline in its own task.
    fn report(&self, event: FailureEvent) {
        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            match pipeline.handle(event).await {
                Ok(outcome) => debug!(?outcome, "failure handled"),
                Err(e) => error!(error = %e, "failed to deliver failure report"),
            }
        });
    }
}

fn owner_from_application(
    info: Result<ApplicationInfo, HttpError>,
) -> Result<Snowflake, BotError> {
    let info = info.map_err(|e| BotError::OwnerUnresolved(e.to_string()))?;
    info.owner_id()
        .ok_or_else(|| BotError::OwnerUnresolved("application info lists no owner".to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
