//! Error classification and escalation pipeline.
//!
//! [`ErrorPipeline::handle`] turns one [`FailureEvent`] into exactly one
//! terminal action:
//!
//! - nothing at all, for failures users cause on purpose or by accident and
//!   don't need to hear about (unknown command, cooldown, not owner);
//! - a short reply to the invoker, for expected user errors;
//! - an escalation to the bot owner, for everything else.
//!
//! Collaborators are explicit: a [`Courier`] delivers messages, a
//! [`PasteService`] hosts oversized reports, a [`LogSink`] receives the
//! error log line, and a [`ReadyGate`] supplies the owner once the bot is
//! ready. The pipeline holds no mutable state, so concurrent failures can
//! be handled from independent tasks.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use crate::context::CommandContext;
use crate::failure::{classify, BoxError, Classification, FailureEvent, FailureSource};
use crate::paste::{PasteError, PasteService};
use crate::report::{
    delivery_for, escape_code_block, DiagnosticReport, ReportDelivery, EXCERPT_LEN,
};
use crate::types::{CreateMessage, Embed, Snowflake, COLOR_RED};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to deliver message to {target}: {source}")]
    Send {
        target: String,
        #[source]
        source: BoxError,
    },
    #[error("failed to upload report: {0}")]
    Paste(#[from] PasteError),
}

/// A reply to the user who invoked a command.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub content: String,
    /// Visible to the invoker only. Couriers must only be asked for this
    /// when [`CommandContext::supports_ephemeral`] holds.
    pub ephemeral: bool,
    pub embeds: Vec<Embed>,
}

impl Reply {
    pub fn public(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: false,
            embeds: Vec::new(),
        }
    }

    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            ephemeral: true,
            ..Self::public(content)
        }
    }

    pub fn with_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }
}

/// Message delivery primitives of the chat platform.
#[async_trait]
pub trait Courier: Send + Sync {
    /// Answer the invocation in its own channel (or interaction).
    async fn reply(&self, ctx: &CommandContext, reply: Reply) -> Result<(), DeliveryError>;

    /// Send a direct message to a user.
    async fn send_direct(&self, user_id: &str, message: CreateMessage)
        -> Result<(), DeliveryError>;
}

/// Process-wide log sink for escalated failures.
pub trait LogSink: Send + Sync {
    fn error(&self, line: &str);
}

/// Forwards to `tracing` at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn error(&self, line: &str) {
        tracing::error!(target: "kannushi::errors", "{}", line);
    }
}

// ---------------------------------------------------------------------------
// Ready gate
// ---------------------------------------------------------------------------

/// One-shot signal that the bot is ready and its owner is known.
#[derive(Debug)]
pub struct ReadyGate {
    owner: watch::Sender<Option<Snowflake>>,
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyGate {
    pub fn new() -> Self {
        let (owner, _) = watch::channel(None);
        Self { owner }
    }

    /// Open the gate. Later calls keep the first owner.
    pub fn open(&self, owner_id: impl Into<Snowflake>) {
        let owner_id = owner_id.into();
        self.owner.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(owner_id);
            true
        });
    }

    pub fn is_open(&self) -> bool {
        self.owner.borrow().is_some()
    }

    /// The owner, if the gate is already open.
    pub fn owner(&self) -> Option<Snowflake> {
        self.owner.borrow().clone()
    }

    /// Resolves with the owner id once the gate is open.
    pub async fn wait(&self) -> Snowflake {
        let mut rx = self.owner.subscribe();
        loop {
            if let Some(owner) = rx.borrow_and_update().clone() {
                return owner;
            }
            // The sender lives in `self`, so the channel cannot close here.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The terminal action taken for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ignored,
    Replied,
    Escalated { pasted: bool },
}

/// Report upload filename on the paste service.
const REPORT_FILENAME: &str = "traceback.txt";

pub struct ErrorPipeline<C, P, L> {
    courier: C,
    paste: P,
    log: L,
    gate: Arc<ReadyGate>,
}

impl<C, P, L> ErrorPipeline<C, P, L>
where
    C: Courier,
    P: PasteService,
    L: LogSink,
{
    pub fn new(courier: C, paste: P, log: L, gate: Arc<ReadyGate>) -> Self {
        Self {
            courier,
            paste,
            log,
            gate,
        }
    }

    pub fn courier(&self) -> &C {
        &self.courier
    }

    pub fn paste(&self) -> &P {
        &self.paste
    }

    pub fn gate(&self) -> &Arc<ReadyGate> {
        &self.gate
    }

    /// Handle one failure. Waits for the ready gate first.
    ///
    /// A delivery failure while replying or escalating is returned as-is; it
    /// is neither retried nor escalated again.
    pub async fn handle(&self, event: FailureEvent) -> Result<Outcome, DeliveryError> {
        let owner = self.gate.wait().await;

        let ctx = match &event.source {
            FailureSource::Command(ctx) => ctx,
            FailureSource::Event { name, args, kwargs } => {
                let report = DiagnosticReport::for_event(
                    name,
                    args,
                    kwargs,
                    event.traceback.clone(),
                    event.context.as_deref(),
                );
                self.log.error(&report.render());
                let pasted = self.deliver_report(&owner, &report).await?;
                return Ok(Outcome::Escalated { pasted });
            }
        };

        let classification = classify(&event.error);
        debug!(command = %ctx.command, ?classification, "classified command failure");

        let name = &ctx.command;
        match classification {
            Classification::Ignored => return Ok(Outcome::Ignored),
            Classification::Disabled => {
                self.courier
                    .reply(ctx, Reply::public(format!("Command `{}` has been disabled.", name)))
                    .await?;
            }
            Classification::NoPrivateMessage => {
                let text = format!(
                    "The command `{}` cannot be used in Private Messages.",
                    name
                );
                self.courier
                    .send_direct(&ctx.author.id, CreateMessage::new().content(text))
                    .await?;
            }
            Classification::BadArgument(msg) => {
                self.private_reply(ctx, format!("Bad argument: {}", msg))
                    .await?;
            }
            Classification::MissingRequiredArgument(param) => {
                let text = format!(
                    "Missing required argument: `{}` See {}help {} for more info",
                    param, ctx.prefix, name
                );
                self.private_reply(ctx, text).await?;
            }
            Classification::MissingPermissions(missing) => {
                let text = format!(
                    "I cannot complete this command, you are missing the following {}",
                    permission_list(&missing)
                );
                self.courier.reply(ctx, Reply::public(text)).await?;
            }
            Classification::BotMissingPermissions(missing) => {
                let text = format!(
                    "I cannot complete this command, I am missing the following {}",
                    permission_list(&missing)
                );
                self.courier.reply(ctx, Reply::public(text)).await?;
            }
            Classification::CheckFailure => {
                self.courier
                    .reply(ctx, Reply::public("Sorry, you cannot use this command"))
                    .await?;
            }
            Classification::Unclassified => {
                let pasted = self.escalate_command(&owner, ctx, &event).await?;
                return Ok(Outcome::Escalated { pasted });
            }
        }
        Ok(Outcome::Replied)
    }

    /// Ephemeral where the transport supports it, otherwise a direct message.
    async fn private_reply(&self, ctx: &CommandContext, text: String) -> Result<(), DeliveryError> {
        if ctx.supports_ephemeral() {
            self.courier.reply(ctx, Reply::ephemeral(text)).await
        } else {
            self.courier
                .send_direct(&ctx.author.id, CreateMessage::new().content(text))
                .await
        }
    }

    async fn escalate_command(
        &self,
        owner: &str,
        ctx: &CommandContext,
        event: &FailureEvent,
    ) -> Result<bool, DeliveryError> {
        let report =
            DiagnosticReport::for_command(ctx, event.traceback.clone(), event.context.as_deref());
        self.log.error(&report.render());

        let apology = format!(
            "An unexpected error has occurred! My owner has been notified.\n\
             If you really want to know what went wrong:\n\
             ||```\n{}```||",
            escape_code_block(&event.traceback.excerpt(EXCERPT_LEN))
        );
        self.courier.reply(ctx, Reply::public(apology)).await?;

        let summary = Embed::new()
            .title(format!("An unhandled error occurred in {}", ctx.location()))
            .description(format!(
                "Invocation message: {}\n[Jump to message]({})",
                ctx.content,
                ctx.jump_url()
            ))
            .color(COLOR_RED)
            .author(ctx.author.tag(), Some(ctx.author.display_avatar_url()))
            .footer(format!("{}: {}", event.error.kind(), ctx.command))
            .timestamp(event.timestamp.to_rfc3339());
        self.courier
            .send_direct(owner, CreateMessage::new().embed(summary))
            .await?;

        self.deliver_report(owner, &report).await
    }

    /// Send the full report to the owner; returns whether it was pasted.
    pub async fn deliver_report(
        &self,
        owner: &str,
        report: &DiagnosticReport,
    ) -> Result<bool, DeliveryError> {
        let text = report.render();
        match delivery_for(&text) {
            ReportDelivery::Inline => {
                let content = format!("```\n{}```", escape_code_block(&text));
                self.courier
                    .send_direct(owner, CreateMessage::new().content(content))
                    .await?;
                Ok(false)
            }
            ReportDelivery::Paste => {
                let (paste, password) = self
                    .paste
                    .create_paste(REPORT_FILENAME, &text, None, true)
                    .await?;
                let message = format!(
                    "Traceback too long, uploaded to {} instead.\n\
                     Password: `{}` | Security token: `{}`",
                    paste.url,
                    password.as_deref().unwrap_or("none"),
                    paste.security_token
                );
                self.courier
                    .send_direct(owner, CreateMessage::new().content(message))
                    .await?;
                Ok(true)
            }
        }
    }
}

/// `permission: a` or `permissions: a, b`.
fn permission_list(names: &[String]) -> String {
    let plural = if names.len() == 1 { "" } else { "s" };
    format!("permission{}: {}", plural, names.join(", "))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::context::fixtures::{guild_context, slash_context};
    use crate::failure::CommandError;
    use crate::paste::Paste;
    use crate::report::Traceback;

    const OWNER: &str = "1000";

    /// Everything the pipeline did, in order.
    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Reply(Reply),
        Direct { to: String, message: String },
        Embed { to: String, embed: Embed },
    }

    #[derive(Default)]
    struct RecordingCourier {
        sent: Mutex<Vec<Sent>>,
        fail_direct: bool,
    }

    #[async_trait]
    impl Courier for RecordingCourier {
        async fn reply(&self, _ctx: &CommandContext, reply: Reply) -> Result<(), DeliveryError> {
            self.sent.lock().unwrap().push(Sent::Reply(reply));
            Ok(())
        }

        async fn send_direct(
            &self,
            user_id: &str,
            message: CreateMessage,
        ) -> Result<(), DeliveryError> {
            if self.fail_direct {
                return Err(DeliveryError::Send {
                    target: user_id.to_string(),
                    source: "Cannot send messages to this user".into(),
                });
            }
            let to = user_id.to_string();
            let entry = match (message.content, message.embeds) {
                (_, Some(mut embeds)) => Sent::Embed {
                    to,
                    embed: embeds.remove(0),
                },
                (Some(content), None) => Sent::Direct {
                    to,
                    message: content,
                },
                (None, None) => panic!("empty direct message"),
            };
            self.sent.lock().unwrap().push(entry);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakePaste {
        uploads: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl PasteService for FakePaste {
        async fn create_paste(
            &self,
            filename: &str,
            content: &str,
            _expires: Option<DateTime<Utc>>,
            password: bool,
        ) -> Result<(Paste, Option<String>), PasteError> {
            self.uploads
                .lock()
                .unwrap()
                .push((filename.to_string(), content.to_string()));
            let paste = Paste {
                id: "BraveQuietOtter".to_string(),
                url: "https://mystb.in/BraveQuietOtter".to_string(),
                security_token: "tok-123".to_string(),
                expires: None,
            };
            Ok((paste, password.then(|| "hunter2pass".to_string())))
        }

        async fn delete_paste(&self, _security_token: &str) -> Result<(), PasteError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        lines: Mutex<Vec<String>>,
    }

    impl LogSink for RecordingSink {
        fn error(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }
    }

    type TestPipeline = ErrorPipeline<RecordingCourier, FakePaste, RecordingSink>;

    assert_impl_all!(TestPipeline: Send, Sync);
    assert_impl_all!(ErrorPipeline<RecordingCourier, FakePaste, TracingSink>: Send, Sync);

    fn pipeline_with(courier: RecordingCourier) -> TestPipeline {
        let gate = Arc::new(ReadyGate::new());
        gate.open(OWNER);
        ErrorPipeline::new(courier, FakePaste::default(), RecordingSink::default(), gate)
    }

    fn pipeline() -> TestPipeline {
        pipeline_with(RecordingCourier::default())
    }

    fn sent(p: &TestPipeline) -> Vec<Sent> {
        p.courier.sent.lock().unwrap().clone()
    }

    fn logged(p: &TestPipeline) -> Vec<String> {
        p.log.lines.lock().unwrap().clone()
    }

    fn uploads(p: &TestPipeline) -> Vec<(String, String)> {
        p.paste.uploads.lock().unwrap().clone()
    }

    fn reply_text(entry: &Sent) -> &str {
        match entry {
            Sent::Reply(r) => &r.content,
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    // -- Ignored ------------------------------------------------------------

    #[tokio::test]
    async fn ignorable_errors_produce_no_output_and_no_logs() {
        for error in [
            CommandError::CommandNotFound("nope".to_string()),
            CommandError::CommandOnCooldown {
                retry_after: Duration::from_secs(3),
            },
            CommandError::NotOwner,
            CommandError::invoke(CommandError::NotOwner),
        ] {
            let p = pipeline();
            let outcome = p
                .handle(FailureEvent::command(guild_context("roll"), error))
                .await
                .unwrap();
            assert_eq!(outcome, Outcome::Ignored);
            assert!(sent(&p).is_empty());
            assert!(logged(&p).is_empty());
        }
    }

    // -- Short replies ------------------------------------------------------

    #[tokio::test]
    async fn disabled_command_yields_exactly_one_reply() {
        let p = pipeline();
        let outcome = p
            .handle(FailureEvent::command(
                guild_context("roll"),
                CommandError::DisabledCommand,
            ))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Replied);
        let sent = sent(&p);
        assert_eq!(sent.len(), 1);
        let text = reply_text(&sent[0]);
        assert!(text.contains("roll"));
        assert!(text.contains("has been disabled."));
        assert!(logged(&p).is_empty());
        assert!(uploads(&p).is_empty());
    }

    #[tokio::test]
    async fn no_private_message_is_sent_as_a_direct_message() {
        let p = pipeline();
        p.handle(FailureEvent::command(
            guild_context("serverinfo"),
            CommandError::NoPrivateMessage,
        ))
        .await
        .unwrap();

        assert_eq!(
            sent(&p),
            vec![Sent::Direct {
                to: "4242".to_string(),
                message: "The command `serverinfo` cannot be used in Private Messages."
                    .to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn bad_argument_is_ephemeral_for_interactions() {
        let p = pipeline();
        p.handle(FailureEvent::command(
            slash_context("roll"),
            CommandError::BadArgument("sides must be a whole number".to_string()),
        ))
        .await
        .unwrap();

        assert_eq!(
            sent(&p),
            vec![Sent::Reply(Reply::ephemeral(
                "Bad argument: sides must be a whole number"
            ))]
        );
    }

    #[tokio::test]
    async fn bad_argument_falls_back_to_direct_message() {
        let p = pipeline();
        p.handle(FailureEvent::command(
            guild_context("roll"),
            CommandError::BadArgument("sides must be a whole number".to_string()),
        ))
        .await
        .unwrap();

        assert_eq!(
            sent(&p),
            vec![Sent::Direct {
                to: "4242".to_string(),
                message: "Bad argument: sides must be a whole number".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn missing_argument_points_at_help() {
        let p = pipeline();
        p.handle(FailureEvent::command(
            slash_context("say"),
            CommandError::MissingRequiredArgument {
                param: "text".to_string(),
            },
        ))
        .await
        .unwrap();

        assert_eq!(
            sent(&p),
            vec![Sent::Reply(Reply::ephemeral(
                "Missing required argument: `text` See /help say for more info"
            ))]
        );
    }

    #[tokio::test]
    async fn permission_wording_is_singular_for_one() {
        let p = pipeline();
        p.handle(FailureEvent::command(
            guild_context("say"),
            CommandError::MissingPermissions(vec!["manage_messages".to_string()]),
        ))
        .await
        .unwrap();

        let sent = sent(&p);
        assert_eq!(
            reply_text(&sent[0]),
            "I cannot complete this command, you are missing the following permission: manage_messages"
        );
    }

    #[tokio::test]
    async fn permission_wording_is_plural_for_many() {
        let p = pipeline();
        p.handle(FailureEvent::command(
            guild_context("serverinfo"),
            CommandError::BotMissingPermissions(vec![
                "send_messages".to_string(),
                "embed_links".to_string(),
            ]),
        ))
        .await
        .unwrap();

        let sent = sent(&p);
        assert_eq!(
            reply_text(&sent[0]),
            "I cannot complete this command, I am missing the following permissions: send_messages, embed_links"
        );
    }

    #[tokio::test]
    async fn wrapped_check_failure_gets_the_generic_reply() {
        let p = pipeline();
        let outcome = p
            .handle(FailureEvent::command(
                guild_context("roll"),
                CommandError::invoke(CommandError::CheckFailure("custom check".to_string())),
            ))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Replied);
        assert_eq!(
            sent(&p),
            vec![Sent::Reply(Reply::public("Sorry, you cannot use this command"))]
        );
        assert!(logged(&p).is_empty());
    }

    // -- Escalation ---------------------------------------------------------

    #[tokio::test]
    async fn unclassified_command_error_is_escalated() {
        let p = pipeline();
        let outcome = p
            .handle(
                FailureEvent::command(
                    guild_context("roll"),
                    CommandError::invoke(CommandError::other("dice fell off the table")),
                )
                .with_traceback(Traceback::from_frames(vec![
                    "Caused by: dice fell off the table\n".to_string(),
                    format!("Error: {}\n", "x".repeat(300)),
                ])),
            )
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Escalated { pasted: false });
        assert_eq!(logged(&p).len(), 1);
        assert!(logged(&p)[0].contains("Jump: https://discord.com/channels/100/200/300"));

        let sent = sent(&p);
        assert_eq!(sent.len(), 3, "{:#?}", sent);

        // Apology carries only the first 150 characters of the last frame.
        let apology = reply_text(&sent[0]);
        assert!(apology.starts_with("An unexpected error has occurred!"));
        let excerpt = format!("Error: {}", "x".repeat(143));
        assert!(apology.contains(&format!("```\n{}```", excerpt)));

        match &sent[1] {
            Sent::Embed { to, embed } => {
                assert_eq!(to, OWNER);
                assert_eq!(
                    embed.title.as_deref(),
                    Some("An unhandled error occurred in Shrine | #general")
                );
                assert_eq!(embed.color, Some(COLOR_RED));
                let description = embed.description.as_deref().unwrap_or_default();
                assert!(description.contains("Invocation message: !roll"));
                assert!(description.contains("(https://discord.com/channels/100/200/300)"));
                assert_eq!(embed.author.as_ref().map(|a| a.name.as_str()), Some("dave"));
            }
            other => panic!("expected owner embed, got {:?}", other),
        }

        match &sent[2] {
            Sent::Direct { to, message } => {
                assert_eq!(to, OWNER);
                assert!(message.starts_with("```\n"));
                assert!(message.contains("dice fell off the table"));
            }
            other => panic!("expected inline report, got {:?}", other),
        }
        assert!(uploads(&p).is_empty());
    }

    fn report_of_len(len: usize) -> DiagnosticReport {
        DiagnosticReport::new(Vec::new(), Traceback::from_frames(vec!["y".repeat(len)]))
    }

    #[tokio::test]
    async fn report_just_below_threshold_is_sent_inline() {
        let p = pipeline();
        let pasted = p.deliver_report(OWNER, &report_of_len(1979)).await.unwrap();

        assert!(!pasted);
        assert!(uploads(&p).is_empty());
        assert_eq!(
            sent(&p),
            vec![Sent::Direct {
                to: OWNER.to_string(),
                message: format!("```\n{}```", "y".repeat(1979)),
            }]
        );
    }

    #[tokio::test]
    async fn backticks_cannot_close_the_report_block() {
        let p = pipeline();
        let report = DiagnosticReport::new(
            Vec::new(),
            Traceback::from_frames(vec!["Error: bad input ```rm```\n".to_string()]),
        );
        p.deliver_report(OWNER, &report).await.unwrap();

        match &sent(&p)[0] {
            Sent::Direct { message, .. } => {
                let body = &message["```\n".len()..message.len() - "```".len()];
                assert!(!body.contains("```"));
                assert!(body.contains("bad input"));
            }
            other => panic!("expected inline report, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn report_at_threshold_is_pasted() {
        let p = pipeline();
        let pasted = p.deliver_report(OWNER, &report_of_len(1980)).await.unwrap();

        assert!(pasted);
        assert_eq!(
            uploads(&p),
            vec![("traceback.txt".to_string(), "y".repeat(1980))]
        );
        assert_eq!(
            sent(&p),
            vec![Sent::Direct {
                to: OWNER.to_string(),
                message: "Traceback too long, uploaded to https://mystb.in/BraveQuietOtter instead.\n\
                          Password: `hunter2pass` | Security token: `tok-123`"
                    .to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn event_failure_with_long_traceback_is_logged_and_pasted() {
        let p = pipeline();
        let traceback = Traceback::from_frames(vec![format!("Error: {}\n", "z".repeat(3000))]);
        let outcome = p
            .handle(
                FailureEvent::event(
                    "MESSAGE_CREATE",
                    vec!["message 55".to_string()],
                    CommandError::other("handler exploded"),
                )
                .with_traceback(traceback),
            )
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Escalated { pasted: true });

        let logs = logged(&p);
        assert_eq!(logs.len(), 1);
        assert!(logs[0].starts_with("An error occurred in event `MESSAGE_CREATE`\nArgs: [message 55]"));

        // No invoker to reply to; the owner gets a single link message.
        let sent = sent(&p);
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Sent::Direct { to, message } => {
                assert_eq!(to, OWNER);
                assert!(message.contains("https://mystb.in/BraveQuietOtter"));
                assert!(message.contains("Password: `hunter2pass`"));
            }
            other => panic!("expected paste link, got {:?}", other),
        }
        assert_eq!(uploads(&p).len(), 1);
        assert!(uploads(&p)[0].1.contains(&"z".repeat(3000)));
    }

    #[tokio::test]
    async fn blocked_direct_messages_surface_as_errors() {
        let p = pipeline_with(RecordingCourier {
            fail_direct: true,
            ..Default::default()
        });
        let result = p
            .handle(FailureEvent::command(
                guild_context("roll"),
                CommandError::other("boom"),
            ))
            .await;

        assert!(matches!(result, Err(DeliveryError::Send { .. })));
        // Logged and replied before the owner delivery failed; nothing retried.
        assert_eq!(logged(&p).len(), 1);
        assert_eq!(sent(&p).len(), 1);
    }

    // -- Ready gate ---------------------------------------------------------

    #[tokio::test]
    async fn handling_waits_for_the_ready_gate() {
        let gate = Arc::new(ReadyGate::new());
        let p = Arc::new(ErrorPipeline::new(
            RecordingCourier::default(),
            FakePaste::default(),
            RecordingSink::default(),
            Arc::clone(&gate),
        ));

        let task = tokio::spawn({
            let p = Arc::clone(&p);
            async move {
                p.handle(FailureEvent::command(
                    guild_context("roll"),
                    CommandError::DisabledCommand,
                ))
                .await
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sent(&p).is_empty());

        gate.open(OWNER);
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, Outcome::Replied);
        assert_eq!(sent(&p).len(), 1);
    }

    #[tokio::test]
    async fn gate_keeps_the_first_owner() {
        let gate = ReadyGate::new();
        assert!(!gate.is_open());
        gate.open("1");
        gate.open("2");
        assert!(gate.is_open());
        assert_eq!(gate.owner().as_deref(), Some("1"));
        assert_eq!(gate.wait().await, "1");
    }

    #[test]
    fn permission_list_pluralises() {
        assert_eq!(permission_list(&["a".to_string()]), "permission: a");
        assert_eq!(
            permission_list(&["a".to_string(), "b".to_string()]),
            "permissions: a, b"
        );
    }
}
