//! Failure taxonomy and classification.
//!
//! Everything that can go wrong while running a command is a
//! [`CommandError`]. Checks raise the specific variants directly; errors
//! raised *inside* a command body arrive wrapped in
//! [`CommandError::Invoke`], which [`classify`] looks through exactly once.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::context::CommandContext;
use crate::report::Traceback;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command \"{0}\" is not found")]
    CommandNotFound(String),

    #[error("You are on cooldown. Try again in {:.2}s", .retry_after.as_secs_f64())]
    CommandOnCooldown { retry_after: Duration },

    #[error("You do not own this bot.")]
    NotOwner,

    #[error("This command is disabled.")]
    DisabledCommand,

    #[error("This command cannot be used in private messages.")]
    NoPrivateMessage,

    #[error("{0}")]
    BadArgument(String),

    #[error("{param} is a required argument that is missing.")]
    MissingRequiredArgument { param: String },

    #[error("You are missing {} permission(s) to run this command.", .0.join(", "))]
    MissingPermissions(Vec<String>),

    #[error("Bot requires {} permission(s) to run this command.", .0.join(", "))]
    BotMissingPermissions(Vec<String>),

    #[error("{0}")]
    CheckFailure(String),

    /// An error raised while the command body was running.
    #[error("Command raised an exception: {original}")]
    Invoke {
        #[source]
        original: Box<CommandError>,
    },

    #[error(transparent)]
    Other(BoxError),
}

impl CommandError {
    /// Wrap any error as an unclassified failure.
    pub fn other(error: impl Into<BoxError>) -> Self {
        CommandError::Other(error.into())
    }

    /// Wrap an error raised by a command body.
    pub fn invoke(original: CommandError) -> Self {
        CommandError::Invoke {
            original: Box::new(original),
        }
    }

    /// The wrapped cause of an [`Invoke`](CommandError::Invoke), or `self`.
    /// Looks through a single level only.
    pub fn original(&self) -> &CommandError {
        match self {
            CommandError::Invoke { original } => original,
            other => other,
        }
    }

    /// Short variant name used as the kind in tracebacks.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::CommandNotFound(_) => "CommandNotFound",
            CommandError::CommandOnCooldown { .. } => "CommandOnCooldown",
            CommandError::NotOwner => "NotOwner",
            CommandError::DisabledCommand => "DisabledCommand",
            CommandError::NoPrivateMessage => "NoPrivateMessage",
            CommandError::BadArgument(_) => "BadArgument",
            CommandError::MissingRequiredArgument { .. } => "MissingRequiredArgument",
            CommandError::MissingPermissions(_) => "MissingPermissions",
            CommandError::BotMissingPermissions(_) => "BotMissingPermissions",
            CommandError::CheckFailure(_) => "CheckFailure",
            CommandError::Invoke { .. } => "CommandInvokeError",
            CommandError::Other(_) => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What the pipeline should do about a command failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Not found, on cooldown, or not owner: no output at all.
    Ignored,
    Disabled,
    NoPrivateMessage,
    BadArgument(String),
    MissingRequiredArgument(String),
    MissingPermissions(Vec<String>),
    BotMissingPermissions(Vec<String>),
    CheckFailure,
    /// Anything unexpected; escalated to the owner.
    Unclassified,
}

/// Map an error to its classification. First match wins, in the order the
/// variants of [`Classification`] are declared.
pub fn classify(error: &CommandError) -> Classification {
    match error.original() {
        CommandError::CommandNotFound(_)
        | CommandError::CommandOnCooldown { .. }
        | CommandError::NotOwner => Classification::Ignored,
        CommandError::DisabledCommand => Classification::Disabled,
        CommandError::NoPrivateMessage => Classification::NoPrivateMessage,
        CommandError::BadArgument(msg) => Classification::BadArgument(msg.clone()),
        CommandError::MissingRequiredArgument { param } => {
            Classification::MissingRequiredArgument(param.clone())
        }
        CommandError::MissingPermissions(names) => {
            Classification::MissingPermissions(names.clone())
        }
        CommandError::BotMissingPermissions(names) => {
            Classification::BotMissingPermissions(names.clone())
        }
        CommandError::CheckFailure(_) => Classification::CheckFailure,
        CommandError::Invoke { .. } | CommandError::Other(_) => Classification::Unclassified,
    }
}

// ---------------------------------------------------------------------------
// Failure events
// ---------------------------------------------------------------------------

/// Where a failure was raised.
#[derive(Debug, Clone)]
pub enum FailureSource {
    /// While running a command.
    Command(CommandContext),
    /// While handling a gateway event outside any command.
    Event {
        name: String,
        args: Vec<String>,
        kwargs: Vec<(String, String)>,
    },
}

/// A captured failure plus its origin, entering the pipeline once.
#[derive(Debug)]
pub struct FailureEvent {
    pub source: FailureSource,
    pub error: CommandError,
    /// Free-form note from whoever raised the failure.
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub traceback: Traceback,
}

impl FailureEvent {
    pub fn new(source: FailureSource, error: CommandError) -> Self {
        let traceback = Traceback::capture(&error);
        Self {
            source,
            error,
            context: None,
            timestamp: Utc::now(),
            traceback,
        }
    }

    pub fn command(ctx: CommandContext, error: CommandError) -> Self {
        Self::new(FailureSource::Command(ctx), error)
    }

    pub fn event(name: impl Into<String>, args: Vec<String>, error: CommandError) -> Self {
        Self::new(
            FailureSource::Event {
                name: name.into(),
                args,
                kwargs: Vec::new(),
            },
            error,
        )
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Replace the captured traceback, e.g. with one recorded elsewhere.
    pub fn with_traceback(mut self, traceback: Traceback) -> Self {
        self.traceback = traceback;
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
