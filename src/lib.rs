//! A Discord bot whose failures are classified and escalated.
//!
//! Every failure raised while running a command or handling a gateway event
//! enters the [`pipeline`] exactly once and ends in one of three ways: it is
//! ignored, the invoker gets a short reply, or the bot owner receives a full
//! diagnostic report by direct message (via a paste link when too long).
//!
//! Without the `io` feature only the pipeline, its data model and the
//! Discord types are compiled.

pub mod commands;
pub mod config;
pub mod context;
pub mod events;
pub mod failure;
pub mod paste;
pub mod pipeline;
pub mod report;
pub mod types;

#[cfg(feature = "io")]
pub mod bot;
#[cfg(feature = "io")]
pub mod gateway;
#[cfg(feature = "io")]
pub mod http;

#[cfg(feature = "io")]
pub use bot::{Bot, BotError};
pub use config::BotConfig;
pub use failure::{classify, Classification, CommandError, FailureEvent};
pub use pipeline::{ErrorPipeline, Outcome, ReadyGate};

/// Run the bot until the gateway stops.
#[cfg(feature = "io")]
pub async fn run(config: BotConfig) -> Result<(), BotError> {
    std::sync::Arc::new(Bot::new(config)).run().await
}
