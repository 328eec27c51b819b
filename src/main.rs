use std::process::ExitCode;

use tracing::error;

use kannushi::{BotConfig, BotError};

#[tokio::main]
async fn main() -> ExitCode {
    // Respects RUST_LOG, defaults to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenv::dotenv().ok();

    match try_main().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "bot stopped");
            ExitCode::FAILURE
        }
    }
}

async fn try_main() -> Result<(), BotError> {
    let config = BotConfig::from_env()?;
    kannushi::run(config).await
}
