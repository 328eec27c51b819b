//! Bot configuration read from the environment.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::Snowflake;

pub const DEFAULT_PREFIX: &str = "!";
pub const DEFAULT_PASTE_URL: &str = "https://mystb.in";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Where slash commands are registered on READY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlashCommandMode {
    Global,
    Off,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: String,
    /// Escalation target; resolved from the application owner when unset.
    pub owner_id: Option<Snowflake>,
    /// Text prefixes, longest first so `!!` wins over `!`.
    pub prefixes: Vec<String>,
    /// Lowercase names of commands that are switched off.
    pub disabled_commands: HashSet<String>,
    pub paste_url: String,
    pub slash_commands: SlashCommandMode,
    pub started_at: DateTime<Utc>,
}

impl BotConfig {
    /// Load from the process environment. Call `dotenv::dotenv()` first to
    /// honour a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let token = get("DISCORD_TOKEN").ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

        let owner_id = match get("BOT_OWNER_ID") {
            Some(id) if id.parse::<u64>().is_ok() => Some(id),
            Some(id) => {
                return Err(ConfigError::Invalid {
                    var: "BOT_OWNER_ID",
                    reason: format!("{:?} is not a user id", id),
                })
            }
            None => None,
        };

        let mut prefixes = get("BOT_PREFIXES")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();
        if prefixes.is_empty() {
            prefixes.push(DEFAULT_PREFIX.to_string());
        }
        prefixes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        prefixes.dedup();

        let disabled_commands = get("DISABLED_COMMANDS")
            .map(|raw| {
                split_list(&raw)
                    .into_iter()
                    .map(|name| name.to_lowercase())
                    .collect()
            })
            .unwrap_or_default();

        let paste_url = get("PASTE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_PASTE_URL.to_string());
        if !paste_url.starts_with("http://") && !paste_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                var: "PASTE_URL",
                reason: format!("{:?} is not an http(s) URL", paste_url),
            });
        }

        let slash_commands = match get("SLASH_COMMAND_MODE").as_deref() {
            None | Some("global") => SlashCommandMode::Global,
            Some("off") => SlashCommandMode::Off,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "SLASH_COMMAND_MODE",
                    reason: format!("expected `global` or `off`, got {:?}", other),
                })
            }
        };

        Ok(Self {
            token,
            owner_id,
            prefixes,
            disabled_commands,
            paste_url,
            slash_commands,
            started_at: Utc::now(),
        })
    }

    pub fn is_disabled(&self, command: &str) -> bool {
        self.disabled_commands.contains(command)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
pub(crate) fn test_config() -> BotConfig {
    BotConfig::from_lookup(|key| match key {
        "DISCORD_TOKEN" => Some("token".to_string()),
        "BOT_OWNER_ID" => Some("1000".to_string()),
        _ => None,
    })
    .expect("valid test config")
}
