//! Rate-limit aware client for the Discord REST API.
//!
//! All outbound REST calls go through [`DiscordHttpClient`] so that auth
//! headers, rate-limit back-off and error mapping live in one place. The
//! client also implements [`Courier`], which is how the error pipeline
//! delivers replies and direct messages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_lock::Mutex;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::commands::GuildDirectory;
use crate::context::CommandContext;
use crate::failure::CommandError;
use crate::pipeline::{Courier, DeliveryError, Reply};
use crate::types::*;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://discord.com/api/v10";
const USER_AGENT: &str = concat!(
    "DiscordBot (kannushi, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);
const MAX_RETRIES: u32 = 5;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Rate-limit tracker (per-bucket)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct BucketState {
    remaining: u32,
    resets_at: Instant,
}

#[derive(Debug, Default)]
struct RateLimiter {
    /// Route key to bucket id.
    route_buckets: HashMap<String, String>,
    buckets: HashMap<String, BucketState>,
    /// No requests at all until this instant.
    global_until: Option<Instant>,
}

impl RateLimiter {
    /// How long to wait before sending on `route_key`, if at all.
    fn delay_for(&self, route_key: &str, now: Instant) -> Option<Duration> {
        if let Some(until) = self.global_until {
            if until > now {
                return Some(until - now);
            }
        }

        let bucket_id = self.route_buckets.get(route_key)?;
        let state = self.buckets.get(bucket_id)?;
        (state.remaining == 0 && state.resets_at > now).then(|| state.resets_at - now)
    }

    fn update(&mut self, route_key: &str, info: &RateLimitInfo, now: Instant) {
        let reset_in = info
            .reset_after
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::from_secs(1));

        if info.is_global {
            self.global_until = Some(now + reset_in);
        }

        if let Some(bucket) = &info.bucket {
            self.route_buckets
                .insert(route_key.to_string(), bucket.clone());
            self.buckets.insert(
                bucket.clone(),
                BucketState {
                    remaining: info.remaining.unwrap_or(1),
                    resets_at: now + reset_in,
                },
            );
        }
    }
}

fn parse_rate_limit_headers(headers: &HeaderMap) -> RateLimitInfo {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    RateLimitInfo {
        remaining: header("x-ratelimit-remaining").and_then(|s| s.parse().ok()),
        reset_after: header("x-ratelimit-reset-after")
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0),
        bucket: header("x-ratelimit-bucket").map(str::to_string),
        is_global: header("x-ratelimit-global") == Some("true")
            || header("x-ratelimit-scope") == Some("global"),
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Discord API error {status} on {route}: {body}")]
    Api {
        status: u16,
        body: String,
        route: String,
    },
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<HttpError> for CommandError {
    fn from(err: HttpError) -> Self {
        CommandError::other(err)
    }
}

fn delivery_error(target: impl Into<String>, err: HttpError) -> DeliveryError {
    DeliveryError::Send {
        target: target.into(),
        source: Box::new(err),
    }
}

// ---------------------------------------------------------------------------
// DiscordHttpClient
// ---------------------------------------------------------------------------

/// A thin, rate-limit aware HTTP client for the Discord REST API.
///
/// Cheap to clone (internals are behind `Arc`).
#[derive(Clone)]
pub struct DiscordHttpClient {
    http: reqwest::Client,
    token: Arc<str>,
    limiter: Arc<Mutex<RateLimiter>>,
}

impl DiscordHttpClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into().into(),
            limiter: Arc::new(Mutex::new(RateLimiter::default())),
        }
    }

    async fn wait_for_bucket(&self, route_key: &str) {
        let delay = self.limiter.lock().await.delay_for(route_key, Instant::now());
        if let Some(delay) = delay {
            let delay = delay.min(MAX_BACKOFF);
            debug!(
                route = route_key,
                delay_ms = delay.as_millis() as u64,
                "rate-limit pre-emptive backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Send a request to `{BASE_URL}/{path}` and return the raw body.
    ///
    /// `route_key` groups requests for rate-limit bucketing, e.g.
    /// `POST /channels/{channel_id}/messages`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        route_key: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, HttpError> {
        let url = format!("{}/{}", BASE_URL, path.trim_start_matches('/'));

        for attempt in 0..=MAX_RETRIES {
            self.wait_for_bucket(route_key).await;

            let mut req = self
                .http
                .request(method.clone(), &url)
                .header("authorization", format!("Bot {}", self.token))
                .header("user-agent", USER_AGENT);
            if let Some(json) = body {
                req = req.json(json);
            }

            let resp = req.send().await?;
            let status = resp.status();
            let rl_info = parse_rate_limit_headers(resp.headers());
            self.limiter
                .lock()
                .await
                .update(route_key, &rl_info, Instant::now());

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RETRIES {
                let retry_after = rl_info.reset_after.unwrap_or(1.0);
                warn!(
                    route = route_key,
                    attempt,
                    retry_after_s = retry_after,
                    global = rl_info.is_global,
                    "rate-limited by Discord, backing off"
                );
                tokio::time::sleep(Duration::from_secs_f64(retry_after).min(MAX_BACKOFF)).await;
                continue;
            }

            let bytes = resp.bytes().await?;
            if status.is_success() {
                return Ok(bytes.to_vec());
            }
            return Err(HttpError::Api {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
                route: route_key.to_string(),
            });
        }

        Err(HttpError::Api {
            status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            body: "rate-limited after max retries".to_string(),
            route: route_key.to_string(),
        })
    }

    /// Like [`request`](Self::request) but serialises `body` and parses the
    /// response as JSON.
    pub async fn request_json<T, B>(
        &self,
        method: Method,
        path: &str,
        route_key: &str,
        body: Option<&B>,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = body.map(serde_json::to_value).transpose()?;
        let bytes = self.request(method, path, route_key, body.as_ref()).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub async fn create_message(
        &self,
        channel_id: &str,
        msg: &CreateMessage,
    ) -> Result<Message, HttpError> {
        let path = format!("channels/{}/messages", channel_id);
        let route_key = format!("POST /channels/{}/messages", channel_id);
        self.request_json(Method::POST, &path, &route_key, Some(msg))
            .await
    }

    /// Open (or fetch the existing) DM channel with a user.
    pub async fn create_dm_channel(&self, user_id: &str) -> Result<Channel, HttpError> {
        self.request_json(
            Method::POST,
            "users/@me/channels",
            "POST /users/@me/channels",
            Some(&json!({ "recipient_id": user_id })),
        )
        .await
    }

    pub async fn send_dm(&self, user_id: &str, msg: &CreateMessage) -> Result<Message, HttpError> {
        let channel = self.create_dm_channel(user_id).await?;
        self.create_message(&channel.id, msg).await
    }

    // ------------------------------------------------------------------
    // Interactions
    // ------------------------------------------------------------------

    /// Initial response to an interaction. Discord answers 204 No Content.
    pub async fn create_interaction_response(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        response: &InteractionResponse,
    ) -> Result<(), HttpError> {
        let path = format!(
            "interactions/{}/{}/callback",
            interaction_id, interaction_token
        );
        let body = serde_json::to_value(response)?;
        self.request(
            Method::POST,
            &path,
            "POST /interactions/callback",
            Some(&body),
        )
        .await?;
        Ok(())
    }

    /// Additional message after the interaction has been answered.
    pub async fn create_followup_message(
        &self,
        application_id: &str,
        interaction_token: &str,
        data: &InteractionCallbackData,
    ) -> Result<Message, HttpError> {
        let path = format!("webhooks/{}/{}", application_id, interaction_token);
        self.request_json(
            Method::POST,
            &path,
            "POST /webhooks/interaction",
            Some(data),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Application & guild
    // ------------------------------------------------------------------

    pub async fn current_application(&self) -> Result<ApplicationInfo, HttpError> {
        self.request_json::<_, ()>(
            Method::GET,
            "oauth2/applications/@me",
            "GET /oauth2/applications/@me",
            None,
        )
        .await
    }

    /// Guild info with approximate member counts.
    pub async fn get_guild(&self, guild_id: &str) -> Result<Guild, HttpError> {
        let path = format!("guilds/{}?with_counts=true", guild_id);
        let route_key = format!("GET /guilds/{}", guild_id);
        self.request_json::<_, ()>(Method::GET, &path, &route_key, None)
            .await
    }

    pub async fn bulk_overwrite_global_commands(
        &self,
        application_id: &str,
        commands: &[ApplicationCommand],
    ) -> Result<Vec<ApplicationCommand>, HttpError> {
        let path = format!("applications/{}/commands", application_id);
        let route_key = format!("PUT /applications/{}/commands", application_id);
        self.request_json(Method::PUT, &path, &route_key, Some(commands))
            .await
    }
}

impl std::fmt::Debug for DiscordHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordHttpClient")
            .field("token", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Courier
// ---------------------------------------------------------------------------

#[async_trait]
impl GuildDirectory for DiscordHttpClient {
    async fn guild(&self, guild_id: &str) -> Result<Guild, CommandError> {
        Ok(self.get_guild(guild_id).await?)
    }
}

impl From<Reply> for InteractionResponse {
    fn from(reply: Reply) -> Self {
        let mut response = InteractionResponse::message(reply.content, reply.ephemeral);
        if let Some(data) = response.data.as_mut() {
            if data.content.as_deref() == Some("") {
                data.content = None;
            }
            if !reply.embeds.is_empty() {
                data.embeds = Some(reply.embeds);
            }
        }
        response
    }
}

#[async_trait]
impl Courier for DiscordHttpClient {
    async fn reply(&self, ctx: &CommandContext, reply: Reply) -> Result<(), DeliveryError> {
        let Some(handle) = &ctx.interaction else {
            let mut msg = CreateMessage::new().reply_to(ctx.message_id.clone());
            if !reply.content.is_empty() {
                msg = msg.content(reply.content);
            }
            if !reply.embeds.is_empty() {
                msg.embeds = Some(reply.embeds);
            }
            self.create_message(&ctx.channel_id, &msg)
                .await
                .map_err(|e| delivery_error(format!("channel {}", ctx.channel_id), e))?;
            return Ok(());
        };

        let response = InteractionResponse::from(reply);
        let initial = self
            .create_interaction_response(&handle.id, &handle.token, &response)
            .await;
        match initial {
            Ok(()) => Ok(()),
            // Already acknowledged by the command body; follow up instead.
            Err(HttpError::Api { status: 400, .. }) => {
                let data = response.data.unwrap_or_default();
                self.create_followup_message(&handle.application_id, &handle.token, &data)
                    .await
                    .map(drop)
                    .map_err(|e| delivery_error(format!("interaction {}", handle.id), e))
            }
            Err(e) => Err(delivery_error(format!("interaction {}", handle.id), e)),
        }
    }

    async fn send_direct(&self, user_id: &str, message: CreateMessage) -> Result<(), DeliveryError> {
        self.send_dm(user_id, &message)
            .await
            .map(drop)
            .map_err(|e| delivery_error(format!("user {}", user_id), e))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
