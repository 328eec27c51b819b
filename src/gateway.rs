//! Gateway (WebSocket) transport for the Discord API.
//!
//! Owns the connection lifecycle:
//!   - connect → receive HELLO → send IDENTIFY
//!   - heartbeat on the advertised interval, answering op 1 immediately
//!   - reconnect with exponential back-off on disconnect
//!
//! Sessions are never resumed; every reconnect identifies afresh. The rest
//! of the crate consumes [`GatewayEvent`]s from an `async_channel` without
//! touching `tokio_tungstenite` directly.

use std::time::Duration;

use bitflags::bitflags;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::events::GatewayEvent;
use crate::types::GatewayPayload;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Consecutive failed connection attempts before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;
const MAX_BACKOFF_MS: f64 = 60_000.0;
const HELLO_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 256;

bitflags! {
    /// Gateway intents the bot identifies with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Intents: u32 {
        const GUILDS = 1 << 0;
        const GUILD_MESSAGES = 1 << 9;
        const DIRECT_MESSAGES = 1 << 12;
        const MESSAGE_CONTENT = 1 << 15;
    }
}

impl Default for Intents {
    fn default() -> Self {
        Intents::GUILDS
            | Intents::GUILD_MESSAGES
            | Intents::DIRECT_MESSAGES
            | Intents::MESSAGE_CONTENT
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed gateway payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("handshake failed: {0}")]
    Hello(String),
    #[error("gateway closed the connection with fatal code {code}: {reason}")]
    FatalClose { code: u16, reason: String },
    #[error("gave up after {attempts} consecutive reconnect attempts")]
    GaveUp { attempts: u32 },
}

/// Close codes after which reconnecting cannot succeed: authentication
/// failed, invalid shard, sharding required, invalid API version, invalid or
/// disallowed intents.
pub fn is_fatal_close(code: u16) -> bool {
    matches!(code, 4004 | 4010..=4014)
}

/// Exponential back-off with ±25% jitter, capped at 60 s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.min(6));
    let jittered = (rand::random::<f64>() * 0.5 + 0.75) * base_ms as f64;
    Duration::from_millis(jittered.min(MAX_BACKOFF_MS) as u64)
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub intents: Intents,
    pub url: String,
}

impl GatewayConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            intents: Intents::default(),
            url: DEFAULT_GATEWAY_URL.to_string(),
        }
    }
}

pub struct GatewayHandle {
    /// Typed dispatch events, in arrival order.
    pub events: async_channel::Receiver<GatewayEvent>,
    /// Resolves when the gateway stops for good.
    pub driver: tokio::task::JoinHandle<Result<(), GatewayError>>,
}

/// Spawn the gateway driver. It stops when every receiver of
/// [`GatewayHandle::events`] is dropped or on an unrecoverable error.
pub fn connect(config: GatewayConfig) -> GatewayHandle {
    let (tx, events) = async_channel::bounded(EVENT_BUFFER);
    let driver = tokio::spawn(drive(config, tx));
    GatewayHandle { events, driver }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, WsMessage>;
type WsRead = SplitStream<WsStream>;

#[derive(Debug)]
enum SessionEnd {
    /// The connection dropped or Discord asked us to reconnect.
    Disconnected,
    /// Nobody is listening for events any more.
    ConsumerGone,
}

async fn drive(
    config: GatewayConfig,
    tx: async_channel::Sender<GatewayEvent>,
) -> Result<(), GatewayError> {
    let mut attempts: u32 = 0;

    loop {
        match run_session(&config, &tx, &mut attempts).await {
            Ok(SessionEnd::ConsumerGone) => {
                info!("event channel closed, shutting down gateway");
                return Ok(());
            }
            Ok(SessionEnd::Disconnected) => {}
            Err(e @ GatewayError::FatalClose { .. }) => {
                error!(error = %e, "fatal gateway close");
                return Err(e);
            }
            Err(e) => warn!(error = %e, "gateway session failed"),
        }

        attempts += 1;
        if attempts > MAX_RECONNECT_ATTEMPTS {
            return Err(GatewayError::GaveUp {
                attempts: MAX_RECONNECT_ATTEMPTS,
            });
        }
        let backoff = backoff_delay(attempts);
        warn!(
            delay_ms = backoff.as_millis() as u64,
            attempt = attempts,
            "reconnecting after backoff"
        );
        tokio::time::sleep(backoff).await;
    }
}

/// One connection, from handshake to disconnect. Resets `attempts` once the
/// handshake succeeds.
async fn run_session(
    config: &GatewayConfig,
    tx: &async_channel::Sender<GatewayEvent>,
    attempts: &mut u32,
) -> Result<SessionEnd, GatewayError> {
    info!(url = %config.url, "connecting to Discord gateway");
    let (ws, _) = tokio_tungstenite::connect_async(config.url.as_str()).await?;
    let (mut write, mut read) = ws.split();

    let interval_ms = read_hello(&mut read).await?;
    send_json(&mut write, &identify_payload(config)).await?;
    info!(interval_ms, "sent IDENTIFY");
    *attempts = 0;

    // First beat after `interval * jitter`, jitter in [0, 1).
    let interval = Duration::from_millis(interval_ms);
    let first_beat = interval.mul_f64(rand::random::<f64>());
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + first_beat, interval);
    let mut sequence: Option<u64> = None;
    let mut awaiting_ack = false;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if awaiting_ack {
                    warn!("heartbeat not acknowledged, reconnecting");
                    return Ok(SessionEnd::Disconnected);
                }
                send_json(&mut write, &json!({"op": 1, "d": sequence})).await?;
                awaiting_ack = true;
                debug!(?sequence, "sent heartbeat");
            }

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read error");
                        return Ok(SessionEnd::Disconnected);
                    }
                    None => {
                        info!("WebSocket stream ended");
                        return Ok(SessionEnd::Disconnected);
                    }
                };

                let text = match msg {
                    WsMessage::Text(text) => text,
                    WsMessage::Close(frame) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((1000, String::new()));
                        warn!(close_code = code, %reason, "WebSocket closed by server");
                        if is_fatal_close(code) {
                            return Err(GatewayError::FatalClose { code, reason });
                        }
                        return Ok(SessionEnd::Disconnected);
                    }
                    _ => continue,
                };

                let payload: GatewayPayload = match serde_json::from_str(&text) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "failed to parse gateway payload");
                        continue;
                    }
                };
                if payload.s.is_some() {
                    sequence = payload.s;
                }

                match GatewayEvent::from_payload(payload) {
                    GatewayEvent::HeartbeatRequest => {
                        send_json(&mut write, &json!({"op": 1, "d": sequence})).await?;
                        debug!("sent requested heartbeat");
                    }
                    GatewayEvent::HeartbeatAck => awaiting_ack = false,
                    GatewayEvent::Reconnect => {
                        info!("gateway requested reconnect (op 7)");
                        return Ok(SessionEnd::Disconnected);
                    }
                    GatewayEvent::InvalidSession(resumable) => {
                        warn!(resumable, "session invalidated (op 9)");
                        let wait = Duration::from_secs(1).mul_f64(1.0 + 4.0 * rand::random::<f64>());
                        tokio::time::sleep(wait).await;
                        return Ok(SessionEnd::Disconnected);
                    }
                    event => {
                        if let GatewayEvent::Ready(ready) = &event {
                            info!(session_id = %ready.session_id, user = %ready.user.username, "gateway READY");
                        }
                        if tx.send(event).await.is_err() {
                            return Ok(SessionEnd::ConsumerGone);
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn read_hello(read: &mut WsRead) -> Result<u64, GatewayError> {
    let msg = tokio::time::timeout(HELLO_TIMEOUT, read.next())
        .await
        .map_err(|_| GatewayError::Hello("timed out waiting for HELLO".to_string()))?
        .ok_or_else(|| GatewayError::Hello("stream ended before HELLO".to_string()))??;

    let text = match msg {
        WsMessage::Text(text) => text,
        other => {
            return Err(GatewayError::Hello(format!(
                "expected text frame for HELLO, got {:?}",
                other
            )))
        }
    };

    match GatewayEvent::from_payload(serde_json::from_str(&text)?) {
        GatewayEvent::Hello(interval) => Ok(interval),
        other => Err(GatewayError::Hello(format!(
            "expected HELLO, got {}",
            other.name()
        ))),
    }
}

fn identify_payload(config: &GatewayConfig) -> serde_json::Value {
    json!({
        "op": 2,
        "d": {
            "token": config.token,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "kannushi",
                "device": "kannushi"
            },
            "intents": config.intents.bits(),
        }
    })
}

async fn send_json(write: &mut WsWrite, payload: &serde_json::Value) -> Result<(), GatewayError> {
    let text = serde_json::to_string(payload)?;
    write.send(WsMessage::Text(text)).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
