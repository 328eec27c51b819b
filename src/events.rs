//! Typed gateway events.
//!
//! The gateway module deserialises dispatch payloads into [`GatewayEvent`] so
//! the bot can pattern-match on strongly-typed data instead of raw JSON.

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::types::*;

/// A fully-parsed event coming off the Discord gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// We've successfully identified, the bot is ready.
    Ready(ReadyEvent),

    /// A message was created in a channel we can see.
    MessageCreate(Message),

    /// An interaction was created (slash command, component, modal).
    InteractionCreate(Interaction),

    /// Initial op 10 payload carrying the heartbeat interval in ms.
    Hello(u64),

    /// Heartbeat ACK from the gateway (op 11).
    HeartbeatAck,

    /// The gateway is asking us to heartbeat immediately (op 1).
    HeartbeatRequest,

    /// Gateway told us to reconnect (op 7).
    Reconnect,

    /// Session has been invalidated (op 9); `true` if resumable.
    InvalidSession(bool),

    /// An event we received but don't have a typed variant for.
    Unknown {
        event_name: Option<String>,
        op: u8,
        data: Option<serde_json::Value>,
    },
}

impl GatewayEvent {
    /// Convert a raw [`GatewayPayload`] into a typed event.
    ///
    /// This never fails; unrecognised or malformed events become
    /// [`GatewayEvent::Unknown`].
    pub fn from_payload(payload: GatewayPayload) -> Self {
        match payload.op {
            0 => Self::parse_dispatch(payload.t, payload.d),
            1 => GatewayEvent::HeartbeatRequest,
            7 => GatewayEvent::Reconnect,
            9 => {
                let resumable = payload
                    .d
                    .as_ref()
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                GatewayEvent::InvalidSession(resumable)
            }
            10 => match payload
                .d
                .as_ref()
                .and_then(|d| d.get("heartbeat_interval"))
                .and_then(|v| v.as_u64())
            {
                Some(interval) => GatewayEvent::Hello(interval),
                None => GatewayEvent::Unknown {
                    event_name: None,
                    op: 10,
                    data: payload.d,
                },
            },
            11 => GatewayEvent::HeartbeatAck,
            _ => GatewayEvent::Unknown {
                event_name: payload.t,
                op: payload.op,
                data: payload.d,
            },
        }
    }

    /// Parse an op-0 DISPATCH event by its `t` name.
    fn parse_dispatch(event_name: Option<String>, data: Option<serde_json::Value>) -> Self {
        let (Some(name), Some(d)) = (event_name.as_deref(), data.as_ref()) else {
            return GatewayEvent::Unknown {
                event_name,
                op: 0,
                data,
            };
        };

        let parsed = match name {
            "READY" => typed(name, d, GatewayEvent::Ready),
            "MESSAGE_CREATE" => typed(name, d, GatewayEvent::MessageCreate),
            "INTERACTION_CREATE" => typed(name, d, GatewayEvent::InteractionCreate),
            _ => None,
        };

        parsed.unwrap_or(GatewayEvent::Unknown {
            event_name,
            op: 0,
            data,
        })
    }

    /// The gateway event name the bot reports in failure logs.
    pub fn name(&self) -> &str {
        match self {
            GatewayEvent::Ready(_) => "READY",
            GatewayEvent::MessageCreate(_) => "MESSAGE_CREATE",
            GatewayEvent::InteractionCreate(_) => "INTERACTION_CREATE",
            GatewayEvent::Hello(_) => "HELLO",
            GatewayEvent::HeartbeatAck => "HEARTBEAT_ACK",
            GatewayEvent::HeartbeatRequest => "HEARTBEAT",
            GatewayEvent::Reconnect => "RECONNECT",
            GatewayEvent::InvalidSession(_) => "INVALID_SESSION",
            GatewayEvent::Unknown {
                event_name: Some(name),
                ..
            } => name,
            GatewayEvent::Unknown { .. } => "UNKNOWN",
        }
    }
}

fn typed<T: DeserializeOwned>(
    name: &str,
    data: &serde_json::Value,
    wrap: fn(T) -> GatewayEvent,
) -> Option<GatewayEvent> {
    match T::deserialize(data) {
        Ok(value) => Some(wrap(value)),
        Err(e) => {
            warn!(event = name, error = %e, "failed to parse dispatch payload");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(op: u8, t: Option<&str>, d: Option<serde_json::Value>) -> GatewayPayload {
        GatewayPayload {
            op,
            d,
            s: None,
            t: t.map(str::to_string),
        }
    }

    #[test]
    fn hello_carries_heartbeat_interval() {
        let event = GatewayEvent::from_payload(payload(
            10,
            None,
            Some(json!({"heartbeat_interval": 41250})),
        ));
        assert!(matches!(event, GatewayEvent::Hello(41250)));
    }

    #[test]
    fn invalid_session_reads_resumable_flag() {
        let event = GatewayEvent::from_payload(payload(9, None, Some(json!(true))));
        assert!(matches!(event, GatewayEvent::InvalidSession(true)));

        let event = GatewayEvent::from_payload(payload(9, None, None));
        assert!(matches!(event, GatewayEvent::InvalidSession(false)));
    }

    #[test]
    fn message_create_is_typed() {
        let event = GatewayEvent::from_payload(payload(
            0,
            Some("MESSAGE_CREATE"),
            Some(json!({
                "id": "10",
                "channel_id": "20",
                "author": {"id": "30", "username": "carol", "discriminator": "0", "avatar": null},
                "content": "!help",
                "timestamp": "2024-01-01T00:00:00+00:00",
            })),
        ));
        match event {
            GatewayEvent::MessageCreate(msg) => assert_eq!(msg.content, "!help"),
            other => panic!("expected MessageCreate, got {:?}", other),
        }
    }

    #[test]
    fn malformed_dispatch_becomes_unknown() {
        let event = GatewayEvent::from_payload(payload(
            0,
            Some("MESSAGE_CREATE"),
            Some(json!({"id": "10"})),
        ));
        assert!(matches!(event, GatewayEvent::Unknown { op: 0, .. }));
        assert_eq!(event.name(), "MESSAGE_CREATE");
    }

    #[test]
    fn unhandled_dispatch_keeps_its_name() {
        let event = GatewayEvent::from_payload(payload(
            0,
            Some("TYPING_START"),
            Some(json!({})),
        ));
        assert_eq!(event.name(), "TYPING_START");
    }
}
