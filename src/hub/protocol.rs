//! Wire protocol for the real-time hub
//!
//! The backend exposes a .NET-style JSON hub: every frame is a JSON record
//! terminated by the `0x1e` record separator, starting with a
//! `{"protocol":"json","version":1}` handshake. After the handshake, records
//! carry a numeric `type`:
//!
//! - `1` — invocation (server push or client call)
//! - `3` — completion of a client invocation (by `invocationId`)
//! - `6` — keepalive ping (both directions)
//! - `7` — close, optionally with an error
//!
//! A single websocket frame may carry several records.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::RelayMessage;

/// Record separator terminating every hub protocol record.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Hub method names the client invokes.
pub mod methods {
    pub const JOIN_ROOM: &str = "JoinRoom";
    pub const LEAVE_ROOM: &str = "LeaveRoom";
    pub const SEND_MESSAGE_TO_GROUP: &str = "SendMessageToGroup";
    pub const START_TYPING: &str = "StartTyping";
    pub const STOP_TYPING: &str = "StopTyping";
    pub const GET_ONLINE_USERS: &str = "GetOnlineUsers";
    pub const UPDATE_LAST_SEEN: &str = "UpdateLastSeen";
}

/// Typed events delivered to subscribers.
///
/// `Connected` and `Disconnected` are synthesized by the transport on
/// lifecycle changes; the rest are parsed from server invocations.
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// Connection (re)established and handshaken.
    Connected,
    /// Connection lost. `terminal` is set once the retry schedule is
    /// exhausted or the client disconnected deliberately.
    Disconnected { terminal: bool },
    UserOnline(i64),
    UserOffline(i64),
    /// Authoritative snapshot: replaces, never merges.
    OnlineUsers(Vec<i64>),
    ReceiveMessage(RelayMessage),
    UserTyping(i64),
    UserStoppedTyping(i64),
}

/// Event discriminant used for subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    UserOnline,
    UserOffline,
    OnlineUsers,
    ReceiveMessage,
    UserTyping,
    UserStoppedTyping,
}

impl HubEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HubEvent::Connected => EventKind::Connected,
            HubEvent::Disconnected { .. } => EventKind::Disconnected,
            HubEvent::UserOnline(_) => EventKind::UserOnline,
            HubEvent::UserOffline(_) => EventKind::UserOffline,
            HubEvent::OnlineUsers(_) => EventKind::OnlineUsers,
            HubEvent::ReceiveMessage(_) => EventKind::ReceiveMessage,
            HubEvent::UserTyping(_) => EventKind::UserTyping,
            HubEvent::UserStoppedTyping(_) => EventKind::UserStoppedTyping,
        }
    }

    /// Parse a server invocation into a typed event.
    ///
    /// Returns `None` for targets this client does not know; the caller logs
    /// and drops them.
    pub fn from_invocation(target: &str, mut arguments: Vec<Value>) -> Option<HubEvent> {
        fn user_id(arguments: &[Value]) -> Option<i64> {
            arguments.first().and_then(Value::as_i64)
        }

        match target {
            "UserOnline" => user_id(&arguments).map(HubEvent::UserOnline),
            "UserOffline" => user_id(&arguments).map(HubEvent::UserOffline),
            "OnlineUsers" => {
                let ids = arguments
                    .first()?
                    .as_array()?
                    .iter()
                    .filter_map(Value::as_i64)
                    .collect();
                Some(HubEvent::OnlineUsers(ids))
            }
            "ReceiveMessage" => {
                if arguments.is_empty() {
                    return None;
                }
                let payload = arguments.swap_remove(0);
                match serde_json::from_value::<RelayMessage>(payload) {
                    Ok(msg) => Some(HubEvent::ReceiveMessage(msg)),
                    Err(e) => {
                        tracing::warn!("Malformed ReceiveMessage payload: {:#}", e);
                        None
                    }
                }
            }
            "UserTyping" => user_id(&arguments).map(HubEvent::UserTyping),
            "UserStoppedTyping" => user_id(&arguments).map(HubEvent::UserStoppedTyping),
            _ => None,
        }
    }
}

/// A parsed post-handshake record from the server.
#[derive(Debug)]
pub enum ServerMessage {
    Invocation {
        target: String,
        arguments: Vec<Value>,
    },
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
    },
    /// Record types this client does not consume (streams, cancellations).
    Other,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: u8,
    target: Option<String>,
    arguments: Option<Vec<Value>>,
    #[serde(rename = "invocationId")]
    invocation_id: Option<String>,
    result: Option<Value>,
    error: Option<String>,
}

/// The handshake record sent immediately after the websocket opens.
pub fn handshake_request() -> String {
    format!("{{\"protocol\":\"json\",\"version\":1}}{}", RECORD_SEPARATOR)
}

/// Parse the server's handshake response record. An empty object means
/// success; anything with an `error` field is a rejection.
pub fn parse_handshake_response(record: &str) -> Result<()> {
    #[derive(Deserialize)]
    struct HandshakeResponse {
        error: Option<String>,
    }

    let resp: HandshakeResponse =
        serde_json::from_str(record).context("Malformed handshake response")?;
    match resp.error {
        Some(error) => anyhow::bail!("Hub rejected handshake: {}", error),
        None => Ok(()),
    }
}

/// Split a websocket text frame into individual protocol records.
pub fn split_records(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split(RECORD_SEPARATOR)
        .filter(|record| !record.is_empty())
}

/// Parse one post-handshake record.
pub fn parse_message(record: &str) -> Result<ServerMessage> {
    let wire: WireMessage =
        serde_json::from_str(record).with_context(|| format!("Malformed hub record: {}", record))?;

    Ok(match wire.kind {
        1 => ServerMessage::Invocation {
            target: wire.target.unwrap_or_default(),
            arguments: wire.arguments.unwrap_or_default(),
        },
        3 => ServerMessage::Completion {
            invocation_id: wire.invocation_id.unwrap_or_default(),
            result: wire.result,
            error: wire.error,
        },
        6 => ServerMessage::Ping,
        7 => ServerMessage::Close { error: wire.error },
        _ => ServerMessage::Other,
    })
}

/// Encode a client invocation. With an `invocation_id`, the server answers
/// with a completion record; without one the call is fire-and-forget.
pub fn encode_invocation(
    invocation_id: Option<&str>,
    target: &str,
    arguments: Vec<Value>,
) -> String {
    let mut record = json!({
        "type": 1,
        "target": target,
        "arguments": arguments,
    });
    if let Some(id) = invocation_id {
        record["invocationId"] = json!(id);
    }
    format!("{}{}", record, RECORD_SEPARATOR)
}

/// Encode a keepalive ping record.
pub fn encode_ping() -> String {
    format!("{{\"type\":6}}{}", RECORD_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_roundtrip() {
        let req = handshake_request();
        assert!(req.ends_with(RECORD_SEPARATOR));
        assert!(parse_handshake_response("{}").is_ok());
        assert!(parse_handshake_response(r#"{"error":"unsupported protocol"}"#).is_err());
    }

    #[test]
    fn test_split_records_multiple_per_frame() {
        let frame = format!("{{\"type\":6}}{}{{\"type\":6}}{}", RECORD_SEPARATOR, RECORD_SEPARATOR);
        assert_eq!(split_records(&frame).count(), 2);
        assert_eq!(split_records("").count(), 0);
    }

    #[test]
    fn test_parse_invocation_event() {
        let record = r#"{"type":1,"target":"UserOnline","arguments":[42]}"#;
        let msg = parse_message(record).unwrap();
        let ServerMessage::Invocation { target, arguments } = msg else {
            panic!("expected invocation");
        };
        let event = HubEvent::from_invocation(&target, arguments).unwrap();
        assert!(matches!(event, HubEvent::UserOnline(42)));
    }

    #[test]
    fn test_parse_online_users_snapshot() {
        let record = r#"{"type":1,"target":"OnlineUsers","arguments":[[7,9]]}"#;
        let ServerMessage::Invocation { target, arguments } = parse_message(record).unwrap() else {
            panic!("expected invocation");
        };
        let event = HubEvent::from_invocation(&target, arguments).unwrap();
        let HubEvent::OnlineUsers(ids) = event else {
            panic!("expected snapshot");
        };
        assert_eq!(ids, vec![7, 9]);
    }

    #[test]
    fn test_parse_receive_message() {
        let record = r#"{"type":1,"target":"ReceiveMessage","arguments":[{
            "correlationId":"c-1","serverId":null,"ticketId":5,"senderId":42,
            "senderName":"Dana","body":"hi","attachment":null,
            "sentAt":"2026-08-07T10:00:00Z"}]}"#;
        let ServerMessage::Invocation { target, arguments } = parse_message(record).unwrap() else {
            panic!("expected invocation");
        };
        let event = HubEvent::from_invocation(&target, arguments).unwrap();
        let HubEvent::ReceiveMessage(msg) = event else {
            panic!("expected message");
        };
        assert_eq!(msg.ticket_id, 5);
        assert_eq!(msg.correlation_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn test_unknown_target_is_dropped() {
        assert!(HubEvent::from_invocation("RefreshEverything", vec![]).is_none());
    }

    #[test]
    fn test_parse_completion_and_close() {
        let record = r#"{"type":3,"invocationId":"12","result":[1,2]}"#;
        let ServerMessage::Completion {
            invocation_id,
            result,
            error,
        } = parse_message(record).unwrap()
        else {
            panic!("expected completion");
        };
        assert_eq!(invocation_id, "12");
        assert!(result.is_some());
        assert!(error.is_none());

        let record = r#"{"type":7,"error":"shutting down"}"#;
        assert!(matches!(
            parse_message(record).unwrap(),
            ServerMessage::Close { error: Some(_) }
        ));
    }

    #[test]
    fn test_encode_invocation_roundtrip() {
        let encoded = encode_invocation(Some("3"), methods::JOIN_ROOM, vec![json!("request_5")]);
        let record = encoded.trim_end_matches(RECORD_SEPARATOR);
        let ServerMessage::Invocation { target, arguments } = parse_message(record).unwrap() else {
            panic!("expected invocation");
        };
        assert_eq!(target, methods::JOIN_ROOM);
        assert_eq!(arguments, vec![json!("request_5")]);
    }
}
