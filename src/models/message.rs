//! Message-related models
//!
//! A conversation message exists in three shapes: the REST record persisted
//! by the backend, the relay payload broadcast through the hub, and the
//! canonical [`ChatMessage`] both are normalized into for rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File attachment, shipped base64-encoded inside the message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub data_base64: String,
}

/// Delivery state of a locally-known message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Optimistic local entry, persistence not yet confirmed.
    Pending,
    /// Confirmed by the backend (or received from another client).
    Sent,
    /// The persistence call failed. The entry stays visible so the user can
    /// resend; it is never silently dropped.
    Failed,
}

/// Canonical message shape used by the conversation thread.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// Backend-assigned id, present once persisted.
    pub server_id: Option<i64>,
    /// Client-generated id correlating an optimistic entry with its
    /// REST confirmation and relay echo.
    pub correlation_id: Option<String>,
    pub ticket_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub body: Option<String>,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    pub delivery: DeliveryState,
}

/// Payload broadcast to a room through the real-time hub.
///
/// Live-delivery only; durability is the REST create call. `server_id` is
/// filled when the sender's REST call happened to resolve before the
/// broadcast, which the receiving reconciler uses for dedupe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    pub correlation_id: Option<String>,
    pub server_id: Option<i64>,
    pub ticket_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub body: Option<String>,
    pub attachment: Option<Attachment>,
    /// Client timestamp at send time.
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Canonical form of a relay-delivered payload.
    pub fn from_relay(msg: RelayMessage) -> Self {
        Self {
            server_id: msg.server_id,
            correlation_id: normalize_field(msg.correlation_id),
            ticket_id: msg.ticket_id,
            sender_id: msg.sender_id,
            sender_name: msg.sender_name,
            body: normalize_field(msg.body),
            attachment: msg.attachment,
            created_at: msg.sent_at,
            read: false,
            delivery: DeliveryState::Sent,
        }
    }
}

/// Normalize a backend string field.
///
/// The backend serializes absent values inconsistently: some code paths emit
/// JSON null, others the string literals `"null"` or `"undefined"`, others an
/// empty string. All of those mean "no value".
pub fn normalize_field(value: Option<String>) -> Option<String> {
    match value {
        Some(s) if s.is_empty() || s == "null" || s == "undefined" => None,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_field_literals() {
        assert_eq!(normalize_field(Some("null".into())), None);
        assert_eq!(normalize_field(Some("undefined".into())), None);
        assert_eq!(normalize_field(Some(String::new())), None);
        assert_eq!(normalize_field(None), None);
        assert_eq!(normalize_field(Some("hello".into())), Some("hello".into()));
        // Only the exact literals are scrubbed, not words containing them.
        assert_eq!(
            normalize_field(Some("null hypothesis".into())),
            Some("null hypothesis".into())
        );
    }

    #[test]
    fn test_from_relay_normalizes() {
        let msg = RelayMessage {
            correlation_id: Some("undefined".into()),
            server_id: None,
            ticket_id: 5,
            sender_id: 42,
            sender_name: "Dana".into(),
            body: Some("null".into()),
            attachment: None,
            sent_at: Utc::now(),
        };
        let canonical = ChatMessage::from_relay(msg);
        assert_eq!(canonical.correlation_id, None);
        assert_eq!(canonical.body, None);
        assert_eq!(canonical.delivery, DeliveryState::Sent);
    }
}
