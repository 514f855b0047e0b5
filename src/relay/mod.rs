//! Room-scoped message relay and typing signals
//!
//! A room is the broadcast scope of one ticket's conversation
//! (`request_<id>`). This client keeps at most one active conversation room:
//! opening a ticket joins its room and leaves the previous one. Broadcasts
//! here are live-delivery only — durability is the REST create call the
//! sender issues independently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use crate::hub::{methods, EventKind, HubClient, HubError, HubEvent};
use crate::models::RelayMessage;

/// Typing indicators expire after this long without a re-signal.
const TYPING_EXPIRY: Duration = Duration::from_secs(1);

/// Sweep cadence for the outbound typing auto-stop.
const TYPING_SWEEP: Duration = Duration::from_millis(250);

/// Room name for a ticket's conversation.
pub fn room_for_ticket(ticket_id: i64) -> String {
    format!("request_{}", ticket_id)
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Join failed, usually because the connection is not ready. The relay
    /// retries on the next `Connected` event while the room stays active.
    #[error("failed to join room {room}: {source}")]
    RoomJoin { room: String, source: HubError },
    #[error("not connected to the hub")]
    NotConnected,
}

struct OutboundTyping {
    room: String,
    last_signal: Instant,
}

#[derive(Default)]
struct RelayState {
    /// Room the client wants to be in. Recorded before the join attempt so a
    /// reconnect can retry it.
    active_room: Mutex<Option<String>>,
    /// Whether the active room's join was acknowledged on this session.
    joined: AtomicBool,
    /// Inbound typing indicators: user id -> last signal.
    typists: Mutex<HashMap<i64, Instant>>,
    /// Outbound typing state, cleared by the auto-stop sweep.
    outbound_typing: Mutex<Option<OutboundTyping>>,
}

#[derive(Clone)]
pub struct MessageRelay {
    hub: HubClient,
    state: Arc<RelayState>,
}

impl MessageRelay {
    /// Build the relay and register its transport subscriptions: rejoin the
    /// active room on reconnect, reset membership on disconnect, track
    /// inbound typing signals.
    pub fn new(hub: HubClient) -> Self {
        let relay = Self {
            hub,
            state: Arc::new(RelayState::default()),
        };

        {
            let relay2 = relay.clone();
            relay.hub.subscribe(EventKind::Connected, move |_| {
                let relay = relay2.clone();
                tokio::spawn(async move { relay.rejoin_active_room().await });
            });
        }
        {
            let state = Arc::clone(&relay.state);
            relay.hub.subscribe(EventKind::Disconnected, move |_| {
                state.joined.store(false, Ordering::SeqCst);
                state.typists.lock().unwrap().clear();
            });
        }
        {
            let state = Arc::clone(&relay.state);
            relay.hub.subscribe(EventKind::UserTyping, move |event| {
                if let HubEvent::UserTyping(id) = event {
                    state.typists.lock().unwrap().insert(*id, Instant::now());
                }
            });
        }
        {
            let state = Arc::clone(&relay.state);
            relay.hub.subscribe(EventKind::UserStoppedTyping, move |event| {
                if let HubEvent::UserStoppedTyping(id) = event {
                    state.typists.lock().unwrap().remove(id);
                }
            });
        }

        relay
    }

    /// Room this client currently wants to be in.
    pub fn active_room(&self) -> Option<String> {
        self.state.active_room.lock().unwrap().clone()
    }

    /// Join a room. Idempotent for the already-joined room; joining a
    /// different room leaves the previous one first (single conversation
    /// focus).
    pub async fn join_room(&self, room: &str) -> Result<(), RelayError> {
        let previous = {
            let mut active = self.state.active_room.lock().unwrap();
            if active.as_deref() == Some(room) && self.state.joined.load(Ordering::SeqCst) {
                return Ok(());
            }
            let previous = match active.as_deref() {
                Some(current) if current != room => active.take(),
                _ => None,
            };
            *active = Some(room.to_string());
            previous
        };

        if let Some(previous) = previous {
            self.state.joined.store(false, Ordering::SeqCst);
            self.leave_on_wire(&previous).await;
        }

        match self.hub.invoke(methods::JOIN_ROOM, vec![json!(room)]).await {
            Ok(_) => {
                self.state.joined.store(true, Ordering::SeqCst);
                tracing::info!("Joined room {}", room);
                Ok(())
            }
            Err(source) => {
                self.state.joined.store(false, Ordering::SeqCst);
                Err(RelayError::RoomJoin {
                    room: room.to_string(),
                    source,
                })
            }
        }
    }

    /// Leave a room. Best-effort: leaving a room the server already dropped
    /// is not an error worth surfacing.
    pub async fn leave_room(&self, room: &str) {
        {
            let mut active = self.state.active_room.lock().unwrap();
            if active.as_deref() == Some(room) {
                *active = None;
                self.state.joined.store(false, Ordering::SeqCst);
            }
        }
        self.leave_on_wire(room).await;
    }

    async fn leave_on_wire(&self, room: &str) {
        if let Err(e) = self.hub.invoke(methods::LEAVE_ROOM, vec![json!(room)]).await {
            tracing::debug!("Leave room {} skipped: {}", room, e);
        }
    }

    async fn rejoin_active_room(&self) {
        let Some(room) = self.active_room() else {
            return;
        };
        match self.hub.invoke(methods::JOIN_ROOM, vec![json!(&room)]).await {
            Ok(_) => {
                self.state.joined.store(true, Ordering::SeqCst);
                tracing::info!("Rejoined room {} after reconnect", room);
            }
            Err(e) => tracing::warn!("Room rejoin failed for {}: {}", room, e),
        }
    }

    /// Broadcast a message payload to everyone currently viewing the room.
    /// Fire-and-forget: this path carries no durability guarantee.
    pub fn send_to_room(&self, room: &str, message: &RelayMessage) -> Result<(), RelayError> {
        let payload = serde_json::to_value(message).expect("relay message serializes");
        self.hub
            .send(methods::SEND_MESSAGE_TO_GROUP, vec![json!(room), payload])
            .map_err(|_| RelayError::NotConnected)
    }

    /// Signal that the local user is typing. Callers invoke this per
    /// keystroke (debounced); the relay emits one `StartTyping` and
    /// auto-stops after one second of inactivity.
    #[allow(dead_code)]
    pub fn signal_typing(&self, room: &str) -> Result<(), RelayError> {
        let start = {
            let mut outbound = self.state.outbound_typing.lock().unwrap();
            match outbound.as_mut() {
                Some(t) if t.room == room => {
                    t.last_signal = Instant::now();
                    false
                }
                _ => {
                    *outbound = Some(OutboundTyping {
                        room: room.to_string(),
                        last_signal: Instant::now(),
                    });
                    true
                }
            }
        };

        if start {
            self.hub
                .send(methods::START_TYPING, vec![json!(room)])
                .map_err(|_| RelayError::NotConnected)?;
            let relay = self.clone();
            tokio::spawn(async move { relay.expire_outbound_typing().await });
        }
        Ok(())
    }

    /// Explicitly stop the outbound typing signal.
    pub fn stop_typing(&self, room: &str) {
        self.state.outbound_typing.lock().unwrap().take();
        if let Err(e) = self.hub.send(methods::STOP_TYPING, vec![json!(room)]) {
            tracing::debug!("StopTyping skipped: {}", e);
        }
    }

    async fn expire_outbound_typing(&self) {
        loop {
            tokio::time::sleep(TYPING_SWEEP).await;
            let expired_room = {
                let mut outbound = self.state.outbound_typing.lock().unwrap();
                match outbound.as_ref() {
                    Some(t) if t.last_signal.elapsed() >= TYPING_EXPIRY => {
                        Some(outbound.take().expect("checked above").room)
                    }
                    Some(_) => None,
                    // Cleared by an explicit stop; nothing left to do.
                    None => return,
                }
            };
            if let Some(room) = expired_room {
                if let Err(e) = self.hub.send(methods::STOP_TYPING, vec![json!(&room)]) {
                    tracing::debug!("Typing auto-stop skipped: {}", e);
                }
                return;
            }
        }
    }

    /// User ids currently typing in the active room, expired entries pruned.
    pub fn typing_users(&self) -> Vec<i64> {
        let mut typists = self.state.typists.lock().unwrap();
        typists.retain(|_, last| last.elapsed() < TYPING_EXPIRY);
        let mut ids: Vec<i64> = typists.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::ConnectionState;
    use tokio::sync::mpsc;

    fn connected_hub() -> (HubClient, mpsc::UnboundedReceiver<String>) {
        let hub = HubClient::new();
        hub.set_state(ConnectionState::Connected);
        let (tx, rx) = mpsc::unbounded_channel();
        hub.attach_outbound(tx);
        (hub, rx)
    }

    #[test]
    fn test_room_for_ticket() {
        assert_eq!(room_for_ticket(17), "request_17");
    }

    #[tokio::test]
    async fn test_join_room_is_idempotent() {
        let (hub, mut rx) = connected_hub();
        let relay = MessageRelay::new(hub.clone());

        let join = relay.join_room("request_5");
        tokio::pin!(join);
        let frame = tokio::select! {
            frame = rx.recv() => frame.expect("join frame"),
            _ = &mut join => panic!("join resolved before completion"),
        };
        assert!(frame.contains("JoinRoom"));
        hub.resolve_completion("1", None, None);
        join.await.unwrap();

        // Second join of the same room: no wire traffic.
        relay.join_room("request_5").await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_while_disconnected_records_intent() {
        let hub = HubClient::new();
        let relay = MessageRelay::new(hub);

        let err = relay.join_room("request_9").await.unwrap_err();
        assert!(matches!(err, RelayError::RoomJoin { .. }));
        // Intent survives the failure so the reconnect handler can retry.
        assert_eq!(relay.active_room().as_deref(), Some("request_9"));
    }

    #[tokio::test]
    async fn test_leave_room_clears_active() {
        let hub = HubClient::new();
        let relay = MessageRelay::new(hub);

        let _ = relay.join_room("request_3").await;
        relay.leave_room("request_3").await;
        assert_eq!(relay.active_room(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_typing_expires() {
        let hub = HubClient::new();
        let relay = MessageRelay::new(hub.clone());

        hub.dispatch(&HubEvent::UserTyping(7));
        assert_eq!(relay.typing_users(), vec![7]);

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(relay.typing_users().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_stop_typing_removes() {
        let hub = HubClient::new();
        let relay = MessageRelay::new(hub.clone());

        hub.dispatch(&HubEvent::UserTyping(7));
        hub.dispatch(&HubEvent::UserStoppedTyping(7));
        assert!(relay.typing_users().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_typing_auto_stops() {
        let (hub, mut rx) = connected_hub();
        let relay = MessageRelay::new(hub);

        relay.signal_typing("request_5").unwrap();
        let frame = rx.recv().await.expect("start frame");
        assert!(frame.contains("StartTyping"));

        // Re-signal within the window: no extra StartTyping.
        relay.signal_typing("request_5").unwrap();
        assert!(rx.try_recv().is_err());

        // After 1s of inactivity the sweep emits StopTyping.
        let frame = rx.recv().await.expect("stop frame");
        assert!(frame.contains("StopTyping"));
    }

    #[tokio::test]
    async fn test_send_to_room_requires_connection() {
        let hub = HubClient::new();
        let relay = MessageRelay::new(hub);
        let msg = RelayMessage {
            correlation_id: Some("c-1".into()),
            server_id: None,
            ticket_id: 5,
            sender_id: 1,
            sender_name: "Dana".into(),
            body: Some("hi".into()),
            attachment: None,
            sent_at: chrono::Utc::now(),
        };
        assert!(matches!(
            relay.send_to_room("request_5", &msg),
            Err(RelayError::NotConnected)
        ));
    }
}
