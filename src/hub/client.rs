//! Hub client handle: typed event subscriptions, invocations, connection
//! state.
//!
//! One `HubClient` exists per process. It is constructed once at startup and
//! passed by reference to whatever needs it; the connection supervisor task
//! (see `hub::run_supervisor`) feeds it from the wire.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;

use super::protocol::{self, EventKind, HubEvent};

/// How long an invocation waits for its completion record.
const INVOCATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of the bearer token used to authenticate the transport.
///
/// Consulted on every (re)connect attempt so refreshed logins are picked up
/// without restarting the client.
pub type TokenSource = Arc<dyn Fn() -> anyhow::Result<String> + Send + Sync>;

/// Transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

/// Transport-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Caller attempted an operation while the transport was down. Never
    /// queued silently; the caller retries after the next `Connected` event.
    #[error("not connected to the hub")]
    NotConnected,
    #[error("hub connection failed: {0}")]
    Connection(String),
    #[error("hub handshake rejected: {0}")]
    Handshake(String),
    #[error("connection closed before the invocation completed")]
    ConnectionClosed,
    #[error("hub invocation {target} failed: {reason}")]
    InvocationFailed { target: String, reason: String },
}

/// Identifies a registered event handler for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&HubEvent) + Send + Sync>;

struct HandlerEntry {
    id: u64,
    kind: EventKind,
    handler: Handler,
}

type CompletionSender = oneshot::Sender<Result<Option<Value>, HubError>>;

pub(super) struct Inner {
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    handlers: Mutex<Vec<HandlerEntry>>,
    next_handler_id: AtomicU64,
    next_invocation_id: AtomicU64,
    pending: Mutex<HashMap<String, CompletionSender>>,
    /// Writer-half of the live socket. `Some` only while a session is up.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    shutdown_tx: watch::Sender<bool>,
    supervisor_running: AtomicBool,
}

/// Cheap-to-clone handle to the hub transport.
#[derive(Clone)]
pub struct HubClient {
    pub(super) inner: Arc<Inner>,
}

impl HubClient {
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state_tx,
                state_rx,
                handlers: Mutex::new(Vec::new()),
                next_handler_id: AtomicU64::new(1),
                next_invocation_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                shutdown_tx,
                supervisor_running: AtomicBool::new(false),
            }),
        }
    }

    /// Start the connection supervisor. Idempotent: a no-op while a
    /// supervisor is already running.
    pub fn connect(&self, endpoint: String, tokens: TokenSource) {
        if self
            .inner
            .supervisor_running
            .swap(true, Ordering::SeqCst)
        {
            tracing::debug!("Hub already connecting/connected, ignoring connect()");
            return;
        }
        let _ = self.inner.shutdown_tx.send(false);
        tokio::spawn(super::run_supervisor(self.clone(), endpoint, tokens));
    }

    /// Tear the connection down deterministically. Pending invocations fail
    /// with `ConnectionClosed`; room memberships are gone with the socket.
    pub fn disconnect(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }

    /// Current transport state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// Watch channel for transport state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Register a handler for one event kind. Handlers run in registration
    /// order; a panicking handler is isolated and logged, never breaking
    /// delivery to the rest.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&HubEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .lock()
            .unwrap()
            .push(HandlerEntry {
                id,
                kind,
                handler: Arc::new(handler),
            });
        HandlerId(id)
    }

    /// Remove a previously registered handler.
    #[allow(dead_code)]
    pub fn unsubscribe(&self, id: HandlerId) {
        self.inner
            .handlers
            .lock()
            .unwrap()
            .retain(|entry| entry.id != id.0);
    }

    /// Call a hub method and await its completion (30s timeout).
    pub async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<Option<Value>, HubError> {
        if self.state() != ConnectionState::Connected {
            return Err(HubError::NotConnected);
        }

        let id = self
            .inner
            .next_invocation_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(id.clone(), tx);

        let frame = protocol::encode_invocation(Some(&id), target, arguments);
        if let Err(e) = self.send_frame(&frame) {
            self.inner.pending.lock().unwrap().remove(&id);
            return Err(e);
        }

        match timeout(INVOCATION_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped: the session died while we were waiting.
            Ok(Err(_)) => Err(HubError::ConnectionClosed),
            Err(_) => {
                self.inner.pending.lock().unwrap().remove(&id);
                Err(HubError::InvocationFailed {
                    target: target.to_string(),
                    reason: "timed out".to_string(),
                })
            }
        }
    }

    /// Fire-and-forget hub call (no completion record requested).
    pub fn send(&self, target: &str, arguments: Vec<Value>) -> Result<(), HubError> {
        if self.state() != ConnectionState::Connected {
            return Err(HubError::NotConnected);
        }
        let frame = protocol::encode_invocation(None, target, arguments);
        self.send_frame(&frame)
    }

    fn send_frame(&self, frame: &str) -> Result<(), HubError> {
        let outbound = self.inner.outbound.lock().unwrap();
        match outbound.as_ref() {
            Some(tx) => tx
                .send(frame.to_string())
                .map_err(|_| HubError::ConnectionClosed),
            None => Err(HubError::NotConnected),
        }
    }

    // -- internals used by the supervisor --

    pub(crate) fn set_state(&self, state: ConnectionState) {
        tracing::debug!("Hub state -> {}", state.as_str());
        let _ = self.inner.state_tx.send(state);
    }

    pub(super) fn shutdown_requested(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    pub(crate) fn attach_outbound(&self, tx: mpsc::UnboundedSender<String>) {
        *self.inner.outbound.lock().unwrap() = Some(tx);
    }

    pub(super) fn detach_outbound(&self) {
        *self.inner.outbound.lock().unwrap() = None;
    }

    pub(super) fn supervisor_stopped(&self) {
        self.inner.supervisor_running.store(false, Ordering::SeqCst);
    }

    /// Resolve a completion record against its pending invocation.
    pub(crate) fn resolve_completion(
        &self,
        invocation_id: &str,
        result: Option<Value>,
        error: Option<String>,
    ) {
        let sender = self.inner.pending.lock().unwrap().remove(invocation_id);
        let Some(sender) = sender else {
            tracing::debug!("Completion for unknown invocation {}", invocation_id);
            return;
        };
        let outcome = match error {
            Some(reason) => Err(HubError::InvocationFailed {
                target: format!("#{}", invocation_id),
                reason,
            }),
            None => Ok(result),
        };
        let _ = sender.send(outcome);
    }

    /// Fail every pending invocation (session teardown).
    pub(super) fn fail_pending(&self) {
        let pending: Vec<CompletionSender> = {
            let mut map = self.inner.pending.lock().unwrap();
            map.drain().map(|(_, tx)| tx).collect()
        };
        for tx in pending {
            let _ = tx.send(Err(HubError::ConnectionClosed));
        }
    }

    /// Deliver an event to every matching handler, in registration order.
    pub(crate) fn dispatch(&self, event: &HubEvent) {
        let handlers: Vec<Handler> = {
            let entries = self.inner.handlers.lock().unwrap();
            entries
                .iter()
                .filter(|entry| entry.kind == event.kind())
                .map(|entry| Arc::clone(&entry.handler))
                .collect()
        };

        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                let what = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".to_string());
                tracing::error!("Event handler panicked ({:?}): {}", event.kind(), what);
            }
        }
    }
}

impl Default for HubClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handlers_run_in_registration_order() {
        let hub = HubClient::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            hub.subscribe(EventKind::UserOnline, move |_| {
                seen.lock().unwrap().push(tag);
            });
        }

        hub.dispatch(&HubEvent::UserOnline(1));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let hub = HubClient::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        hub.subscribe(EventKind::UserOnline, |_| panic!("boom"));
        {
            let seen = Arc::clone(&seen);
            hub.subscribe(EventKind::UserOnline, move |_| {
                seen.lock().unwrap().push("survived");
            });
        }

        hub.dispatch(&HubEvent::UserOnline(1));
        assert_eq!(*seen.lock().unwrap(), vec!["survived"]);
    }

    #[test]
    fn test_unsubscribe_removes_handler() {
        let hub = HubClient::new();
        let seen = Arc::new(Mutex::new(0usize));

        let id = {
            let seen = Arc::clone(&seen);
            hub.subscribe(EventKind::UserOffline, move |_| {
                *seen.lock().unwrap() += 1;
            })
        };

        hub.dispatch(&HubEvent::UserOffline(1));
        hub.unsubscribe(id);
        hub.dispatch(&HubEvent::UserOffline(1));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_handlers_filter_by_kind() {
        let hub = HubClient::new();
        let seen = Arc::new(Mutex::new(0usize));

        {
            let seen = Arc::clone(&seen);
            hub.subscribe(EventKind::UserTyping, move |_| {
                *seen.lock().unwrap() += 1;
            });
        }

        hub.dispatch(&HubEvent::UserOnline(1));
        hub.dispatch(&HubEvent::UserTyping(1));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invoke_while_disconnected_fails_fast() {
        let hub = HubClient::new();
        let err = hub
            .invoke(protocol::methods::GET_ONLINE_USERS, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::NotConnected));

        let err = hub
            .send(protocol::methods::START_TYPING, vec![])
            .unwrap_err();
        assert!(matches!(err, HubError::NotConnected));
    }

    #[tokio::test]
    async fn test_completion_resolves_pending_invocation() {
        let hub = HubClient::new();
        hub.set_state(ConnectionState::Connected);
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.attach_outbound(tx);

        let call = hub.invoke(protocol::methods::GET_ONLINE_USERS, vec![]);
        tokio::pin!(call);

        // Drive the invoke future until the frame is written out.
        let frame = tokio::select! {
            frame = rx.recv() => frame.expect("frame sent"),
            _ = &mut call => panic!("invoke resolved before completion"),
        };
        assert!(frame.contains("GetOnlineUsers"));

        hub.resolve_completion("1", Some(serde_json::json!([7, 9])), None);
        let result = call.await.unwrap();
        assert_eq!(result, Some(serde_json::json!([7, 9])));
    }

    #[tokio::test]
    async fn test_fail_pending_surfaces_connection_closed() {
        let hub = HubClient::new();
        hub.set_state(ConnectionState::Connected);
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.attach_outbound(tx);

        let call = hub.invoke(protocol::methods::JOIN_ROOM, vec![]);
        tokio::pin!(call);

        tokio::select! {
            _ = rx.recv() => {}
            _ = &mut call => panic!("invoke resolved before teardown"),
        }

        hub.fail_pending();
        assert!(matches!(call.await, Err(HubError::ConnectionClosed)));
    }
}
