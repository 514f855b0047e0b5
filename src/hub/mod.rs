//! Real-time hub transport
//!
//! Maintains one persistent websocket connection to the backend's hub for
//! presence, message relay, and typing notifications. Reconnection is hidden
//! from callers: transient drops go through a bounded retry schedule, and
//! subscribers observe lifecycle changes as `Connected` / `Disconnected`
//! events alongside the server-pushed ones.

pub mod client;
pub mod protocol;
pub mod socket;

pub use client::{ConnectionState, HandlerId, HubClient, HubError, TokenSource};
pub use protocol::{methods, EventKind, HubEvent};

use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time;

use socket::HubSocket;

/// Retry schedule in seconds. The first entry is the initial attempt; after
/// the last delay fails the client gives up and surfaces a terminal
/// disconnect.
const RETRY_DELAYS: [u64; 4] = [0, 2, 10, 30];

/// A session connected at least this long resets the retry schedule.
const STABILITY_THRESHOLD: Duration = Duration::from_secs(60);

/// Keepalive ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Cadence of the `UpdateLastSeen` presence refresh.
const LAST_SEEN_INTERVAL: Duration = Duration::from_secs(300);

/// Reason the inner session loop exited.
enum SessionEnd {
    /// Deliberate disconnect(). Do not reconnect.
    Shutdown,
    /// Error or server-initiated close. Should reconnect.
    Error(anyhow::Error),
}

/// Drive the connection until a deliberate disconnect or retry exhaustion.
///
/// Spawned by [`HubClient::connect`]. Each failed session advances through
/// `RETRY_DELAYS`; a stable session (>60s connected) resets the schedule.
async fn run_supervisor(hub: HubClient, endpoint: String, tokens: TokenSource) {
    let mut shutdown = hub.shutdown_requested();
    let mut attempt: usize = 0;
    let mut first_session = true;

    loop {
        if *shutdown.borrow() {
            hub.dispatch(&HubEvent::Disconnected { terminal: true });
            break;
        }

        let delay = RETRY_DELAYS[attempt];
        if delay > 0 {
            tracing::warn!(
                "Hub reconnecting in {}s (attempt {}/{})",
                delay,
                attempt + 1,
                RETRY_DELAYS.len()
            );
            tokio::select! {
                _ = time::sleep(Duration::from_secs(delay)) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                hub.dispatch(&HubEvent::Disconnected { terminal: true });
                break;
            }
        }

        hub.set_state(if first_session {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });
        first_session = false;

        match run_session(&hub, &endpoint, &tokens, &mut shutdown).await {
            Ok(SessionEnd::Shutdown) => {
                hub.dispatch(&HubEvent::Disconnected { terminal: true });
                break;
            }
            Ok(SessionEnd::Error(e)) => {
                // Session was stable; restart the schedule.
                attempt = 0;
                tracing::warn!("Hub disconnected after stable session: {:#}", e);
                hub.set_state(ConnectionState::Reconnecting);
                hub.dispatch(&HubEvent::Disconnected { terminal: false });
            }
            Err(e) => {
                attempt += 1;
                let terminal = attempt >= RETRY_DELAYS.len();
                tracing::warn!("Hub disconnected: {:#}", e);
                if terminal {
                    tracing::error!("Hub retry schedule exhausted, giving up");
                }
                hub.set_state(if terminal {
                    ConnectionState::Disconnected
                } else {
                    ConnectionState::Reconnecting
                });
                hub.dispatch(&HubEvent::Disconnected { terminal });
                if terminal {
                    break;
                }
            }
        }
    }

    hub.set_state(ConnectionState::Disconnected);
    hub.supervisor_stopped();
}

/// What one inbound record means for the session loop.
enum RecordOutcome {
    Continue,
    Close(Option<String>),
}

/// Run one full hub session: connect, handshake, event loop.
///
/// Returns `Ok(SessionEnd::Shutdown)` on deliberate disconnect,
/// `Ok(SessionEnd::Error)` when the session was up long enough that the
/// retry schedule should reset, and `Err` for a short-lived failure.
async fn run_session(
    hub: &HubClient,
    endpoint: &str,
    tokens: &TokenSource,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<SessionEnd> {
    // Re-consult the token source each attempt to pick up refreshed logins.
    let token = tokens().context("Failed to obtain hub access token")?;

    let mut ws = HubSocket::connect(endpoint, &token)
        .await
        .map_err(|e| HubError::Connection(format!("{:#}", e)))?;

    // Handshake: send our protocol record, expect an empty-object reply.
    ws.send_text(&protocol::handshake_request()).await?;
    let frame = ws
        .recv_frame()
        .await?
        .context("Connection closed before handshake")?;

    let mut records = protocol::split_records(&frame);
    let first = records.next().context("Empty handshake frame")?;
    protocol::parse_handshake_response(first)
        .map_err(|e| HubError::Handshake(format!("{:#}", e)))?;
    let leftover: Vec<String> = records.map(String::from).collect();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    hub.attach_outbound(out_tx);
    hub.set_state(ConnectionState::Connected);
    hub.dispatch(&HubEvent::Connected);
    tracing::info!("Hub connected");

    // Records that shared the handshake frame.
    for record in &leftover {
        handle_record(hub, record);
    }

    let connected_at = Instant::now();
    let mut ping = time::interval(PING_INTERVAL);
    ping.tick().await; // skip first immediate tick
    let mut last_seen = time::interval(LAST_SEEN_INTERVAL);
    last_seen.tick().await;

    let end = 'session: loop {
        tokio::select! {
            frame = ws.recv_frame() => {
                match frame {
                    Ok(Some(text)) => {
                        for record in protocol::split_records(&text) {
                            if let RecordOutcome::Close(error) = handle_record(hub, record) {
                                let reason = error.unwrap_or_else(|| "server closed the session".into());
                                break 'session SessionEnd::Error(anyhow::anyhow!(reason));
                            }
                        }
                    }
                    Ok(None) => {
                        break SessionEnd::Error(anyhow::anyhow!("WebSocket closed by server"));
                    }
                    Err(e) => {
                        break SessionEnd::Error(e.context("WebSocket recv error"));
                    }
                }
            }
            Some(frame) = out_rx.recv() => {
                if let Err(e) = ws.send_text(&frame).await {
                    break SessionEnd::Error(e.context("Send failed"));
                }
            }
            _ = ping.tick() => {
                if let Err(e) = ws.send_text(&protocol::encode_ping()).await {
                    break SessionEnd::Error(e.context("Keepalive send failed"));
                }
            }
            _ = last_seen.tick() => {
                if let Err(e) = hub.send(methods::UPDATE_LAST_SEEN, vec![]) {
                    tracing::debug!("UpdateLastSeen skipped: {}", e);
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    ws.close().await;
                    break SessionEnd::Shutdown;
                }
            }
        }
    };

    hub.detach_outbound();
    hub.fail_pending();

    // Stability convention: a long-lived session returns Ok so the caller
    // resets the retry schedule.
    if connected_at.elapsed() >= STABILITY_THRESHOLD {
        return Ok(end);
    }

    match end {
        SessionEnd::Shutdown => Ok(SessionEnd::Shutdown),
        SessionEnd::Error(e) => Err(e),
    }
}

/// Handle one inbound protocol record.
fn handle_record(hub: &HubClient, record: &str) -> RecordOutcome {
    let message = match protocol::parse_message(record) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Dropping unparseable hub record: {:#}", e);
            return RecordOutcome::Continue;
        }
    };

    match message {
        protocol::ServerMessage::Invocation { target, arguments } => {
            match HubEvent::from_invocation(&target, arguments) {
                Some(event) => hub.dispatch(&event),
                None => tracing::debug!("Ignoring unknown hub event: {}", target),
            }
        }
        protocol::ServerMessage::Completion {
            invocation_id,
            result,
            error,
        } => {
            hub.resolve_completion(&invocation_id, result, error);
        }
        protocol::ServerMessage::Ping => {
            tracing::debug!("Hub keepalive ping");
        }
        protocol::ServerMessage::Close { error } => {
            return RecordOutcome::Close(error);
        }
        protocol::ServerMessage::Other => {
            tracing::debug!("Ignoring unsupported hub record");
        }
    }

    RecordOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_schedule_shape() {
        // Initial attempt is immediate; backoff grows and is bounded.
        assert_eq!(RETRY_DELAYS[0], 0);
        assert!(RETRY_DELAYS.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*RETRY_DELAYS.last().unwrap(), 30);
    }
}
