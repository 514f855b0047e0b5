//! Live session: hub transport, presence, relay, and reconciler wired
//! together
//!
//! This is the integration point behind the `watch` and `online` commands:
//! one hub connection per process, presence and relay subscribed to it, and
//! relay-delivered messages routed into the conversation reconciler.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::api::{reference, responses, DeskClient, NewResponse};
use crate::config::Config;
use crate::conversation::{print_thread, Reconciler};
use crate::hub::{
    methods, ConnectionState, EventKind, HubClient, HubEvent, TokenSource,
};
use crate::models::{Attachment, ChatMessage, DeliveryState, RelayMessage, UserProfile};
use crate::presence::PresenceTracker;
use crate::relay::{room_for_ticket, MessageRelay};

/// How long `online` waits for the hub before reporting it unreachable.
const CONNECT_WAIT: Duration = Duration::from_secs(10);

pub struct LiveSession {
    hub: HubClient,
    pub presence: PresenceTracker,
    pub relay: MessageRelay,
    pub reconciler: Reconciler,
    api: Arc<DeskClient>,
    profile: UserProfile,
}

impl LiveSession {
    /// Construct the session services and start connecting. The token source
    /// re-reads the config on every attempt so a re-login mid-session is
    /// picked up by the next reconnect.
    pub fn start(api: Arc<DeskClient>, profile: UserProfile, hub_endpoint: String) -> Self {
        let hub = HubClient::new();

        let presence = PresenceTracker::new();
        presence.attach(&hub);

        let relay = MessageRelay::new(hub.clone());
        let reconciler = Reconciler::new(Arc::clone(&api));

        {
            let reconciler = reconciler.clone();
            hub.subscribe(EventKind::ReceiveMessage, move |event| {
                if let HubEvent::ReceiveMessage(message) = event {
                    reconciler.append_live(message.clone());
                }
            });
        }

        let tokens: TokenSource = Arc::new(|| {
            let config = Config::load()?;
            let token = config
                .get_access_token()
                .context("Not logged in. Run 'desk-cli login' first.")?;
            anyhow::ensure!(
                !token.is_expired(),
                "Token expired. Run 'desk-cli login' to refresh."
            );
            Ok(token.token)
        });
        hub.connect(hub_endpoint, tokens);

        Self {
            hub,
            presence,
            relay,
            reconciler,
            api,
            profile,
        }
    }

    pub fn hub(&self) -> &HubClient {
        &self.hub
    }

    pub fn shutdown(&self) {
        self.hub.disconnect();
    }

    /// Open a ticket's conversation: join its room and load history. A
    /// failed join is retried by the relay on the next reconnect, so it only
    /// degrades the live path, never the history.
    pub async fn open_ticket(&self, ticket_id: i64) -> Result<()> {
        if let Err(e) = self.relay.join_room(&room_for_ticket(ticket_id)).await {
            tracing::warn!("Room join deferred: {}", e);
        }
        self.reconciler
            .open(ticket_id)
            .await
            .context("History load failed")?;
        Ok(())
    }

    /// Send a message on both paths: the relay broadcast for anyone viewing
    /// the room right now, and the REST create for durability. The two are
    /// deliberately independent; the reconciler's correlation id dedupes
    /// whatever subset arrives back.
    pub async fn send_message(
        &self,
        ticket_id: i64,
        body: Option<String>,
        attachment: Option<Attachment>,
    ) -> Result<ChatMessage> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let room = room_for_ticket(ticket_id);

        let optimistic = ChatMessage {
            server_id: None,
            correlation_id: Some(correlation_id.clone()),
            ticket_id,
            sender_id: self.profile.id,
            sender_name: self.profile.display_name.clone(),
            body: body.clone(),
            attachment: attachment.clone(),
            created_at: Utc::now(),
            read: true,
            delivery: DeliveryState::Pending,
        };
        self.reconciler.insert_optimistic(optimistic.clone());

        // Sending ends any outbound typing indicator.
        self.relay.stop_typing(&room);

        // Live path first; offline just means nobody is watching live.
        let broadcast = RelayMessage {
            correlation_id: Some(correlation_id.clone()),
            server_id: None,
            ticket_id,
            sender_id: optimistic.sender_id,
            sender_name: optimistic.sender_name.clone(),
            body: body.clone(),
            attachment: attachment.clone(),
            sent_at: optimistic.created_at,
        };
        if let Err(e) = self.relay.send_to_room(&room, &broadcast) {
            tracing::debug!("Live broadcast skipped: {}", e);
        }

        // Durability path.
        let new_response = NewResponse {
            message: body,
            file_base64: attachment.as_ref().map(|a| a.data_base64.clone()),
            file_name: attachment.as_ref().map(|a| a.file_name.clone()),
            file_mime_type: attachment.as_ref().map(|a| a.mime_type.clone()),
        };
        match responses::create_response_data(&self.api, ticket_id, &new_response).await {
            Ok(confirmed) => {
                self.reconciler.confirm_send(&correlation_id, confirmed.clone());
                Ok(confirmed)
            }
            Err(e) => {
                self.reconciler.fail_send(&correlation_id);
                Err(e).context("Message not sent")
            }
        }
    }
}

fn start_session() -> Result<LiveSession> {
    let config = Config::load()?;
    let hub_endpoint = config.hub_endpoint()?;
    let api = Arc::new(DeskClient::new()?);
    let profile = api
        .profile()
        .context("No stored profile. Run 'desk-cli login' again.")?
        .clone();
    Ok(LiveSession::start(api, profile, hub_endpoint))
}

/// Wait until the hub reports connected (or the deadline passes).
async fn await_connected(hub: &HubClient) -> Result<()> {
    let mut states = hub.state_changes();
    tokio::time::timeout(CONNECT_WAIT, async {
        loop {
            if *states.borrow() == ConnectionState::Connected {
                return;
            }
            if states.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("Hub unreachable (timed out after {:?})", CONNECT_WAIT))?;

    anyhow::ensure!(
        hub.state() == ConnectionState::Connected,
        "Hub connection failed"
    );
    Ok(())
}

/// Print live hub activity; with a ticket, also join its conversation and
/// relay typed lines as messages. Runs until Ctrl-C.
pub async fn watch(ticket: Option<i64>) -> Result<()> {
    let session = start_session()?;

    register_event_printers(&session);

    if let Some(ticket_id) = ticket {
        session.open_ticket(ticket_id).await?;
        let thread = session.reconciler.snapshot();
        print_thread(&thread);

        // Viewing the conversation is the read trigger.
        if let Err(e) = session.reconciler.mark_conversation_read(ticket_id).await {
            tracing::warn!("Read receipt failed: {:#}", e);
        }

        println!("(type a message and press Enter to send, Ctrl-C to stop)");
    } else {
        println!("Listening for events... (Ctrl-C to stop)");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) if !text.trim().is_empty() => {
                        let Some(ticket_id) = ticket else {
                            println!("(no ticket open -- restart with --ticket to chat)");
                            continue;
                        };
                        match session.send_message(ticket_id, Some(text.trim().to_string()), None).await {
                            Ok(sent) => {
                                if let Some(id) = sent.server_id {
                                    tracing::debug!("Message persisted as #{}", id);
                                }
                            }
                            Err(e) => println!("[SEND FAILED] {:#}", e),
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        // stdin closed; keep listening for events.
                        tokio::signal::ctrl_c().await?;
                        break;
                    }
                    Err(e) => return Err(e).context("stdin read failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    println!("Shutting down...");
    if let Some(ticket_id) = ticket {
        session.relay.leave_room(&room_for_ticket(ticket_id)).await;
        session.reconciler.close();
    }
    session.shutdown();
    Ok(())
}

/// Subscribe printers for every event class the watch view shows.
fn register_event_printers(session: &LiveSession) {
    let hub = session.hub();

    hub.subscribe(EventKind::Connected, |_| {
        println!("[STATUS] connected");
    });
    hub.subscribe(EventKind::Disconnected, |event| {
        if let HubEvent::Disconnected { terminal } = event {
            if *terminal {
                println!("[STATUS] offline -- live updates unavailable, REST still works");
            } else {
                println!("[STATUS] connection lost, reconnecting...");
            }
        }
    });
    {
        let presence = session.presence.clone();
        hub.subscribe(EventKind::UserOnline, move |event| {
            if let HubEvent::UserOnline(id) = event {
                println!(
                    "[PRESENCE] user {} is online (now online: {:?})",
                    id,
                    presence.online_users()
                );
            }
        });
    }
    {
        let presence = session.presence.clone();
        hub.subscribe(EventKind::UserOffline, move |event| {
            if let HubEvent::UserOffline(id) = event {
                println!(
                    "[PRESENCE] user {} went offline (now online: {:?})",
                    id,
                    presence.online_users()
                );
            }
        });
    }
    {
        let relay = session.relay.clone();
        hub.subscribe(EventKind::UserTyping, move |event| {
            if let HubEvent::UserTyping(id) = event {
                println!(
                    "[TYPING] user {} is typing... (typing: {:?})",
                    id,
                    relay.typing_users()
                );
            }
        });
    }
    {
        let presence = session.presence.clone();
        hub.subscribe(EventKind::ReceiveMessage, move |event| {
            if let HubEvent::ReceiveMessage(message) = event {
                let body = message.body.as_deref().unwrap_or("");
                let attachment = message
                    .attachment
                    .as_ref()
                    .map(|a| format!(" [{}]", a.file_name))
                    .unwrap_or_default();
                let online = if presence.is_online(message.sender_id) {
                    ""
                } else {
                    " (offline)"
                };
                println!(
                    "[MSG] {}{}: {}{}",
                    message.sender_name, online, body, attachment
                );
            }
        });
    }
}

/// One-shot online-user listing: connect, ask the hub, print names, leave.
pub async fn online() -> Result<()> {
    let session = start_session()?;

    let result = async {
        await_connected(session.hub()).await?;

        let ids = session
            .hub()
            .invoke(methods::GET_ONLINE_USERS, vec![])
            .await
            .context("Online-user query failed")?;
        let ids: Vec<i64> = ids
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let names = reference::user_names(&session.api).await.unwrap_or_default();

        println!("\nOnline users ({}):", ids.len());
        for id in ids {
            match names.get(&id) {
                Some(name) => println!("  {} ({})", name, id),
                None => println!("  user {}", id),
            }
        }
        Ok(())
    }
    .await;

    session.shutdown();
    result
}
