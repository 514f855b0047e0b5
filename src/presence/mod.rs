//! Online-user presence tracking
//!
//! Mirrors the hub's view of who is online. The set is replaced wholesale by
//! snapshot events and mutated by per-user deltas; it is never a client-side
//! guess. On disconnect the set empties — "unknown" renders as nobody online,
//! not as stale presence.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::hub::{methods, EventKind, HubClient, HubEvent};

#[derive(Clone, Default)]
pub struct PresenceTracker {
    online: Arc<Mutex<HashSet<i64>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the transport's presence events, and refresh the
    /// snapshot after every (re)connect.
    pub fn attach(&self, hub: &HubClient) {
        for kind in [
            EventKind::OnlineUsers,
            EventKind::UserOnline,
            EventKind::UserOffline,
            EventKind::Disconnected,
        ] {
            let tracker = self.clone();
            hub.subscribe(kind, move |event| tracker.apply(event));
        }

        let tracker = self.clone();
        let refresh_hub = hub.clone();
        hub.subscribe(EventKind::Connected, move |_| {
            let tracker = tracker.clone();
            let hub = refresh_hub.clone();
            tokio::spawn(async move {
                match hub.invoke(methods::GET_ONLINE_USERS, vec![]).await {
                    Ok(result) => tracker.replace(parse_ids(result)),
                    Err(e) => tracing::warn!("Online-users refresh failed: {}", e),
                }
            });
        });
    }

    /// Apply one transport event to the set.
    pub fn apply(&self, event: &HubEvent) {
        match event {
            // The hub snapshot is authoritative: replace, never merge.
            HubEvent::OnlineUsers(ids) => self.replace(ids.clone()),
            HubEvent::UserOnline(id) => {
                self.online.lock().unwrap().insert(*id);
            }
            HubEvent::UserOffline(id) => {
                self.online.lock().unwrap().remove(id);
            }
            HubEvent::Disconnected { .. } => self.clear(),
            _ => {}
        }
    }

    /// Sorted copy of the current online set.
    pub fn online_users(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.online.lock().unwrap().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.online.lock().unwrap().contains(&user_id)
    }

    pub fn clear(&self) {
        self.online.lock().unwrap().clear();
    }

    fn replace(&self, ids: Vec<i64>) {
        *self.online.lock().unwrap() = ids.into_iter().collect();
    }
}

/// Decode a `GetOnlineUsers` completion result.
fn parse_ids(result: Option<Value>) -> Vec<i64> {
    result
        .and_then(|v| {
            v.as_array()
                .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_replaces_increments() {
        let tracker = PresenceTracker::new();

        tracker.apply(&HubEvent::UserOnline(42));
        assert_eq!(tracker.online_users(), vec![42]);

        // Snapshot is authoritative: 42 is gone, not merged in.
        tracker.apply(&HubEvent::OnlineUsers(vec![7, 9]));
        assert_eq!(tracker.online_users(), vec![7, 9]);
        assert!(!tracker.is_online(42));
    }

    #[test]
    fn test_increments_mutate() {
        let tracker = PresenceTracker::new();
        tracker.apply(&HubEvent::OnlineUsers(vec![1, 2]));
        tracker.apply(&HubEvent::UserOnline(3));
        tracker.apply(&HubEvent::UserOffline(1));
        assert_eq!(tracker.online_users(), vec![2, 3]);
    }

    #[test]
    fn test_duplicate_online_events_are_idempotent() {
        let tracker = PresenceTracker::new();
        tracker.apply(&HubEvent::UserOnline(5));
        tracker.apply(&HubEvent::UserOnline(5));
        assert_eq!(tracker.online_users(), vec![5]);
    }

    #[test]
    fn test_disconnect_clears() {
        let tracker = PresenceTracker::new();
        tracker.apply(&HubEvent::OnlineUsers(vec![1, 2, 3]));
        tracker.apply(&HubEvent::Disconnected { terminal: false });
        assert!(tracker.online_users().is_empty());
    }

    #[test]
    fn test_reads_return_copies() {
        let tracker = PresenceTracker::new();
        tracker.apply(&HubEvent::OnlineUsers(vec![1]));
        let mut copy = tracker.online_users();
        copy.push(99);
        assert_eq!(tracker.online_users(), vec![1]);
    }

    #[test]
    fn test_parse_ids() {
        assert_eq!(parse_ids(Some(serde_json::json!([3, 1]))), vec![3, 1]);
        assert_eq!(parse_ids(Some(serde_json::json!("nope"))), Vec::<i64>::new());
        assert_eq!(parse_ids(None), Vec::<i64>::new());
    }
}
