//! Fan-out of server-side events to websocket subscribers.
//!
//! Each subscriber is an unbounded channel drained by its own websocket
//! task. A broadcast sends to every subscriber; subscribers whose channel
//! is gone are collected during the pass and removed after it.

use biogate_core::LiveEvent;
use biogate_device::StatusChange;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Events pushed to `/ws` subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    /// A terminal changed health
    Status(StatusChange),

    /// A live punch relayed from a realtime subscription
    LiveEvent(LiveEvent),
}

/// Identifier returned by [`BroadcastHub::register`].
pub type SubscriberId = Uuid;

/// A registered subscriber's receiving end.
#[derive(Debug)]
pub struct Subscription<T> {
    pub id: SubscriberId,
    pub messages: mpsc::UnboundedReceiver<T>,
}

/// Set of live subscribers.
///
/// Cloning is cheap; clones share the same set.
///
/// # Examples
///
/// ```
/// use biogate_network::BroadcastHub;
///
/// let hub: BroadcastHub<String> = BroadcastHub::new();
/// let mut sub = hub.subscribe();
///
/// assert_eq!(hub.broadcast("hello".to_string()), 1);
/// assert_eq!(sub.messages.try_recv().unwrap(), "hello");
///
/// drop(sub);
/// assert_eq!(hub.broadcast("again".to_string()), 0);
/// assert!(hub.is_empty());
/// ```
#[derive(Debug)]
pub struct BroadcastHub<T> {
    subscribers: Arc<Mutex<Vec<(SubscriberId, mpsc::UnboundedSender<T>)>>>,
}

impl<T> Clone for BroadcastHub<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: self.subscribers.clone(),
        }
    }
}

impl<T> Default for BroadcastHub<T> {
    fn default() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> BroadcastHub<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<(SubscriberId, mpsc::UnboundedSender<T>)>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an existing sender as a subscriber.
    pub fn register(&self, sender: mpsc::UnboundedSender<T>) -> SubscriberId {
        let id = Uuid::new_v4();
        let mut subscribers = self.subscribers();
        subscribers.push((id, sender));
        debug!(subscriber = %id, subscribers = subscribers.len(), "Subscriber registered");
        id
    }

    /// Create a channel and register its sending end.
    pub fn subscribe(&self) -> Subscription<T> {
        let (sender, messages) = mpsc::unbounded_channel();
        let id = self.register(sender);
        Subscription { id, messages }
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        let removed = subscribers.len() != before;
        if removed {
            debug!(subscriber = %id, subscribers = subscribers.len(), "Subscriber removed");
        }
        removed
    }

    /// Send `message` to every subscriber, dropping the ones that are gone.
    ///
    /// Returns how many subscribers received it.
    pub fn broadcast(&self, message: T) -> usize {
        let mut subscribers = self.subscribers();

        let mut dead = Vec::new();
        for (id, sender) in subscribers.iter() {
            if sender.send(message.clone()).is_err() {
                dead.push(*id);
            }
        }

        if !dead.is_empty() {
            subscribers.retain(|(id, _)| !dead.contains(id));
            debug!(removed = dead.len(), "Dropped dead subscribers");
        }
        subscribers.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers().is_empty()
    }
}

/// Forward poller status changes into the hub until `cancel` fires or the
/// poller goes away.
pub async fn relay_status_changes(
    mut changes: broadcast::Receiver<StatusChange>,
    hub: BroadcastHub<HubMessage>,
    cancel: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            _ = cancel.cancelled() => break,
            change = changes.recv() => change,
        };
        match change {
            Ok(change) => {
                let delivered = hub.broadcast(HubMessage::Status(change));
                debug!(subscribers = delivered, "Status change relayed");
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Status relay fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_reaches_every_subscriber() {
        let hub = BroadcastHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        assert_eq!(hub.broadcast(7u32), 2);
        assert_eq!(a.messages.try_recv().unwrap(), 7);
        assert_eq!(b.messages.try_recv().unwrap(), 7);
    }

    #[test]
    fn test_dead_subscriber_does_not_block_others() {
        let hub = BroadcastHub::new();
        let dead = hub.subscribe();
        let mut live = hub.subscribe();
        drop(dead.messages);

        assert_eq!(hub.broadcast(1u32), 1);
        assert_eq!(live.messages.try_recv().unwrap(), 1);
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn test_unregister() {
        let hub: BroadcastHub<u32> = BroadcastHub::new();
        let sub = hub.subscribe();
        assert!(hub.unregister(sub.id));
        assert!(!hub.unregister(sub.id));
        assert_eq!(hub.broadcast(1), 0);
    }

    #[test]
    fn test_register_external_sender() {
        let hub = BroadcastHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(tx);
        hub.broadcast("x");
        assert_eq!(rx.try_recv().unwrap(), "x");
    }

    #[test]
    fn test_hub_message_json() {
        let event = LiveEvent {
            user_id: "1001".to_string(),
            timestamp: chrono::NaiveDate::from_ymd_opt(2025, 3, 1)
                .unwrap()
                .and_hms_opt(8, 15, 0)
                .unwrap(),
            status: 1,
            punch: 0,
            device_ip: "10.0.0.7".to_string(),
        };
        let value = serde_json::to_value(HubMessage::LiveEvent(event)).unwrap();
        assert_eq!(value["type"], "live_event");
        assert_eq!(value["user_id"], "1001");
        assert_eq!(value["timestamp"], "2025-03-01T08:15:00");
    }

    #[tokio::test]
    async fn test_status_changes_are_relayed() {
        use biogate_device::DeviceStatus;
        use biogate_device::monitor::{DeviceHealth, HealthState};

        let hub = BroadcastHub::new();
        let mut sub = hub.subscribe();
        let (tx, rx) = broadcast::channel(4);
        let relay = tokio::spawn(relay_status_changes(rx, hub.clone(), CancellationToken::new()));

        tx.send(StatusChange {
            device: "10.0.0.7".parse().unwrap(),
            previous: Some(HealthState::Online),
            current: HealthState::Offline,
            status: DeviceStatus {
                health: DeviceHealth::Offline {
                    error: "timed out".to_string(),
                },
                timestamp: chrono::Utc::now(),
            },
        })
        .unwrap();

        let message = sub.messages.recv().await.unwrap();
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["current"], "offline");
        assert_eq!(value["status"]["status"], "offline");

        // Dropping the sender ends the relay
        drop(tx);
        relay.await.unwrap();
    }
}
