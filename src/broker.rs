//! Event Broker
//! Mission: Route per-tenant messages to live stream subscribers only

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Frame delivered to a subscriber's channel: a pre-serialized event, or a
/// close notice telling the connection task to shut the socket down.
#[derive(Debug, Clone)]
pub enum Frame {
    Event(String),
    Close,
}

type SubscriberSet = HashMap<Uuid, mpsc::Sender<Frame>>;

/// Per-tenant publish/subscribe. Publishes serialize once and fan out with
/// bounded, non-blocking sends; a subscriber whose channel is full or
/// closed is removed on the spot so slow clients never stall a tenant.
pub struct EventBroker {
    topics: Mutex<HashMap<String, Arc<Mutex<SubscriberSet>>>>,
    index: Mutex<HashMap<Uuid, String>>,
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroker {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            index: Mutex::new(HashMap::new()),
        }
    }

    /// Enroll a subscription under a tenant. Idempotent per subscription
    /// id; re-enrolling under a different tenant moves the subscription.
    pub fn subscribe(&self, tenant: &str, id: Uuid, sender: mpsc::Sender<Frame>) {
        let previous = { self.index.lock().insert(id, tenant.to_string()) };
        if let Some(previous) = previous.filter(|p| p != tenant) {
            let old_topic = { self.topics.lock().get(&previous).cloned() };
            if let Some(old_topic) = old_topic {
                old_topic.lock().remove(&id);
            }
        }

        let topic = {
            let mut topics = self.topics.lock();
            Arc::clone(
                topics
                    .entry(tenant.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(HashMap::new()))),
            )
        };
        topic.lock().insert(id, sender);
        debug!(tenant, subscription = %id, "Stream subscribed");
    }

    /// Remove a subscription from whichever tenant set it is in.
    pub fn unsubscribe(&self, id: Uuid) {
        let tenant = { self.index.lock().remove(&id) };
        let Some(tenant) = tenant else { return };

        let topic = { self.topics.lock().get(&tenant).cloned() };
        if let Some(topic) = topic {
            topic.lock().remove(&id);
        }
        debug!(tenant = %tenant, subscription = %id, "Stream unsubscribed");
    }

    /// Serialize `event` exactly once and deliver a copy to every live
    /// subscriber of `tenant`. Returns the number of deliveries.
    pub fn publish<T: serde::Serialize>(&self, tenant: &str, event: &T) -> usize {
        let topic = { self.topics.lock().get(tenant).cloned() };
        let Some(topic) = topic else { return 0 };

        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(tenant, error = %e, "Failed to serialize broker event");
                return 0;
            }
        };

        let mut dead = Vec::new();
        let delivered = {
            let mut subscribers = topic.lock();
            let before = subscribers.len();
            subscribers.retain(|id, sender| {
                match sender.try_send(Frame::Event(frame.clone())) {
                    Ok(()) => true,
                    Err(_) => {
                        dead.push(*id);
                        false
                    }
                }
            });
            before - dead.len()
        };

        if !dead.is_empty() {
            let mut index = self.index.lock();
            for id in &dead {
                index.remove(id);
            }
            warn!(tenant, dropped = dead.len(), "Dropped unresponsive stream subscribers");
        }

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.index.lock().len()
    }

    /// Send a close notice to every subscriber and drop all registrations.
    /// Used at shutdown.
    pub fn close_all(&self) {
        let topics: Vec<Arc<Mutex<SubscriberSet>>> =
            { self.topics.lock().drain().map(|(_, topic)| topic).collect() };
        for topic in topics {
            for (_, sender) in topic.lock().drain() {
                let _ = sender.try_send(Frame::Close);
            }
        }
        self.index.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel() -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
        mpsc::channel(8)
    }

    fn recv_event(rx: &mut mpsc::Receiver<Frame>) -> Option<String> {
        match rx.try_recv() {
            Ok(Frame::Event(frame)) => Some(frame),
            _ => None,
        }
    }

    #[test]
    fn test_publish_reaches_only_own_tenant() {
        let broker = EventBroker::new();
        let (alice_tx, mut alice_rx) = channel();
        let (bob_tx, mut bob_rx) = channel();

        broker.subscribe("alice", Uuid::new_v4(), alice_tx);
        broker.subscribe("bob", Uuid::new_v4(), bob_tx);

        let delivered = broker.publish("alice", &json!({"type": "result-update"}));
        assert_eq!(delivered, 1);

        assert!(recv_event(&mut alice_rx).is_some());
        assert!(recv_event(&mut bob_rx).is_none());
    }

    #[test]
    fn test_publish_order_preserved_per_subscriber() {
        let broker = EventBroker::new();
        let (tx, mut rx) = channel();
        broker.subscribe("alice", Uuid::new_v4(), tx);

        for n in 0..3 {
            broker.publish("alice", &json!({ "n": n }));
        }

        for n in 0..3 {
            let frame = recv_event(&mut rx).unwrap();
            assert!(frame.contains(&format!("\"n\":{n}")));
        }
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let broker = EventBroker::new();
        let id = Uuid::new_v4();
        let (tx, mut rx) = channel();

        broker.subscribe("alice", id, tx.clone());
        broker.subscribe("alice", id, tx);
        assert_eq!(broker.subscriber_count(), 1);

        broker.publish("alice", &json!({"once": true}));
        assert!(recv_event(&mut rx).is_some());
        assert!(recv_event(&mut rx).is_none());
    }

    #[test]
    fn test_full_channel_drops_subscriber() {
        let broker = EventBroker::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(1);
        broker.subscribe("alice", id, tx);

        assert_eq!(broker.publish("alice", &json!({"n": 1})), 1);
        // Channel now full; the bounded send fails and the sub is dropped.
        assert_eq!(broker.publish("alice", &json!({"n": 2})), 0);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[test]
    fn test_resubscribe_moves_between_tenants() {
        let broker = EventBroker::new();
        let id = Uuid::new_v4();
        let (tx, mut rx) = channel();

        broker.subscribe("alice", id, tx.clone());
        broker.subscribe("bob", id, tx);
        assert_eq!(broker.subscriber_count(), 1);

        // Publishes to the old tenant no longer reach the subscription.
        assert_eq!(broker.publish("alice", &json!({"stale": true})), 0);
        assert_eq!(broker.publish("bob", &json!({"fresh": true})), 1);
        assert!(recv_event(&mut rx).unwrap().contains("fresh"));
    }

    #[test]
    fn test_unsubscribe_removes_from_tenant_set() {
        let broker = EventBroker::new();
        let id = Uuid::new_v4();
        let (tx, mut rx) = channel();

        broker.subscribe("alice", id, tx);
        broker.unsubscribe(id);

        assert_eq!(broker.publish("alice", &json!({"gone": true})), 0);
        assert!(recv_event(&mut rx).is_none());
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[test]
    fn test_close_all_sends_close_notice() {
        let broker = EventBroker::new();
        let (tx, mut rx) = channel();
        broker.subscribe("alice", Uuid::new_v4(), tx);

        broker.close_all();
        assert!(matches!(rx.try_recv(), Ok(Frame::Close)));
        assert_eq!(broker.subscriber_count(), 0);
    }
}
