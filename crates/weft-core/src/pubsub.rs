use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use weft_types::{topics, TeamEvent};

/// A live subscription. Dropping the receiver ends delivery; the fabric
/// prunes the dead endpoint on the next broadcast to that topic.
pub struct Subscription {
    pub topic: String,
    pub id: u64,
    pub rx: mpsc::UnboundedReceiver<TeamEvent>,
}

struct Endpoint {
    id: u64,
    tx: mpsc::UnboundedSender<TeamEvent>,
}

/// Process-wide topic directory. Delivery is best-effort in-memory and
/// at-most-once: subscribers present at the instant of `broadcast` receive
/// the message, late subscribers do not. Per topic, messages from one
/// publisher arrive in publish order.
pub struct PubSub {
    next_id: AtomicU64,
    directory: RwLock<HashMap<String, Vec<Endpoint>>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            directory: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe_sender(topic, tx);
        Subscription {
            topic: topic.to_string(),
            id,
            rx,
        }
    }

    /// Attach an existing sender, so one mailbox can watch many topics.
    pub fn subscribe_sender(&self, topic: &str, tx: mpsc::UnboundedSender<TeamEvent>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.directory
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(Endpoint { id, tx });
        id
    }

    pub fn unsubscribe(&self, topic: &str, id: u64) {
        let mut directory = self.directory.write();
        if let Some(endpoints) = directory.get_mut(topic) {
            endpoints.retain(|e| e.id != id);
            if endpoints.is_empty() {
                directory.remove(topic);
            }
        }
    }

    /// Fan the event out to every current subscriber of `topic`. Returns the
    /// number of endpoints that accepted delivery; closed endpoints are
    /// pruned in place.
    pub fn broadcast(&self, topic: &str, event: &TeamEvent) -> usize {
        let mut directory = self.directory.write();
        let Some(endpoints) = directory.get_mut(topic) else {
            return 0;
        };
        let mut delivered = 0;
        endpoints.retain(|endpoint| match endpoint.tx.send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => false,
        });
        if endpoints.is_empty() {
            directory.remove(topic);
        }
        delivered
    }

    /// Deliver directly to one agent's topic.
    pub fn send_to(&self, team_id: &str, agent: &str, event: &TeamEvent) -> usize {
        self.broadcast(&topics::agent(team_id, agent), event)
    }

    /// Drop every topic in a team's namespace. Used at dissolution; any
    /// in-flight subscribers just stop receiving.
    pub fn drop_team_topics(&self, team_id: &str) {
        let prefix = topics::team(team_id);
        let scoped = format!("{prefix}:");
        self.directory
            .write()
            .retain(|topic, _| topic != &prefix && !topic.starts_with(&scoped));
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.directory
            .read()
            .get(topic)
            .map(|e| e.len())
            .unwrap_or(0)
    }
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}
