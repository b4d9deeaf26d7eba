//! Structured event channel between the core engines and their consumers.
//!
//! The engines publish; any number of consumers subscribe. The channel is a
//! bounded broadcast: a consumer that falls behind loses the oldest events
//! rather than stalling a producer. The core never calls into a UI.

use tokio::sync::broadcast;

use crate::types::SyncCommand;

const EVENT_CAPACITY: usize = 256;

/// Everything the mesh reports outward.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A beacon from `node_id` refreshed the peer directory.
    PeerSeen { node_id: String, addr: String },
    /// A replicated blob passed admission and was linked into the chain.
    BlobAccepted { hash_hex: String, name: String, origin_id: String },
    /// A locally originated blob was sealed, linked, and fanned out.
    BlobOriginated { hash_hex: String, name: String, fanout: usize },
    /// A broadcast command arrived from a peer.
    CommandReceived(SyncCommand),
    /// A mix envelope reached this node as its terminal hop.
    MixDelivered { msgid: String, kind: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Dropped silently when nobody is subscribed.
    pub fn publish(&self, event: NodeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(NodeEvent::PeerSeen {
            node_id: "n1".into(),
            addr: "10.0.0.2:8080".into(),
        });
        match rx.recv().await.unwrap() {
            NodeEvent::PeerSeen { node_id, .. } => assert_eq!(node_id, "n1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(NodeEvent::MixDelivered {
            msgid: "m".into(),
            kind: "text".into(),
        });
        // a late subscriber only sees events published after subscribing
        let mut rx = bus.subscribe();
        bus.publish(NodeEvent::MixDelivered {
            msgid: "m2".into(),
            kind: "text".into(),
        });
        match rx.recv().await.unwrap() {
            NodeEvent::MixDelivered { msgid, .. } => assert_eq!(msgid, "m2"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
