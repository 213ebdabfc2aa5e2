//! Topic-based fan-out of live messages to subscribed WebSocket connections.
//!
//! One topic per chat.  Publishing serializes the frame once and pushes the
//! shared string into each subscriber's bounded channel without awaiting, so
//! a slow subscriber can never stall the publisher; it just drops frames,
//! and past a drop threshold it is evicted from every topic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_shared::protocol::ServerFrame;
use parley_shared::ChatId;

/// Per-subscriber outbound buffer, in frames.
pub const SUBSCRIBER_BUFFER: usize = 64;

/// Maximum lifetime frame drops before a slow subscriber is evicted.
const MAX_TOTAL_DROPS: u64 = 100;

/// One WebSocket connection's view into the broker: an id and the sending
/// half of its outbound channel.
pub struct Subscriber {
    pub id: Uuid,
    tx: mpsc::Sender<Arc<String>>,
    drops: AtomicU64,
}

impl Subscriber {
    pub fn new(id: Uuid, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            drops: AtomicU64::new(0),
        }
    }

    /// Non-blocking send; a full or closed channel counts as a drop.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            self.drops.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

/// Publish/subscribe registry keyed by chat id.
pub struct Broker {
    topics: RwLock<HashMap<ChatId, Vec<Arc<Subscriber>>>>,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe a connection to a chat's topic.  Subscribing twice is a
    /// no-op.
    pub async fn subscribe(&self, chat_id: ChatId, subscriber: Arc<Subscriber>) {
        let mut topics = self.topics.write().await;
        let subs = topics.entry(chat_id).or_default();
        if !subs.iter().any(|s| s.id == subscriber.id) {
            subs.push(subscriber);
        }
    }

    /// Remove a connection from every topic (connection closed).
    pub async fn unsubscribe_all(&self, subscriber_id: Uuid) {
        let mut topics = self.topics.write().await;
        for subs in topics.values_mut() {
            subs.retain(|s| s.id != subscriber_id);
        }
        topics.retain(|_, subs| !subs.is_empty());
    }

    /// Serialize the frame once and deliver it to every subscriber of the
    /// topic.  Each delivery is independent; slow subscribers over the drop
    /// threshold are evicted.  Returns the number of subscribers reached.
    pub async fn publish(&self, chat_id: ChatId, frame: &ServerFrame) -> usize {
        let json = match serde_json::to_string(frame) {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(topic = %chat_id.to_topic(), error = %e, "failed to serialize frame");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut to_evict = Vec::new();
        {
            let topics = self.topics.read().await;
            let Some(subs) = topics.get(&chat_id) else {
                debug!(topic = %chat_id.to_topic(), "publish to empty topic");
                return 0;
            };

            for sub in subs {
                if sub.send(Arc::clone(&json)) {
                    delivered += 1;
                } else {
                    let drops = sub.drop_count();
                    if drops >= MAX_TOTAL_DROPS {
                        warn!(subscriber = %sub.id, topic = %chat_id.to_topic(), drops, "evicting slow subscriber");
                        to_evict.push(sub.id);
                    } else {
                        warn!(subscriber = %sub.id, topic = %chat_id.to_topic(), total_drops = drops, "dropped frame (channel full)");
                    }
                }
            }
            debug!(topic = %chat_id.to_topic(), delivered, "published frame");
        }

        if !to_evict.is_empty() {
            let mut topics = self.topics.write().await;
            for subs in topics.values_mut() {
                subs.retain(|s| !to_evict.contains(&s.id));
            }
            topics.retain(|_, subs| !subs.is_empty());
        }

        delivered
    }

    /// Number of subscribers currently on a topic.
    pub async fn topic_len(&self, chat_id: ChatId) -> usize {
        self.topics
            .read()
            .await
            .get(&chat_id)
            .map_or(0, |subs| subs.len())
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::protocol::MessageResponse;
    use parley_shared::{MessageId, MessageStatus, UserId};

    fn make_subscriber(buffer: usize) -> (Arc<Subscriber>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Arc::new(Subscriber::new(Uuid::new_v4(), tx)), rx)
    }

    fn make_frame(chat_id: ChatId, content: &str) -> ServerFrame {
        ServerFrame::Message(MessageResponse {
            id: MessageId::new(),
            chat_id,
            sender_id: UserId::new(),
            receiver_id: UserId::new(),
            content: content.into(),
            timestamp: chrono::Utc::now(),
            status: MessageStatus::Sent,
        })
    }

    #[tokio::test]
    async fn publish_reaches_topic_subscribers_only() {
        let broker = Broker::new();
        let (chat_a, chat_b) = (ChatId::new(), ChatId::new());
        let (sub_a, mut rx_a) = make_subscriber(8);
        let (sub_b, mut rx_b) = make_subscriber(8);
        broker.subscribe(chat_a, sub_a).await;
        broker.subscribe(chat_b, sub_b).await;

        let delivered = broker.publish(chat_a, &make_frame(chat_a, "hi")).await;
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_to_empty_topic_is_noop() {
        let broker = Broker::new();
        let chat = ChatId::new();
        assert_eq!(broker.publish(chat, &make_frame(chat, "x")).await, 0);
    }

    #[tokio::test]
    async fn duplicate_subscribe_is_idempotent() {
        let broker = Broker::new();
        let chat = ChatId::new();
        let (sub, mut rx) = make_subscriber(8);
        broker.subscribe(chat, sub.clone()).await;
        broker.subscribe(chat, sub).await;

        assert_eq!(broker.topic_len(chat).await, 1);
        broker.publish(chat, &make_frame(chat, "once")).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_all_clears_every_topic() {
        let broker = Broker::new();
        let (chat_a, chat_b) = (ChatId::new(), ChatId::new());
        let (sub, _rx) = make_subscriber(8);
        let id = sub.id;
        broker.subscribe(chat_a, sub.clone()).await;
        broker.subscribe(chat_b, sub).await;

        broker.unsubscribe_all(id).await;
        assert_eq!(broker.topic_len(chat_a).await, 0);
        assert_eq!(broker.topic_len(chat_b).await, 0);
    }

    #[tokio::test]
    async fn frames_arrive_in_publish_order() {
        let broker = Broker::new();
        let chat = ChatId::new();
        let (sub, mut rx) = make_subscriber(16);
        broker.subscribe(chat, sub).await;

        for i in 0..5 {
            broker.publish(chat, &make_frame(chat, &format!("m{i}"))).await;
        }

        for i in 0..5 {
            let json = rx.recv().await.unwrap();
            assert!(json.contains(&format!("m{i}")), "out of order: {json}");
        }
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_others() {
        let broker = Broker::new();
        let chat = ChatId::new();
        let (slow, _slow_rx) = make_subscriber(1);
        let (fast, mut fast_rx) = make_subscriber(16);
        broker.subscribe(chat, slow).await;
        broker.subscribe(chat, fast).await;

        // Fill the slow subscriber's buffer, then keep publishing.
        for _ in 0..4 {
            broker.publish(chat, &make_frame(chat, "x")).await;
            while fast_rx.try_recv().is_ok() {}
        }

        let delivered = broker.publish(chat, &make_frame(chat, "still-flowing")).await;
        assert_eq!(delivered, 1);
        assert!(fast_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_past_threshold() {
        let broker = Broker::new();
        let chat = ChatId::new();
        let (slow, _slow_rx) = make_subscriber(1);
        broker.subscribe(chat, slow).await;

        // One publish fills the buffer, the rest are drops.
        for _ in 0..=(MAX_TOTAL_DROPS + 1) {
            broker.publish(chat, &make_frame(chat, "x")).await;
        }

        assert_eq!(broker.topic_len(chat).await, 0);
    }

    #[tokio::test]
    async fn published_json_is_shared_not_cloned() {
        let broker = Broker::new();
        let chat = ChatId::new();
        let (s1, mut rx1) = make_subscriber(8);
        let (s2, mut rx2) = make_subscriber(8);
        broker.subscribe(chat, s1).await;
        broker.subscribe(chat, s2).await;

        broker.publish(chat, &make_frame(chat, "shared")).await;

        let a = rx1.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
