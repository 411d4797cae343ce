//! In-Process Broker
//!
//! A broker adapter that keeps topics in memory. It honours the same
//! contract as the Redis adapter (ordering, bounded backlog, per-group
//! offsets, tail-start subscriptions) and adds hooks for tests:
//!
//! - `set_available(false)` makes every broker operation fail
//! - `set_subscribe_delay` stretches subscription setup to expose races
//! - `sever_subscriptions` breaks every live subscription
//! - `active_subscriptions` / `subscribe_calls` count handles

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::broker::{
    Broker, BrokerError, BrokerMessage, MessageId, StartPosition, Subscription,
};

/// Default number of messages retained per topic.
pub const DEFAULT_BACKLOG_CAPACITY: usize = 1_000;

#[derive(Debug)]
struct StoredMessage {
    offset: u64,
    key: String,
    payload: Vec<u8>,
}

#[derive(Debug)]
struct Topic {
    log: VecDeque<StoredMessage>,
    next_offset: u64,
    groups: HashMap<String, u64>,
    head_tx: watch::Sender<u64>,
}

impl Topic {
    fn new() -> Self {
        Self {
            log: VecDeque::new(),
            next_offset: 0,
            groups: HashMap::new(),
            head_tx: watch::channel(0).0,
        }
    }

    fn oldest_offset(&self) -> u64 {
        self.log.front().map_or(self.next_offset, |m| m.offset)
    }

    fn message_at(&self, offset: u64) -> Option<&StoredMessage> {
        let index = offset.checked_sub(self.oldest_offset())?;
        self.log.get(usize::try_from(index).ok()?)
    }
}

#[derive(Debug)]
struct Shared {
    topics: Mutex<HashMap<String, Topic>>,
    available: AtomicBool,
    generation: AtomicU64,
    active_subscriptions: AtomicUsize,
    subscribe_calls: AtomicUsize,
    subscribe_delay: Mutex<Option<Duration>>,
    capacity: usize,
}

impl Shared {
    fn wake_all(&self) {
        for topic in self.topics.lock().values() {
            topic.head_tx.send_modify(|_| {});
        }
    }
}

/// In-memory broker.
///
/// Cloning yields another handle to the same topics.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Create a broker with the default backlog capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BACKLOG_CAPACITY)
    }

    /// Create a broker retaining at most `capacity` messages per topic.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                topics: Mutex::new(HashMap::new()),
                available: AtomicBool::new(true),
                generation: AtomicU64::new(0),
                active_subscriptions: AtomicUsize::new(0),
                subscribe_calls: AtomicUsize::new(0),
                subscribe_delay: Mutex::new(None),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Toggle reachability for `ping`, `publish` and `subscribe`.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Delay every subscription setup by `delay`.
    pub fn set_subscribe_delay(&self, delay: Option<Duration>) {
        *self.shared.subscribe_delay.lock() = delay;
    }

    /// Break every live subscription; their next `next` call fails.
    pub fn sever_subscriptions(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.wake_all();
    }

    /// Number of subscriptions not yet closed or dropped.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.shared.active_subscriptions.load(Ordering::SeqCst)
    }

    /// Number of successful `subscribe` calls.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.shared.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Messages currently retained in a topic, oldest first.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<BrokerMessage> {
        self.shared
            .topics
            .lock()
            .get(topic)
            .map(|t| t.log.iter().map(to_message).collect())
            .unwrap_or_default()
    }

    /// Total number of messages ever published to a topic.
    #[must_use]
    pub fn published_count(&self, topic: &str) -> u64 {
        self.shared
            .topics
            .lock()
            .get(topic)
            .map_or(0, |t| t.next_offset)
    }

    /// Committed offset of a consumer group (next offset to deliver).
    #[must_use]
    pub fn committed_offset(&self, topic: &str, group: &str) -> Option<u64> {
        self.shared
            .topics
            .lock()
            .get(topic)
            .and_then(|t| t.groups.get(group).copied())
    }

    fn ensure_available(&self, make_err: impl FnOnce(String) -> BrokerError) -> Result<(), BrokerError> {
        if self.shared.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(make_err("broker unavailable".to_string()))
        }
    }
}

fn to_message(stored: &StoredMessage) -> BrokerMessage {
    BrokerMessage {
        id: stored.offset.to_string(),
        key: Some(stored.key.clone()),
        payload: stored.payload.clone(),
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        self.ensure_available(|message| BrokerError::Connection { message })
    }

    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<String, BrokerError> {
        self.ensure_available(|message| BrokerError::Publish { message })?;

        let mut topics = self.shared.topics.lock();
        let topic = topics.entry(topic.to_string()).or_insert_with(Topic::new);

        let offset = topic.next_offset;
        topic.log.push_back(StoredMessage {
            offset,
            key: key.to_string(),
            payload: payload.to_vec(),
        });
        while topic.log.len() > self.shared.capacity {
            topic.log.pop_front();
        }
        topic.next_offset += 1;
        topic.head_tx.send_replace(topic.next_offset);

        Ok(offset.to_string())
    }

    async fn tail_id(&self, topic: &str) -> Result<Option<MessageId>, BrokerError> {
        self.ensure_available(|message| BrokerError::Connection { message })?;

        Ok(self
            .shared
            .topics
            .lock()
            .get(topic)
            .and_then(|t| t.next_offset.checked_sub(1))
            .map(|offset| MessageId::new(offset, 0)))
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        start: StartPosition,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        self.ensure_available(|message| BrokerError::Subscribe { message })?;

        let delay = *self.shared.subscribe_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            self.ensure_available(|message| BrokerError::Subscribe { message })?;
        }

        let (cursor, head_rx) = {
            let mut topics = self.shared.topics.lock();
            let entry = topics.entry(topic.to_string()).or_insert_with(Topic::new);
            let cursor = match start {
                StartPosition::Latest => entry.next_offset,
                StartPosition::Earliest => entry.oldest_offset(),
            };
            entry.groups.insert(group.to_string(), cursor);
            (cursor, entry.head_tx.subscribe())
        };

        self.shared.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.shared
            .active_subscriptions
            .fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemorySubscription {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            group: group.to_string(),
            cursor,
            head_rx,
            generation: self.shared.generation.load(Ordering::SeqCst),
            released: false,
        }))
    }
}

/// Subscription handle returned by [`MemoryBroker`].
#[derive(Debug)]
pub struct MemorySubscription {
    shared: Arc<Shared>,
    topic: String,
    group: String,
    cursor: u64,
    head_rx: watch::Receiver<u64>,
    generation: u64,
    released: bool,
}

impl MemorySubscription {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.shared
                .active_subscriptions
                .fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn poll_log(&mut self) -> Option<BrokerMessage> {
        let topics = self.shared.topics.lock();
        let topic = topics.get(&self.topic)?;

        // Messages trimmed from the backlog before we read them are skipped.
        self.cursor = self.cursor.max(topic.oldest_offset());

        let message = topic.message_at(self.cursor).map(to_message)?;
        self.cursor += 1;
        Some(message)
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<BrokerMessage, BrokerError> {
        loop {
            if self.released {
                return Err(BrokerError::Closed);
            }
            if self.shared.generation.load(Ordering::SeqCst) != self.generation {
                return Err(BrokerError::Receive {
                    message: "connection reset".to_string(),
                });
            }

            self.head_rx.borrow_and_update();
            if let Some(message) = self.poll_log() {
                return Ok(message);
            }

            if self.head_rx.changed().await.is_err() {
                return Err(BrokerError::Closed);
            }
        }
    }

    async fn ack(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let offset: u64 = message.id.parse().map_err(|_| BrokerError::Decode {
            message: format!("invalid message id: {}", message.id),
        })?;

        let mut topics = self.shared.topics.lock();
        if let Some(topic) = topics.get_mut(&self.topic) {
            let committed = topic.groups.entry(self.group.clone()).or_insert(0);
            *committed = (*committed).max(offset + 1);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.release();
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::broker::publish_reading;
    use crate::reading::PriceReading;

    const TOPIC: &str = "price-updates";
    const GROUP: &str = "stock-group";

    async fn next_reading(sub: &mut Box<dyn Subscription>) -> PriceReading {
        timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("timed out waiting for message")
            .unwrap()
            .reading()
            .unwrap()
    }

    #[tokio::test]
    async fn latest_start_skips_backlog() {
        let broker = MemoryBroker::new();
        publish_reading(&broker, TOPIC, &PriceReading::new("X", 1.0, 1))
            .await
            .unwrap();

        let mut sub = broker
            .subscribe(TOPIC, GROUP, StartPosition::Latest)
            .await
            .unwrap();
        publish_reading(&broker, TOPIC, &PriceReading::new("X", 2.0, 2))
            .await
            .unwrap();

        assert_eq!(next_reading(&mut sub).await.timestamp, 2);
    }

    #[tokio::test]
    async fn tail_id_tracks_newest_message() {
        let broker = MemoryBroker::with_capacity(2);
        assert_eq!(broker.tail_id(TOPIC).await.unwrap(), None);

        for ts in 1..=3 {
            publish_reading(&broker, TOPIC, &PriceReading::new("X", 1.0, ts))
                .await
                .unwrap();
        }

        let tail = broker.tail_id(TOPIC).await.unwrap().unwrap();
        assert_eq!(tail, MessageId::new(2, 0));
        let newest = broker.messages(TOPIC).pop().unwrap();
        assert_eq!(newest.position().unwrap(), tail);
    }

    #[tokio::test]
    async fn tail_id_fails_when_unavailable() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        assert!(matches!(
            broker.tail_id(TOPIC).await,
            Err(BrokerError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn earliest_start_replays_backlog_in_order() {
        let broker = MemoryBroker::new();
        for ts in 1..=3 {
            publish_reading(&broker, TOPIC, &PriceReading::new("X", 1.0, ts))
                .await
                .unwrap();
        }

        let mut sub = broker
            .subscribe(TOPIC, GROUP, StartPosition::Earliest)
            .await
            .unwrap();

        for ts in 1..=3 {
            assert_eq!(next_reading(&mut sub).await.timestamp, ts);
        }
    }

    #[tokio::test]
    async fn backlog_is_bounded() {
        let broker = MemoryBroker::with_capacity(2);
        for ts in 1..=5 {
            publish_reading(&broker, TOPIC, &PriceReading::new("X", 1.0, ts))
                .await
                .unwrap();
        }

        assert_eq!(broker.messages(TOPIC).len(), 2);
        assert_eq!(broker.published_count(TOPIC), 5);

        let mut sub = broker
            .subscribe(TOPIC, GROUP, StartPosition::Earliest)
            .await
            .unwrap();
        assert_eq!(next_reading(&mut sub).await.timestamp, 4);
    }

    #[tokio::test]
    async fn next_waits_for_publish() {
        let broker = MemoryBroker::new();
        let mut sub = broker
            .subscribe(TOPIC, GROUP, StartPosition::Latest)
            .await
            .unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publish_reading(&publisher, TOPIC, &PriceReading::new("X", 3.0, 3))
                .await
                .unwrap();
        });

        assert_eq!(next_reading(&mut sub).await.price, 3.0);
    }

    #[tokio::test]
    async fn ack_commits_group_offset() {
        let broker = MemoryBroker::new();
        let mut sub = broker
            .subscribe(TOPIC, GROUP, StartPosition::Latest)
            .await
            .unwrap();
        assert_eq!(broker.committed_offset(TOPIC, GROUP), Some(0));

        publish_reading(&broker, TOPIC, &PriceReading::new("X", 1.0, 1))
            .await
            .unwrap();
        let message = sub.next().await.unwrap();
        sub.ack(&message).await.unwrap();

        assert_eq!(broker.committed_offset(TOPIC, GROUP), Some(1));
    }

    #[tokio::test]
    async fn close_and_drop_release_handles() {
        let broker = MemoryBroker::new();
        let mut first = broker
            .subscribe(TOPIC, GROUP, StartPosition::Latest)
            .await
            .unwrap();
        let second = broker
            .subscribe(TOPIC, GROUP, StartPosition::Latest)
            .await
            .unwrap();
        assert_eq!(broker.active_subscriptions(), 2);

        first.close().await.unwrap();
        assert_eq!(broker.active_subscriptions(), 1);
        assert_eq!(first.next().await, Err(BrokerError::Closed));

        drop(second);
        assert_eq!(broker.active_subscriptions(), 0);
        assert_eq!(broker.subscribe_calls(), 2);
    }

    #[tokio::test]
    async fn unavailable_broker_rejects_operations() {
        let broker = MemoryBroker::new();
        broker.set_available(false);

        assert!(matches!(
            broker.ping().await,
            Err(BrokerError::Connection { .. })
        ));
        assert!(matches!(
            broker.publish(TOPIC, "X", b"{}").await,
            Err(BrokerError::Publish { .. })
        ));
        assert!(matches!(
            broker.subscribe(TOPIC, GROUP, StartPosition::Latest).await,
            Err(BrokerError::Subscribe { .. })
        ));
        assert_eq!(broker.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn severed_subscription_fails_pending_receive() {
        let broker = MemoryBroker::new();
        let mut sub = broker
            .subscribe(TOPIC, GROUP, StartPosition::Latest)
            .await
            .unwrap();

        let severer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            severer.sever_subscriptions();
        });

        let result = timeout(Duration::from_secs(1), sub.next()).await.unwrap();
        assert!(matches!(result, Err(BrokerError::Receive { .. })));
    }
}
