//! Stream Hub
//!
//! Owns the single broker subscription shared by every connected client.
//!
//! # Lifecycle
//!
//! - The first `open_stream` subscribes to the topic under the configured
//!   consumer group, starting at the tail, and spawns one feed task.
//! - Later connections join the running feed. Each records the topic's tail
//!   id as it joins, so readings the feed has not pumped yet but which were
//!   published before the client arrived are never sent to it.
//! - When the last connection leaves, the feed task is cancelled and the
//!   subscription is closed; the next connection establishes a fresh one.
//!
//! Establishment is serialized by one async guard, so concurrent connects
//! during setup produce exactly one broker subscription. The guard also holds
//! the previous feed task, which is awaited before a new subscription opens.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use price_bus::{
    BrokerError, BrokerMessage, MessageId, SharedBroker, StartPosition, Subscription,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::{CloseReason, ConnectionId, StreamLifecycle, StreamState};
use crate::domain::subscription::{ConnectionRegistry, EventPayload};
use crate::infrastructure::metrics::{self, SubscriptionOutcome};

// =============================================================================
// Configuration
// =============================================================================

/// Stream hub settings.
#[derive(Debug, Clone)]
pub struct StreamHubConfig {
    /// Topic carrying price readings.
    pub topic: String,
    /// Consumer group shared by all connections.
    pub group: String,
    /// Per-connection buffer, in events.
    pub client_buffer: usize,
}

impl Default for StreamHubConfig {
    fn default() -> Self {
        Self {
            topic: "price-updates".to_string(),
            group: "stock-group".to_string(),
            client_buffer: 256,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Stream gateway error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The broker subscription could not be established.
    #[error("broker subscription failed: {message}")]
    Subscribe {
        /// Error details.
        message: String,
    },

    /// The stream was closed by the gateway.
    #[error("stream closed: {}", reason.as_str())]
    Closed {
        /// Why the stream was closed.
        reason: CloseReason,
    },
}

// =============================================================================
// Feed State
// =============================================================================

/// State of the shared broker subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    /// No subscription, no clients.
    #[default]
    Idle,
    /// Subscription being set up.
    Establishing,
    /// Subscription live and pumping.
    Active,
    /// Last establishment or read failed.
    Failed,
}

impl FeedState {
    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Establishing => "establishing",
            Self::Active => "active",
            Self::Failed => "failed",
        }
    }
}

/// Point-in-time view of the hub for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct FeedSnapshot {
    /// Shared subscription state.
    pub state: FeedState,
    /// Connected clients.
    pub clients: usize,
    /// Readings fanned out since start.
    pub messages_forwarded: u64,
    /// Broker subscriptions opened since start.
    pub subscriptions_opened: u64,
    /// Clients closed for falling behind.
    pub clients_dropped: u64,
    /// Most recent feed error, cleared on successful establishment.
    pub last_error: Option<String>,
}

struct ActiveFeed {
    generation: u64,
    cancel: CancellationToken,
}

struct HubState {
    registry: ConnectionRegistry,
    feed: Option<ActiveFeed>,
    evicted: HashMap<ConnectionId, CloseReason>,
    feed_state: FeedState,
    last_error: Option<String>,
    messages_forwarded: u64,
    subscriptions_opened: u64,
}

struct Shared {
    broker: SharedBroker,
    config: StreamHubConfig,
    // Held across establishment; carries the most recent feed task.
    establish: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    state: Mutex<HubState>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

// =============================================================================
// Stream Hub
// =============================================================================

/// Fans one broker subscription out to many stream connections.
#[derive(Clone)]
pub struct StreamHub {
    shared: Arc<Shared>,
}

impl StreamHub {
    /// Create a hub. No broker call is made until the first connection.
    #[must_use]
    pub fn new(broker: SharedBroker, config: StreamHubConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                broker,
                config,
                establish: tokio::sync::Mutex::new(None),
                state: Mutex::new(HubState {
                    registry: ConnectionRegistry::new(),
                    feed: None,
                    evicted: HashMap::new(),
                    feed_state: FeedState::Idle,
                    last_error: None,
                    messages_forwarded: 0,
                    subscriptions_opened: 0,
                }),
                next_generation: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Open a client stream, establishing the shared subscription if needed.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Subscribe` if the broker subscription cannot be
    /// established, or `GatewayError::Closed` if the hub is shutting down.
    pub async fn open_stream(&self) -> Result<StreamConnection, GatewayError> {
        let id = uuid::Uuid::new_v4().as_u64_pair().0;
        let mut lifecycle = StreamLifecycle::new(id);
        transition(&mut lifecycle, StreamState::Connecting);

        let (tx, rx) = mpsc::channel(self.shared.config.client_buffer.max(1));

        let mut feed_task = self.shared.establish.lock().await;

        let watermark = if self.is_subscribed() {
            match self.shared.tail_watermark().await {
                Ok(watermark) => watermark,
                Err(e) => {
                    transition(&mut lifecycle, StreamState::Closed);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let tx = match self.shared.join_active_feed(id, tx, watermark) {
            Join::Joined => return Ok(self.connected(lifecycle, rx)),
            Join::ShuttingDown => {
                transition(&mut lifecycle, StreamState::Closed);
                return Err(GatewayError::Closed {
                    reason: CloseReason::Shutdown,
                });
            }
            Join::NoFeed(tx) => tx,
        };

        if let Some(previous) = feed_task.take()
            && let Err(e) = previous.await
        {
            tracing::warn!(error = %e, "Previous feed task ended abnormally");
        }

        let subscription = match self.shared.subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => {
                transition(&mut lifecycle, StreamState::Closed);
                return Err(e);
            }
        };

        let Some((generation, cancel)) = self.shared.activate_feed(id, tx) else {
            // Shutdown raced the subscribe; nothing was registered.
            let mut subscription = subscription;
            if let Err(e) = subscription.close().await {
                tracing::warn!(error = %e, "Failed to close broker subscription");
            }
            transition(&mut lifecycle, StreamState::Closed);
            return Err(GatewayError::Closed {
                reason: CloseReason::Shutdown,
            });
        };

        *feed_task = Some(tokio::spawn(run_feed(
            Arc::clone(&self.shared),
            subscription,
            generation,
            cancel,
        )));
        Ok(self.connected(lifecycle, rx))
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.shared.state.lock().registry.len()
    }

    /// Whether a broker subscription is currently held.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.shared.state.lock().feed.is_some()
    }

    /// Snapshot for health reporting.
    #[must_use]
    pub fn snapshot(&self) -> FeedSnapshot {
        let state = self.shared.state.lock();
        FeedSnapshot {
            state: state.feed_state,
            clients: state.registry.len(),
            messages_forwarded: state.messages_forwarded,
            subscriptions_opened: state.subscriptions_opened,
            clients_dropped: state.registry.stats().total_slow,
            last_error: state.last_error.clone(),
        }
    }

    /// Whether the underlying broker answers.
    ///
    /// # Errors
    ///
    /// Returns the broker error if the ping fails.
    pub async fn ping_broker(&self) -> Result<(), BrokerError> {
        self.shared.broker.ping().await
    }

    /// Stop accepting connections, end every open stream and close the
    /// subscription. Returns once the feed task has finished.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();

        {
            let mut state = self.shared.state.lock();
            let drained = state.registry.drain();
            if !drained.is_empty() {
                tracing::info!(clients = drained.len(), "Closing client streams for shutdown");
            }
            metrics::set_clients(0);
            Shared::retire_feed(&mut state);
        }

        let feed_task = self.shared.establish.lock().await.take();
        if let Some(task) = feed_task
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "Feed task ended abnormally during shutdown");
        }
    }

    fn connected(
        &self,
        mut lifecycle: StreamLifecycle,
        receiver: mpsc::Receiver<EventPayload>,
    ) -> StreamConnection {
        transition(&mut lifecycle, StreamState::Streaming);
        tracing::info!(
            connection_id = lifecycle.id(),
            clients = self.client_count(),
            "Stream client connected"
        );
        StreamConnection {
            lifecycle,
            receiver,
            shared: Arc::clone(&self.shared),
            finished: false,
        }
    }
}

enum Join {
    Joined,
    ShuttingDown,
    NoFeed(mpsc::Sender<EventPayload>),
}

impl Shared {
    fn join_active_feed(
        &self,
        id: ConnectionId,
        tx: mpsc::Sender<EventPayload>,
        watermark: Option<MessageId>,
    ) -> Join {
        let mut state = self.state.lock();
        if self.shutdown.is_cancelled() {
            return Join::ShuttingDown;
        }
        if state.feed.is_none() {
            return Join::NoFeed(tx);
        }
        state.registry.insert_after(id, tx, watermark);
        metrics::set_clients(state.registry.len());
        Join::Joined
    }

    async fn tail_watermark(&self) -> Result<Option<MessageId>, GatewayError> {
        let topic = self.config.topic.as_str();
        self.broker.tail_id(topic).await.map_err(|e| {
            tracing::warn!(topic, error = %e, "Failed to read topic tail for joining client");
            GatewayError::Subscribe {
                message: e.to_string(),
            }
        })
    }

    async fn subscribe(&self) -> Result<Box<dyn Subscription>, GatewayError> {
        self.state.lock().feed_state = FeedState::Establishing;

        let topic = self.config.topic.as_str();
        let group = self.config.group.as_str();

        match self
            .broker
            .subscribe(topic, group, StartPosition::Latest)
            .await
        {
            Ok(subscription) => {
                metrics::record_subscription(SubscriptionOutcome::Established);
                Ok(subscription)
            }
            Err(e) => {
                tracing::error!(topic, group, error = %e, "Failed to subscribe to price topic");
                metrics::record_subscription(SubscriptionOutcome::Failed);
                let mut state = self.state.lock();
                state.feed_state = FeedState::Failed;
                state.last_error = Some(e.to_string());
                Err(GatewayError::Subscribe {
                    message: e.to_string(),
                })
            }
        }
    }

    /// Install a new feed and register its first connection. Returns `None`
    /// once shutdown has begun.
    fn activate_feed(
        &self,
        id: ConnectionId,
        tx: mpsc::Sender<EventPayload>,
    ) -> Option<(u64, CancellationToken)> {
        let mut state = self.state.lock();
        if self.shutdown.is_cancelled() {
            state.feed_state = FeedState::Idle;
            return None;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = self.shutdown.child_token();

        state.feed = Some(ActiveFeed {
            generation,
            cancel: cancel.clone(),
        });
        state.feed_state = FeedState::Active;
        state.last_error = None;
        state.subscriptions_opened += 1;
        state.registry.insert(id, tx);
        metrics::set_clients(state.registry.len());

        tracing::info!(
            generation,
            topic = %self.config.topic,
            group = %self.config.group,
            "Broker subscription established"
        );
        Some((generation, cancel))
    }

    fn forward(&self, generation: u64, message: &BrokerMessage) {
        let payload = match render_event(message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(message_id = %message.id, error = %e, "Skipping undecodable message");
                return;
            }
        };

        let mut state = self.state.lock();
        if state.feed.as_ref().map(|f| f.generation) != Some(generation) {
            return;
        }

        let report = state.registry.fan_out(message.position().ok(), &payload);
        state.messages_forwarded += 1;
        metrics::record_messages_forwarded(report.delivered as u64);

        for id in &report.slow {
            tracing::warn!(connection_id = id, "Client buffer full, closing stream");
            state.evicted.insert(*id, CloseReason::SlowConsumer);
        }
        if !report.slow.is_empty() {
            metrics::record_clients_dropped(CloseReason::SlowConsumer, report.slow.len() as u64);
        }

        if !report.slow.is_empty() || !report.gone.is_empty() {
            metrics::set_clients(state.registry.len());
            if state.registry.is_empty() {
                Self::retire_feed(&mut state);
            }
        }
    }

    fn fail_feed(&self, generation: u64, error: &BrokerError) {
        let mut state = self.state.lock();
        if state.feed.as_ref().map(|f| f.generation) != Some(generation) {
            return;
        }

        tracing::error!(generation, error = %error, "Broker subscription failed, closing client streams");
        state.feed = None;
        state.feed_state = FeedState::Failed;
        state.last_error = Some(error.to_string());

        let drained = state.registry.drain();
        metrics::record_clients_dropped(CloseReason::FeedLost, drained.len() as u64);
        metrics::set_clients(0);
        for id in drained {
            state.evicted.insert(id, CloseReason::FeedLost);
        }
    }

    fn release(&self, id: ConnectionId) {
        let mut state = self.state.lock();
        state.evicted.remove(&id);
        if !state.registry.remove(id) {
            return;
        }

        let remaining = state.registry.len();
        metrics::set_clients(remaining);
        tracing::debug!(connection_id = id, clients = remaining, "Stream client disconnected");

        if remaining == 0 {
            Self::retire_feed(&mut state);
        }
    }

    fn take_eviction(&self, id: ConnectionId) -> Option<CloseReason> {
        self.state.lock().evicted.remove(&id)
    }

    fn retire_feed(state: &mut HubState) {
        if let Some(feed) = state.feed.take() {
            tracing::info!(generation = feed.generation, "Releasing broker subscription");
            feed.cancel.cancel();
            state.feed_state = FeedState::Idle;
        }
    }
}

/// Pump the shared subscription until cancelled or it fails.
async fn run_feed(
    shared: Arc<Shared>,
    mut subscription: Box<dyn Subscription>,
    generation: u64,
    cancel: CancellationToken,
) {
    tracing::debug!(generation, "Feed task started");

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = subscription.next() => next,
        };

        match next {
            Ok(message) => {
                shared.forward(generation, &message);
                if let Err(e) = subscription.ack(&message).await {
                    tracing::warn!(message_id = %message.id, error = %e, "Failed to acknowledge message");
                }
            }
            Err(e) => {
                shared.fail_feed(generation, &e);
                break;
            }
        }
    }

    if let Err(e) = subscription.close().await {
        tracing::warn!(generation, error = %e, "Failed to close broker subscription");
    }
    tracing::debug!(generation, "Feed task stopped");
}

fn render_event(message: &BrokerMessage) -> Result<EventPayload, BrokerError> {
    let reading = message.reading()?;
    let json = reading.to_json().map_err(|e| BrokerError::Decode {
        message: e.to_string(),
    })?;
    Ok(Arc::from(json))
}

fn transition(lifecycle: &mut StreamLifecycle, next: StreamState) {
    if let Err(e) = lifecycle.advance(next) {
        tracing::debug!(connection_id = lifecycle.id(), error = %e, "Ignoring stream transition");
    }
}

// =============================================================================
// Stream Connection
// =============================================================================

/// One client's view of the shared feed.
///
/// Yields serialized readings in broker order. Ends with
/// `Err(GatewayError::Closed)` if the gateway closes the stream for a
/// delivery error; ends cleanly on shutdown. Dropping it unregisters the
/// client immediately.
pub struct StreamConnection {
    lifecycle: StreamLifecycle,
    receiver: mpsc::Receiver<EventPayload>,
    shared: Arc<Shared>,
    finished: bool,
}

impl StreamConnection {
    /// Connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.lifecycle.id()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.lifecycle.state()
    }
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("id", &self.lifecycle.id())
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

impl Stream for StreamConnection {
    type Item = Result<EventPayload, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(payload)) => Poll::Ready(Some(Ok(payload))),
            Poll::Ready(None) => {
                this.finished = true;
                transition(&mut this.lifecycle, StreamState::Closed);

                let reason = this
                    .shared
                    .take_eviction(this.lifecycle.id())
                    .unwrap_or(CloseReason::Shutdown);
                tracing::debug!(connection_id = this.lifecycle.id(), reason = reason.as_str(), "Stream ended");

                match reason {
                    CloseReason::Shutdown => Poll::Ready(None),
                    reason => Poll::Ready(Some(Err(GatewayError::Closed { reason }))),
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        if !self.lifecycle.state().is_terminal() {
            transition(&mut self.lifecycle, StreamState::Closed);
        }
        self.shared.release(self.lifecycle.id());
    }
}

// =============================================================================
// Tests
// =============================================================================
