//! Broker Port (Driven Port)
//!
//! Interface for the ordered publish/subscribe transport between the
//! producer and the gateway. Adapters must provide:
//!
//! - per-topic ordering of published messages
//! - consumer groups with independent read offsets
//! - subscriptions that can start at the current tail of the topic
//!
//! Delivery is at-least-once: a message handed out by `next` and not yet
//! acknowledged may be delivered again after a reconnect.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::reading::{CodecError, PriceReading};

/// Where a new subscription starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Only messages published after the subscription is established.
    #[default]
    Latest,
    /// Everything still retained in the topic backlog.
    Earliest,
}

/// Ordered position of a message within a topic.
///
/// Parses both Redis stream ids (`<millis>-<seq>`) and plain integer offsets
/// (read as `<offset>-0`), so ids from one adapter compare consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MessageId {
    /// Major component (stream time or offset).
    pub major: u64,
    /// Sequence within `major`.
    pub minor: u64,
}

impl MessageId {
    /// Create an id from its components.
    #[must_use]
    pub const fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }
}

impl FromStr for MessageId {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BrokerError::Decode {
            message: format!("invalid message id: {s}"),
        };
        let (major, minor) = s.split_once('-').unwrap_or((s, "0"));
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.major, self.minor)
    }
}

/// A message read from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Broker-assigned message id, monotonic within a topic.
    pub id: String,
    /// Logical grouping key (the instrument symbol).
    pub key: Option<String>,
    /// Raw message value.
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    /// Decode the payload as a price reading.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Decode` if the payload is not a valid reading.
    pub fn reading(&self) -> Result<PriceReading, BrokerError> {
        PriceReading::decode(&self.payload).map_err(|e| BrokerError::Decode {
            message: e.to_string(),
        })
    }

    /// Parsed position of this message.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Decode` if the id is not a recognised format.
    pub fn position(&self) -> Result<MessageId, BrokerError> {
        self.id.parse()
    }
}

/// Broker operation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Broker unreachable or connection lost.
    #[error("broker connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },

    /// Publishing a message failed.
    #[error("broker publish failed: {message}")]
    Publish {
        /// Error details.
        message: String,
    },

    /// Establishing a subscription failed.
    #[error("broker subscribe failed: {message}")]
    Subscribe {
        /// Error details.
        message: String,
    },

    /// Reading from an established subscription failed.
    #[error("broker receive failed: {message}")]
    Receive {
        /// Error details.
        message: String,
    },

    /// Message payload could not be decoded.
    #[error("broker message decode failed: {message}")]
    Decode {
        /// Error details.
        message: String,
    },

    /// The subscription has been closed.
    #[error("subscription closed")]
    Closed,
}

impl From<CodecError> for BrokerError {
    fn from(err: CodecError) -> Self {
        Self::Publish {
            message: err.to_string(),
        }
    }
}

/// Port for the publish/subscribe broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Check that the broker is reachable.
    async fn ping(&self) -> Result<(), BrokerError>;

    /// Append a message to a topic. Returns the broker-assigned id.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8])
    -> Result<String, BrokerError>;

    /// Id of the newest message ever appended to a topic, `None` if the
    /// topic is empty or missing.
    async fn tail_id(&self, topic: &str) -> Result<Option<MessageId>, BrokerError>;

    /// Open a subscription on a topic within a consumer group.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        start: StartPosition,
    ) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// An open read position on a topic.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message.
    async fn next(&mut self) -> Result<BrokerMessage, BrokerError>;

    /// Acknowledge a delivered message, advancing the group offset.
    async fn ack(&mut self, message: &BrokerMessage) -> Result<(), BrokerError>;

    /// Release the subscription. Further calls to `next` return `Closed`.
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Shared broker reference.
pub type SharedBroker = Arc<dyn Broker>;

/// Encode a reading and publish it keyed by its symbol.
///
/// # Errors
///
/// Returns `BrokerError::Publish` if encoding or the publish itself fails.
pub async fn publish_reading(
    broker: &dyn Broker,
    topic: &str,
    reading: &PriceReading,
) -> Result<String, BrokerError> {
    let payload = reading.encode()?;
    broker.publish(topic, &reading.symbol, &payload).await
}
