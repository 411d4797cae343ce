//! Connection Registry
//!
//! Tracks every client currently attached to the shared broker subscription
//! and fans each serialized reading out to them.
//!
//! # Design
//!
//! The broker subscription is shared: one consumer-group read position serves
//! all connections. Each connection owns a bounded channel; fan-out uses
//! `try_send` so one stalled client never blocks the others. A connection whose
//! buffer is full is removed rather than silently skipping readings, so an
//! open connection never observes a gap.
//!
//! A connection that joins a running feed records the broker's tail id at
//! join time. Readings at or below that watermark were already in the topic
//! before the client arrived and are skipped for it.

use std::collections::HashMap;
use std::sync::Arc;

use price_bus::MessageId;
use tokio::sync::mpsc;

use crate::domain::streaming::ConnectionId;

/// Serialized reading shared between all connections.
pub type EventPayload = Arc<str>;

/// Outcome of delivering one reading to all registered connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Connections that accepted the reading.
    pub delivered: usize,
    /// Connections that joined after the reading was published.
    pub skipped: usize,
    /// Connections removed because their buffer was full.
    pub slow: Vec<ConnectionId>,
    /// Connections removed because the client had already gone.
    pub gone: Vec<ConnectionId>,
}

/// Lifetime counters for the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Currently registered connections.
    pub active: usize,
    /// Connections registered since start.
    pub total_registered: u64,
    /// Connections removed for falling behind.
    pub total_slow: u64,
}

#[derive(Debug)]
struct Member {
    sender: mpsc::Sender<EventPayload>,
    /// Newest message id that predates this connection.
    watermark: Option<MessageId>,
}

impl Member {
    fn joined_after(&self, position: Option<MessageId>) -> bool {
        matches!((self.watermark, position), (Some(mark), Some(pos)) if pos <= mark)
    }
}

/// Registry of live stream connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Member>,
    total_registered: u64,
    total_slow: u64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection that receives every reading from now on.
    pub fn insert(&mut self, id: ConnectionId, sender: mpsc::Sender<EventPayload>) {
        self.insert_after(id, sender, None);
    }

    /// Register a connection that only receives readings newer than
    /// `watermark`.
    pub fn insert_after(
        &mut self,
        id: ConnectionId,
        sender: mpsc::Sender<EventPayload>,
        watermark: Option<MessageId>,
    ) {
        self.connections.insert(id, Member { sender, watermark });
        self.total_registered += 1;
    }

    /// Unregister a connection. Returns whether it was registered.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        self.connections.remove(&id).is_some()
    }

    /// Whether a connection is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Deliver a payload to every registered connection.
    ///
    /// `position` is the reading's broker id. Connections whose watermark is
    /// at or beyond it are skipped; an unknown position reaches everyone.
    pub fn fan_out(
        &mut self,
        position: Option<MessageId>,
        payload: &EventPayload,
    ) -> FanOutReport {
        let mut report = FanOutReport::default();

        self.connections.retain(|&id, member| {
            if member.joined_after(position) {
                report.skipped += 1;
                return true;
            }
            member.watermark = None;

            match member.sender.try_send(Arc::clone(payload)) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    report.slow.push(id);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    report.gone.push(id);
                    false
                }
            }
        });

        self.total_slow += report.slow.len() as u64;
        report
    }

    /// Remove every connection, ending their streams once drained.
    pub fn drain(&mut self) -> Vec<ConnectionId> {
        self.connections.drain().map(|(id, _)| id).collect()
    }

    /// Snapshot of registry counters.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active: self.connections.len(),
            total_registered: self.total_registered,
            total_slow: self.total_slow,
        }
    }
}
