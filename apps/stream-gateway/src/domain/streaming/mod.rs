//! Stream Connection Lifecycle
//!
//! Per-client state machine for a server-sent event stream:
//!
//! ```text
//! Idle ──► Connecting ──► Streaming ──► Closed
//!              │                          ▲
//!              └──────────────────────────┘
//! ```
//!
//! `Connecting → Closed` happens when the broker subscription cannot be
//! established, `Streaming → Closed` on client disconnect or an unrecoverable
//! delivery error. `Closed` is terminal.

use std::fmt;

/// Unique identifier for a client stream connection.
pub type ConnectionId = u64;

/// Lifecycle state of one stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamState {
    /// Request accepted, nothing attempted yet.
    #[default]
    Idle,
    /// Waiting for the shared broker subscription.
    Connecting,
    /// Registered for fan-out and receiving readings.
    Streaming,
    /// Finished; no further transitions.
    Closed,
}

impl StreamState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Connecting)
                | (Self::Connecting, Self::Streaming | Self::Closed)
                | (Self::Streaming, Self::Closed)
        )
    }

    /// Whether this state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Lowercase state name for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stream connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client went away.
    ClientDisconnected,
    /// The broker subscription could not be established.
    SubscribeFailed,
    /// The connection could not keep up with the feed.
    SlowConsumer,
    /// The shared broker subscription failed while streaming.
    FeedLost,
    /// The gateway is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientDisconnected => "client_disconnected",
            Self::SubscribeFailed => "subscribe_failed",
            Self::SlowConsumer => "slow_consumer",
            Self::FeedLost => "feed_lost",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid stream transition {from} -> {to}")]
pub struct InvalidTransition {
    /// State before the attempted transition.
    pub from: StreamState,
    /// Requested state.
    pub to: StreamState,
}

/// Tracks the lifecycle of a single connection.
#[derive(Debug, Clone)]
pub struct StreamLifecycle {
    id: ConnectionId,
    state: StreamState,
}

impl StreamLifecycle {
    /// Start a lifecycle in `Idle`.
    #[must_use]
    pub const fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: StreamState::Idle,
        }
    }

    /// Connection this lifecycle belongs to.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` and leaves the state unchanged if the
    /// transition is not allowed.
    pub fn advance(&mut self, next: StreamState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(connection_id = self.id, from = %self.state, to = %next, "Stream state change");
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(StreamState::Idle, StreamState::Connecting, true)]
    #[test_case(StreamState::Connecting, StreamState::Streaming, true)]
    #[test_case(StreamState::Connecting, StreamState::Closed, true)]
    #[test_case(StreamState::Streaming, StreamState::Closed, true)]
    #[test_case(StreamState::Idle, StreamState::Streaming, false)]
    #[test_case(StreamState::Streaming, StreamState::Connecting, false)]
    #[test_case(StreamState::Closed, StreamState::Connecting, false)]
    #[test_case(StreamState::Closed, StreamState::Streaming, false)]
    fn transitions(from: StreamState, to: StreamState, allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut lifecycle = StreamLifecycle::new(7);
        assert_eq!(lifecycle.state(), StreamState::Idle);

        lifecycle.advance(StreamState::Connecting).unwrap();
        lifecycle.advance(StreamState::Streaming).unwrap();
        lifecycle.advance(StreamState::Closed).unwrap();

        assert!(lifecycle.state().is_terminal());
        assert_eq!(lifecycle.id(), 7);
    }

    #[test]
    fn closed_is_terminal() {
        let mut lifecycle = StreamLifecycle::new(1);
        lifecycle.advance(StreamState::Connecting).unwrap();
        lifecycle.advance(StreamState::Closed).unwrap();

        let err = lifecycle.advance(StreamState::Streaming).unwrap_err();
        assert_eq!(err.from, StreamState::Closed);
        assert_eq!(lifecycle.state(), StreamState::Closed);
    }

    #[test]
    fn close_reason_labels() {
        assert_eq!(CloseReason::ClientDisconnected.as_str(), "client_disconnected");
        assert_eq!(CloseReason::SlowConsumer.as_str(), "slow_consumer");
    }
}
