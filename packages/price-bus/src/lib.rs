#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening
    )
)]

//! Price Bus - Shared Broker Plumbing
//!
//! Everything the producer and the stream gateway agree on:
//!
//! - `reading`: the `PriceReading` wire type and its JSON codec
//! - `broker`: the publish/subscribe port (`Broker`, `Subscription`)
//! - `redis_streams`: Redis Streams adapter with consumer groups
//! - `memory`: in-process adapter with the same semantics
//! - `telemetry` (feature `telemetry`): tracing and OTLP setup for binaries
//!
//! # Data Flow
//!
//! ```text
//! Producer ──publish──► Topic (bounded log) ──subscribe(group, tail)──► Gateway
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Price reading wire type.
pub mod reading;

/// Broker port definitions.
pub mod broker;

/// Redis Streams broker adapter.
pub mod redis_streams;

/// In-process broker adapter.
pub mod memory;

/// Tracing subscriber and OTLP export setup.
#[cfg(feature = "telemetry")]
pub mod telemetry;

pub use broker::{
    Broker, BrokerError, BrokerMessage, MessageId, SharedBroker, StartPosition, Subscription, publish_reading,
};
pub use memory::MemoryBroker;
pub use reading::{CodecError, PriceReading};
pub use redis_streams::{RedisStreamBroker, RedisStreamSettings};
