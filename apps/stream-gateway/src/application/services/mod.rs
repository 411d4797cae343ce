//! Application Services
//!
//! - `StreamHub`: owns the shared broker subscription and the registry of
//!   connected clients.

mod stream_hub;

pub use stream_hub::{
    FeedSnapshot, FeedState, GatewayError, StreamConnection, StreamHub, StreamHubConfig,
};
