//! Application Services
//!
//! - `PricePoller`: fixed-interval fetch and publish loop.

mod poller;

pub use poller::{PollSnapshot, PollStats, PollerSettings, PricePoller, ProducerError};
