//! Configuration Module
//!
//! Configuration loading for the price producer.

mod settings;

pub use settings::{BrokerSettings, ConfigError, ProducerConfig, UpstreamSettings};
