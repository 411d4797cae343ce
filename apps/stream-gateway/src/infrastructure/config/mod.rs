//! Configuration Module
//!
//! Configuration loading for the stream gateway.

mod settings;

pub use settings::{
    BrokerSettings, ConfigError, GatewayConfig, HistorySettings, ServerSettings, StreamSettings,
};
