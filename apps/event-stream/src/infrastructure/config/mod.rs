//! Configuration Module
//!
//! Environment-driven configuration for the event stream binary.

mod settings;

pub use settings::{
    ChannelSettings, ClientSettings, ConfigError, HeartbeatSettings, ReconnectSettings,
};
