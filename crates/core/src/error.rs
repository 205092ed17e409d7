use thiserror::Error;

/// The umbrella error type for the Parley synchronization layer.
#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

/// A specialized Result type for Parley operations.
pub type Result<T> = std::result::Result<T, ParleyError>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum EventBusError {
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Subscriber lagged: {0} events missed")]
    Lagged(u64),
}
