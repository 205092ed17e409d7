use parley_core::EventBusError;
use parley_hub::ConnectionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client has shut down")]
    ChannelClosed,

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("event bus error: {0}")]
    EventBus(#[from] EventBusError),
}
