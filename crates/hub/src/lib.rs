pub mod connection;
pub mod error;
pub mod outbound;
pub mod protocol;
pub mod transport;
pub mod wake;

pub use connection::{ConnectionManager, ConnectionState, SendOutcome};
pub use error::ConnectionError;
pub use outbound::{OutboundQueue, PendingOutbound};
pub use protocol::{
    HubCall, HubEvent, HubSignal, PrivateDelivery, PrivateMessageFrame, TransportEvent,
};
pub use transport::{HubSignalReceiver, HubSignalSender, HubTransport, signal_channel};
pub use wake::WakeProbe;
