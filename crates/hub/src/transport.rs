use tokio::sync::mpsc;

use crate::error::ConnectionError;
use crate::protocol::{HubCall, HubSignal};

pub type HubSignalSender = mpsc::Sender<HubSignal>;
pub type HubSignalReceiver = mpsc::Receiver<HubSignal>;

/// Bounded channel a transport pushes inbound signals into.
pub fn signal_channel(buffer: usize) -> (HubSignalSender, HubSignalReceiver) {
    mpsc::channel(buffer.max(1))
}

/// Abstracted hub transport.
///
/// Implementations own the socket and the framing. They receive a
/// [`HubSignalSender`] at construction and push decoded hub events and link
/// lifecycle changes into it; the connection manager only drives the
/// outbound side through this trait.
pub trait HubTransport: Send + Sync + 'static {
    /// Open the link and complete the hub handshake.
    fn handshake(&self) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Invoke a hub method. Resolves once the call has been written.
    fn invoke(&self, call: HubCall) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), ConnectionError>> + Send;
}
