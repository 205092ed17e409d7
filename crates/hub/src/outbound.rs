//! Offline send buffer.
//!
//! Private messages written while the link is down are parked here and
//! replayed in order once the hub is reachable again. Delivery is
//! at-most-once: an item leaves the queue as soon as its send is attempted.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::protocol::HubCall;
use crate::transport::HubTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOutbound {
    pub recipient: String,
    pub text: String,
    pub id: Option<String>,
}

impl PendingOutbound {
    pub fn new(recipient: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            text: text.into(),
            id: None,
        }
    }

    /// Keep the client-assigned message id so the replay matches the
    /// locally stored copy.
    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    fn into_call(self) -> HubCall {
        HubCall::SendPrivateMessage {
            recipient: self.recipient,
            text: self.text,
            id: self.id,
        }
    }
}

#[derive(Debug, Default)]
pub struct OutboundQueue {
    pending: Mutex<VecDeque<PendingOutbound>>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: PendingOutbound) {
        let mut pending = self.lock();
        pending.push_back(item);
        debug!(pending = pending.len(), "Queued outbound message");
    }

    pub fn pop_front(&self) -> Option<PendingOutbound> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Pending items, oldest first.
    pub fn snapshot(&self) -> Vec<PendingOutbound> {
        self.lock().iter().cloned().collect()
    }

    /// Resend every queued item in FIFO order.
    ///
    /// Returns the number of items that were sent successfully. Failed items
    /// are logged and dropped.
    pub async fn drain<T: HubTransport>(&self, transport: &T) -> usize {
        let mut sent = 0;

        // Pop one at a time so the lock is never held across the send.
        while let Some(item) = self.pop_front() {
            let recipient = item.recipient.clone();
            match transport.invoke(item.into_call()).await {
                Ok(()) => sent += 1,
                Err(error) => {
                    warn!(recipient = %recipient, error = %error, "Dropped queued message after failed resend");
                }
            }
        }

        if sent > 0 {
            debug!(sent, "Drained outbound queue");
        }
        sent
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<PendingOutbound>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
