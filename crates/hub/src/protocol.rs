//! Hub wire vocabulary.
//!
//! `HubCall` is what the client invokes on the hub, `HubEvent` is what the
//! hub pushes back. Both are serde-tagged so a transport can encode and decode
//! frames without knowing anything else about the session.

use chrono::{DateTime, Utc};
use parley_core::event::MessageStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A remote method invocation on the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum HubCall {
    RegisterUser {
        name: String,
    },
    SendPrivateMessage {
        recipient: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    UpdateMessageStatus {
        recipient: String,
        id: String,
        status: MessageStatus,
    },
    AddReaction {
        recipient: String,
        id: String,
        emoji: String,
    },
    RequestOnlineUsers,
    KeepAlive,
    SendGroupMessage {
        user: String,
        text: String,
    },
}

impl HubCall {
    pub fn method_name(&self) -> &'static str {
        match self {
            HubCall::RegisterUser { .. } => "registerUser",
            HubCall::SendPrivateMessage { .. } => "sendPrivateMessage",
            HubCall::UpdateMessageStatus { .. } => "updateMessageStatus",
            HubCall::AddReaction { .. } => "addReaction",
            HubCall::RequestOnlineUsers => "requestOnlineUsers",
            HubCall::KeepAlive => "keepAlive",
            HubCall::SendGroupMessage { .. } => "sendGroupMessage",
        }
    }
}

/// A server-pushed hub event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HubEvent {
    RosterSnapshot { users: Vec<String> },
    UserConnected { name: String },
    UserDisconnected { name: String },
    PrivateMessage(PrivateMessageFrame),
    MessageStatus { id: String, status: MessageStatus },
    Reaction { id: String, emoji: String },
    Error { message: String },
    GroupMessage { user: String, text: String },
}

/// The two shapes a private message arrives in.
///
/// Older hub builds omit the message id. Variant order matters for
/// deserialization: a frame carrying an id always decodes as `Identified`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrivateMessageFrame {
    Identified {
        sender: String,
        recipient: String,
        text: String,
        timestamp: DateTime<Utc>,
        id: String,
    },
    Legacy {
        sender: String,
        recipient: String,
        text: String,
        timestamp: DateTime<Utc>,
    },
}

impl PrivateMessageFrame {
    /// Normalise to a delivery with an id, generating one for legacy frames.
    pub fn into_delivery(self) -> PrivateDelivery {
        match self {
            PrivateMessageFrame::Identified {
                sender,
                recipient,
                text,
                timestamp,
                id,
            } => PrivateDelivery {
                id,
                sender,
                recipient,
                text,
                timestamp,
            },
            PrivateMessageFrame::Legacy {
                sender,
                recipient,
                text,
                timestamp,
            } => PrivateDelivery {
                id: Uuid::new_v4().to_string(),
                sender,
                recipient,
                text,
                timestamp,
            },
        }
    }
}

/// A private message with its id resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateDelivery {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Link lifecycle changes reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Reconnecting { reason: Option<String> },
    Reconnected,
    Closed { reason: Option<String> },
}

/// Everything a transport pushes toward the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubSignal {
    Event(HubEvent),
    Lifecycle(TransportEvent),
}

impl From<HubEvent> for HubSignal {
    fn from(event: HubEvent) -> Self {
        HubSignal::Event(event)
    }
}

impl From<TransportEvent> for HubSignal {
    fn from(event: TransportEvent) -> Self {
        HubSignal::Lifecycle(event)
    }
}
