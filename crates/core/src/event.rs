use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Hierarchical channel name validation and parsing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Channel(String);

impl Channel {
    /// Create a new channel, validating its format.
    pub fn new(name: impl Into<String>) -> std::result::Result<Self, crate::error::EventBusError> {
        let name = name.into();
        if Self::is_valid(&name) {
            Ok(Self(name))
        } else {
            Err(crate::error::EventBusError::InvalidChannel(name))
        }
    }

    /// Check if a channel name is valid.
    pub fn is_valid(name: &str) -> bool {
        if name.is_empty() || name.starts_with('.') || name.ends_with('.') || name.contains("..") {
            return false;
        }

        // Must be lowercase and only contain a-z, 0-9, and dots
        if name
            .chars()
            .any(|c| !matches!(c, 'a'..='z' | '0'..='9' | '.'))
        {
            return false;
        }

        matches!(name.split('.').next(), Some("system" | "hub" | "ui"))
    }

    /// Get the domain of the channel.
    pub fn domain(&self) -> &str {
        self.0.split('.').next().unwrap_or("")
    }

    /// Get the full channel name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

/// The standard event envelope wrapping all events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Hierarchical channel name (e.g., "hub.message.received")
    pub channel: Channel,

    /// When the event was created (UTC)
    pub timestamp: DateTime<Utc>,

    /// Unique identifier for this event
    pub id: Uuid,

    /// Source component that emitted this event
    pub source: EventSource,

    /// The typed event payload
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a given channel and payload.
    pub fn new(channel: Channel, source: EventSource, payload: EventPayload) -> Self {
        Self {
            channel,
            timestamp: Utc::now(),
            id: Uuid::new_v4(),
            source,
            payload,
        }
    }

    /// Create an event on the payload's canonical channel.
    pub fn from_payload(
        source: EventSource,
        payload: EventPayload,
    ) -> std::result::Result<Self, crate::error::EventBusError> {
        let channel = Channel::new(payload.channel_name())?;
        Ok(Self::new(channel, source, payload))
    }
}

/// Identifies the source of an event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "camelCase")]
pub enum EventSource {
    /// Core system component
    System(String),
    /// Hub connection layer
    Hub,
    /// Client facade (commands issued by the UI or bot)
    Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum EventPayload {
    // ── System events ──────────────────────────────────────────────
    ConnectionChanged {
        connected: bool,
    },
    WakingUp {
        active: bool,
    },
    ErrorOccurred {
        component: String,
        message: String,
        recoverable: bool,
    },

    // ── Hub presence events ───────────────────────────────────────
    OnlineUsersChanged {
        users: Vec<String>,
    },
    UserConnected {
        name: String,
    },
    UserDisconnected {
        name: String,
    },

    // ── Hub message events ────────────────────────────────────────
    PrivateMessageReceived {
        message: ChatMessage,
    },
    MessageStatusChanged {
        id: String,
        status: MessageStatus,
    },
    ReactionAdded {
        id: String,
        emoji: String,
    },
    GroupMessageReceived {
        user: String,
        text: String,
    },
    HubError {
        message: String,
    },

    // ── UI events ────────────────────────────────────────────────
    UnreadChanged {
        total: u32,
    },
    Pulse {
        partner: String,
    },
}

impl EventPayload {
    /// The channel each payload is published on.
    pub fn channel_name(&self) -> &'static str {
        match self {
            EventPayload::ConnectionChanged { .. } => "system.connection.changed",
            EventPayload::WakingUp { .. } => "system.connection.waking",
            EventPayload::ErrorOccurred { .. } => "system.error.occurred",
            EventPayload::OnlineUsersChanged { .. } => "hub.presence.roster",
            EventPayload::UserConnected { .. } => "hub.presence.connected",
            EventPayload::UserDisconnected { .. } => "hub.presence.disconnected",
            EventPayload::PrivateMessageReceived { .. } => "hub.message.received",
            EventPayload::MessageStatusChanged { .. } => "hub.message.status",
            EventPayload::ReactionAdded { .. } => "hub.message.reaction",
            EventPayload::GroupMessageReceived { .. } => "hub.group.received",
            EventPayload::HubError { .. } => "hub.error.pushed",
            EventPayload::UnreadChanged { .. } => "ui.unread.changed",
            EventPayload::Pulse { .. } => "ui.attention.pulse",
        }
    }
}

/// A private message held in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned or locally generated unique message ID
    pub id: String,

    /// Display name of the sender
    pub sender: String,

    /// Display name of the recipient
    pub recipient: String,

    /// Plain-text message body
    pub text: String,

    /// When the message was sent (UTC)
    pub timestamp: DateTime<Utc>,

    /// Whether the local user is the sender
    pub is_me: bool,

    /// Delivery status
    pub status: MessageStatus,

    /// Emoji reactions attached to the message
    #[serde(default)]
    pub reactions: BTreeSet<String>,
}

/// Delivery status of a private message. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageStatus {
    Sent,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Read => "read",
        }
    }

    /// Move to `next` if it is ahead of the current status.
    pub fn advance(&mut self, next: MessageStatus) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

pub trait EventBus: Send + Sync + 'static {
    fn publish(&self, event: Event) -> std::result::Result<(), crate::error::EventBusError>;
    fn subscribe(
        &self,
        pattern: &str,
    ) -> std::result::Result<EventSubscription, crate::error::EventBusError>;
}

#[derive(Clone)]
pub struct BroadcastEventBus {
    system_sender: broadcast::Sender<Event>,
    hub_sender: broadcast::Sender<Event>,
    ui_sender: broadcast::Sender<Event>,
}

impl BroadcastEventBus {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

    pub fn new(channel_capacity: usize) -> Self {
        let capacity = channel_capacity.max(1);
        let (system_sender, _) = broadcast::channel(capacity);
        let (hub_sender, _) = broadcast::channel(capacity);
        let (ui_sender, _) = broadcast::channel(capacity);

        Self {
            system_sender,
            hub_sender,
            ui_sender,
        }
    }

    fn sender_for_domain(&self, domain: &str) -> Option<&broadcast::Sender<Event>> {
        match domain {
            "system" => Some(&self.system_sender),
            "hub" => Some(&self.hub_sender),
            "ui" => Some(&self.ui_sender),
            _ => None,
        }
    }

    fn receivers_for_pattern(
        &self,
        pattern: &str,
    ) -> std::result::Result<DomainReceivers, crate::error::EventBusError> {
        let first_segment = pattern.split('.').next().unwrap_or_default();

        if first_segment.is_empty() {
            return Err(crate::error::EventBusError::InvalidPattern(
                pattern.to_string(),
            ));
        }

        if has_glob_meta(first_segment) {
            return Ok(DomainReceivers {
                system: Some(self.system_sender.subscribe()),
                hub: Some(self.hub_sender.subscribe()),
                ui: Some(self.ui_sender.subscribe()),
            });
        }

        match first_segment {
            "system" => Ok(DomainReceivers {
                system: Some(self.system_sender.subscribe()),
                hub: None,
                ui: None,
            }),
            "hub" => Ok(DomainReceivers {
                system: None,
                hub: Some(self.hub_sender.subscribe()),
                ui: None,
            }),
            "ui" => Ok(DomainReceivers {
                system: None,
                hub: None,
                ui: Some(self.ui_sender.subscribe()),
            }),
            _ => Err(crate::error::EventBusError::InvalidPattern(
                pattern.to_string(),
            )),
        }
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: Event) -> std::result::Result<(), crate::error::EventBusError> {
        let sender = self
            .sender_for_domain(event.channel.domain())
            .ok_or_else(|| {
                crate::error::EventBusError::InvalidChannel(event.channel.to_string())
            })?;

        // No live subscribers is not an error.
        let _ = sender.send(event);
        Ok(())
    }

    fn subscribe(
        &self,
        pattern: &str,
    ) -> std::result::Result<EventSubscription, crate::error::EventBusError> {
        let matcher = Glob::new(pattern)
            .map_err(|_| crate::error::EventBusError::InvalidPattern(pattern.to_string()))?
            .compile_matcher();
        let receivers = self.receivers_for_pattern(pattern)?;

        Ok(EventSubscription { matcher, receivers })
    }
}

struct DomainReceivers {
    system: Option<broadcast::Receiver<Event>>,
    hub: Option<broadcast::Receiver<Event>>,
    ui: Option<broadcast::Receiver<Event>>,
}

pub struct EventSubscription {
    matcher: GlobMatcher,
    receivers: DomainReceivers,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> std::result::Result<Event, crate::error::EventBusError> {
        loop {
            let system_receiver = self.receivers.system.as_mut();
            let hub_receiver = self.receivers.hub.as_mut();
            let ui_receiver = self.receivers.ui.as_mut();

            let received = tokio::select! {
                result = recv_from_domain(system_receiver) => result,
                result = recv_from_domain(hub_receiver) => result,
                result = recv_from_domain(ui_receiver) => result,
            };

            match received {
                Ok(event) if self.matcher.is_match(event.channel.as_str()) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(crate::error::EventBusError::ChannelClosed);
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    return Err(crate::error::EventBusError::Lagged(count));
                }
            }
        }
    }
}

async fn recv_from_domain(
    receiver: Option<&mut broadcast::Receiver<Event>>,
) -> std::result::Result<Event, broadcast::error::RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

fn has_glob_meta(segment: &str) -> bool {
    segment.contains('*')
        || segment.contains('?')
        || segment.contains('[')
        || segment.contains(']')
        || segment.contains('{')
        || segment.contains('}')
        || segment.contains('!')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_validation() {
        assert!(Channel::is_valid("system.connection.changed"));
        assert!(Channel::is_valid("hub.message.received"));
        assert!(Channel::is_valid("ui.unread.changed"));

        assert!(!Channel::is_valid("chat.message.received"));
        assert!(!Channel::is_valid("system..double.dot"));
        assert!(!Channel::is_valid(".starts.with.dot"));
        assert!(!Channel::is_valid("ends.with.dot."));
        assert!(!Channel::is_valid("UpperCase"));
        assert!(!Channel::is_valid("with-hyphen"));
        assert!(!Channel::is_valid(""));
    }

    #[test]
    fn test_channel_domain() {
        let cases = [
            ("system.connection.changed", "system"),
            ("hub.presence.roster", "hub"),
            ("ui.attention.pulse", "ui"),
        ];
        for (name, expected) in cases {
            let c = Channel::new(name).unwrap();
            assert_eq!(c.domain(), expected, "domain of {name}");
        }
    }

    #[test]
    fn test_channel_new_rejects_invalid() {
        let result = Channel::new("bad.domain.event");
        assert!(matches!(
            result.unwrap_err(),
            crate::error::EventBusError::InvalidChannel(_)
        ));
    }

    #[test]
    fn every_payload_maps_to_a_valid_channel() {
        let payloads = vec![
            EventPayload::ConnectionChanged { connected: true },
            EventPayload::WakingUp { active: true },
            EventPayload::ErrorOccurred {
                component: "connection".into(),
                message: "boom".into(),
                recoverable: true,
            },
            EventPayload::OnlineUsersChanged { users: vec![] },
            EventPayload::UserConnected { name: "Sara".into() },
            EventPayload::UserDisconnected { name: "Sara".into() },
            EventPayload::MessageStatusChanged {
                id: "m1".into(),
                status: MessageStatus::Read,
            },
            EventPayload::ReactionAdded {
                id: "m1".into(),
                emoji: "👍".into(),
            },
            EventPayload::GroupMessageReceived {
                user: "Sara".into(),
                text: "hi all".into(),
            },
            EventPayload::HubError {
                message: "rejected".into(),
            },
            EventPayload::UnreadChanged { total: 1 },
            EventPayload::Pulse {
                partner: "Sara".into(),
            },
        ];

        for payload in payloads {
            let name = payload.channel_name();
            assert!(Channel::is_valid(name), "{name} should be a valid channel");
            assert!(Event::from_payload(EventSource::Hub, payload).is_ok());
        }
    }

    #[test]
    fn message_status_only_moves_forward() {
        let mut status = MessageStatus::Sent;
        assert!(status.advance(MessageStatus::Read));
        assert!(!status.advance(MessageStatus::Read));
        assert!(!status.advance(MessageStatus::Sent));
        assert_eq!(status, MessageStatus::Read);
    }

    #[test]
    fn test_event_unique_ids() {
        let e1 = Event::from_payload(EventSource::Hub, EventPayload::WakingUp { active: true })
            .unwrap();
        let e2 = Event::from_payload(EventSource::Hub, EventPayload::WakingUp { active: true })
            .unwrap();
        assert_ne!(e1.id, e2.id);
    }
}
