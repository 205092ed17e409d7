use std::sync::Arc;

use parley_core::event::{ChatMessage, Event, EventBus, EventPayload, EventSource, MessageStatus};
use parley_core::identity::IdentityResolver;
use parley_hub::{HubEvent, PrivateDelivery};
use parley_presence::PresenceTracker;
use tracing::{debug, info, warn};

use crate::store::ConversationStore;
use crate::unread::UnreadIndex;

/// Everything the consumer loop owns for one session.
#[derive(Debug, Default)]
pub struct SessionState {
    pub identity: IdentityResolver,
    pub presence: PresenceTracker,
    pub conversations: ConversationStore,
    pub unread: UnreadIndex,
}

impl SessionState {
    pub fn new(identity: IdentityResolver, max_messages: usize) -> Self {
        Self {
            identity,
            presence: PresenceTracker::new(),
            conversations: ConversationStore::new(max_messages),
            unread: UnreadIndex::new(),
        }
    }

    pub fn online_users(&self) -> Vec<String> {
        self.presence.online_except_self(&self.identity)
    }
}

/// Applies hub events to session state and announces the results on the
/// event bus.
pub struct MessageRouter {
    event_bus: Arc<dyn EventBus>,
}

impl MessageRouter {
    pub fn new(event_bus: Arc<dyn EventBus>) -> Self {
        Self { event_bus }
    }

    pub fn route(&self, state: &mut SessionState, event: HubEvent) {
        match event {
            HubEvent::RosterSnapshot { users } => self.on_roster(state, users),
            HubEvent::UserConnected { name } => self.on_user_connected(state, &name),
            HubEvent::UserDisconnected { name } => self.on_user_disconnected(state, &name),
            HubEvent::PrivateMessage(frame) => {
                self.on_private_message(state, frame.into_delivery());
            }
            HubEvent::MessageStatus { id, status } => self.on_message_status(state, id, status),
            HubEvent::Reaction { id, emoji } => self.on_reaction(state, id, emoji),
            HubEvent::Error { message } => self.on_hub_error(message),
            HubEvent::GroupMessage { user, text } => self.on_group_message(user, text),
        }
    }

    /// File a private message under the partner's conversation.
    ///
    /// Returns `false` if the message id was already stored.
    pub fn on_private_message(&self, state: &mut SessionState, delivery: PrivateDelivery) -> bool {
        let (is_me, partner) = state
            .identity
            .partner_for(&delivery.sender, &delivery.recipient);
        let partner = partner.to_string();

        let message = ChatMessage {
            id: delivery.id,
            sender: delivery.sender,
            recipient: delivery.recipient,
            text: delivery.text,
            timestamp: delivery.timestamp,
            is_me,
            status: MessageStatus::Sent,
            reactions: Default::default(),
        };

        if !state.conversations.append(&partner, message.clone()) {
            if is_me {
                debug!(id = %message.id, partner = %partner, "Dropped echo of a message sent locally");
            } else {
                warn!(id = %message.id, partner = %partner, "Dropped private message with duplicate id");
            }
            return false;
        }
        debug!(id = %message.id, partner = %partner, is_me, "Private message stored");

        if !is_me {
            state.unread.increment(&partner);
            self.emit(EventPayload::UnreadChanged {
                total: state.unread.total(),
            });
            self.emit(EventPayload::Pulse {
                partner: partner.clone(),
            });
        }

        self.emit(EventPayload::PrivateMessageReceived { message });
        true
    }

    /// File a message the local user just sent under the recipient's
    /// conversation, ahead of the hub's echo.
    ///
    /// The echo carries the same id and is dropped when it arrives.
    pub fn on_local_send(&self, state: &mut SessionState, delivery: PrivateDelivery) -> bool {
        let partner = delivery.recipient.trim().to_string();
        let sender = state
            .identity
            .hub_name()
            .or(state.identity.display_name())
            .map(str::to_string)
            .unwrap_or(delivery.sender);

        let message = ChatMessage {
            id: delivery.id,
            sender,
            recipient: delivery.recipient,
            text: delivery.text,
            timestamp: delivery.timestamp,
            is_me: true,
            status: MessageStatus::Sent,
            reactions: Default::default(),
        };

        if !state.conversations.append(&partner, message.clone()) {
            warn!(id = %message.id, partner = %partner, "Local message id already stored");
            return false;
        }
        debug!(id = %message.id, partner = %partner, "Local message stored");
        self.emit(EventPayload::PrivateMessageReceived { message });
        true
    }

    pub fn on_roster(&self, state: &mut SessionState, users: Vec<String>) {
        let changed = state.presence.replace_roster(&users);
        debug!(count = users.len(), changed, "Roster snapshot received");
        self.publish_roster(state);
    }

    pub fn on_user_connected(&self, state: &mut SessionState, name: &str) {
        if state.identity.is_self(name) {
            return;
        }
        if state.presence.add(name) {
            debug!(name = %name, "User connected");
            self.emit(EventPayload::UserConnected {
                name: name.trim().to_string(),
            });
            self.publish_roster(state);
        }
    }

    pub fn on_user_disconnected(&self, state: &mut SessionState, name: &str) {
        if state.identity.is_self(name) {
            return;
        }
        if state.presence.remove(name) {
            debug!(name = %name, "User disconnected");
            self.emit(EventPayload::UserDisconnected {
                name: name.trim().to_string(),
            });
            self.publish_roster(state);
        }
    }

    /// Apply a status update pushed by the hub.
    ///
    /// Updates for ids this session does not hold are still announced so
    /// that consumers keeping their own copies stay in sync.
    pub fn on_message_status(&self, state: &mut SessionState, id: String, status: MessageStatus) {
        let known = state.conversations.find_by_id(&id).is_some();
        let changed = state.conversations.update_status(&id, status);
        if known && !changed {
            return;
        }
        debug!(id = %id, status = status.as_str(), known, "Message status changed");
        self.emit(EventPayload::MessageStatusChanged { id, status });
    }

    pub fn on_reaction(&self, state: &mut SessionState, id: String, emoji: String) {
        let known = state.conversations.find_by_id(&id).is_some();
        let added = state.conversations.add_reaction(&id, &emoji);
        if known && !added {
            return;
        }
        self.emit(EventPayload::ReactionAdded { id, emoji });
    }

    pub fn on_hub_error(&self, message: String) {
        warn!(message = %message, "Hub reported an error");
        self.emit(EventPayload::HubError { message });
    }

    pub fn on_group_message(&self, user: String, text: String) {
        self.emit(EventPayload::GroupMessageReceived { user, text });
    }

    /// Clear the partner's unread count and mark their messages read.
    ///
    /// Returns the ids that moved to `Read`, for read receipts.
    pub fn mark_read(&self, state: &mut SessionState, partner: &str) -> Vec<String> {
        let cleared = state.unread.clear(partner);
        let marked = state.conversations.mark_read_inbound(partner);

        for id in &marked {
            self.emit(EventPayload::MessageStatusChanged {
                id: id.clone(),
                status: MessageStatus::Read,
            });
        }
        if cleared > 0 {
            info!(partner = %partner, cleared, "Conversation read");
            self.emit(EventPayload::UnreadChanged {
                total: state.unread.total(),
            });
        }
        marked
    }

    /// Record a reaction made locally.
    ///
    /// Returns the partner the reaction must be sent to, or `None` if the
    /// message is not held.
    pub fn react(&self, state: &mut SessionState, id: &str, emoji: &str) -> Option<String> {
        let partner = state.conversations.partner_of(id)?.to_string();
        if state.conversations.add_reaction(id, emoji) {
            self.emit(EventPayload::ReactionAdded {
                id: id.to_string(),
                emoji: emoji.to_string(),
            });
        }
        Some(partner)
    }

    fn publish_roster(&self, state: &SessionState) {
        self.emit(EventPayload::OnlineUsersChanged {
            users: state.online_users(),
        });
    }

    fn emit(&self, payload: EventPayload) {
        let event = match Event::from_payload(EventSource::Hub, payload) {
            Ok(event) => event,
            Err(error) => {
                warn!(error = %error, "Failed to build event");
                return;
            }
        };
        if let Err(error) = self.event_bus.publish(event) {
            debug!(error = %error, "Event not published");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};
    use parley_core::event::{BroadcastEventBus, EventSubscription};
    use parley_hub::PrivateMessageFrame;

    fn setup(local: &str) -> (MessageRouter, SessionState, Arc<dyn EventBus>) {
        let event_bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
        let router = MessageRouter::new(event_bus.clone());
        let state = SessionState::new(IdentityResolver::new(Some(local), None), 50);
        (router, state, event_bus)
    }

    fn delivery(id: &str, sender: &str, recipient: &str) -> PrivateDelivery {
        PrivateDelivery {
            id: id.to_string(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            text: "hello".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        }
    }

    async fn next_payload(sub: &mut EventSubscription) -> EventPayload {
        tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .expect("recv failed")
            .payload
    }

    async fn assert_quiet(sub: &mut EventSubscription) {
        assert!(
            tokio::time::timeout(Duration::from_millis(50), sub.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn own_echo_is_filed_under_recipient() {
        let (router, mut state, bus) = setup("Ahmed");
        let mut ui = bus.subscribe("ui.**").unwrap();

        assert!(router.on_private_message(&mut state, delivery("m1", "Ahmed", "Sara")));

        let stored = state.conversations.messages("Sara");
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_me);
        assert!(state.conversations.messages("Ahmed").is_empty());
        assert_eq!(state.unread.total(), 0);
        assert_quiet(&mut ui).await;
    }

    #[tokio::test]
    async fn local_send_is_stored_and_echo_dropped() {
        let (router, mut state, bus) = setup("Ahmed");
        let mut hub = bus.subscribe("hub.**").unwrap();

        assert!(router.on_local_send(&mut state, delivery("local-1", "", "Sara")));

        let stored = state.conversations.messages("Sara");
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_me);
        assert_eq!(stored[0].sender, "Ahmed");
        assert_eq!(stored[0].status, MessageStatus::Sent);
        assert_eq!(state.unread.total(), 0);
        assert_matches!(
            next_payload(&mut hub).await,
            EventPayload::PrivateMessageReceived { message } if message.id == "local-1"
        );

        assert!(!router.on_private_message(&mut state, delivery("local-1", "Ahmed", "Sara")));
        assert_eq!(state.conversations.messages("Sara").len(), 1);
        assert_quiet(&mut hub).await;
    }

    #[tokio::test]
    async fn inbound_message_counts_unread_and_pulses() {
        let (router, mut state, bus) = setup("Ahmed");
        let mut ui = bus.subscribe("ui.**").unwrap();
        let mut hub = bus.subscribe("hub.message.*").unwrap();

        router.on_private_message(&mut state, delivery("m1", "Sara", "Ahmed"));

        assert_matches!(next_payload(&mut ui).await, EventPayload::UnreadChanged { total: 1 });
        assert_matches!(
            next_payload(&mut ui).await,
            EventPayload::Pulse { partner } if partner == "Sara"
        );
        assert_matches!(
            next_payload(&mut hub).await,
            EventPayload::PrivateMessageReceived { message } if message.id == "m1" && !message.is_me
        );
    }

    #[tokio::test]
    async fn unread_totals_across_senders() {
        let (router, mut state, _bus) = setup("Ahmed");
        let senders = ["Sara", "Mona", "Sara", "Omar", "Mona", "Sara"];
        for (i, sender) in senders.iter().enumerate() {
            router.on_private_message(&mut state, delivery(&format!("m{i}"), sender, "Ahmed"));
        }

        assert_eq!(state.unread.total(), 6);
        for sender in ["Sara", "Mona", "Omar"] {
            assert!(state.unread.has_unread(sender));
        }
        assert_eq!(state.unread.count("Sara"), 3);
    }

    #[tokio::test]
    async fn duplicate_id_is_dropped_without_events() {
        let (router, mut state, bus) = setup("Ahmed");
        router.on_private_message(&mut state, delivery("m1", "Sara", "Ahmed"));
        let mut all = bus.subscribe("{hub,ui}.**").unwrap();

        assert!(!router.on_private_message(&mut state, delivery("m1", "Sara", "Ahmed")));

        assert_eq!(state.conversations.messages("Sara").len(), 1);
        assert_eq!(state.unread.total(), 1);
        assert_quiet(&mut all).await;
    }

    #[tokio::test]
    async fn same_delivery_in_both_shapes_is_stored_twice() {
        let (router, mut state, _bus) = setup("Ahmed");
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        router.route(
            &mut state,
            HubEvent::PrivateMessage(PrivateMessageFrame::Identified {
                sender: "Sara".to_string(),
                recipient: "Ahmed".to_string(),
                text: "hi".to_string(),
                timestamp,
                id: "m1".to_string(),
            }),
        );
        router.route(
            &mut state,
            HubEvent::PrivateMessage(PrivateMessageFrame::Legacy {
                sender: "Sara".to_string(),
                recipient: "Ahmed".to_string(),
                text: "hi".to_string(),
                timestamp,
            }),
        );

        let stored = state.conversations.messages("Sara");
        assert_eq!(stored.len(), 2);
        assert_ne!(stored[0].id, stored[1].id);
    }

    #[tokio::test]
    async fn roster_filters_self_and_is_stable() {
        let (router, mut state, bus) = setup("Ahmed");
        let mut sub = bus.subscribe("hub.presence.roster").unwrap();
        let users = vec!["Ahmed".to_string(), "Sara".to_string()];

        router.route(&mut state, HubEvent::RosterSnapshot { users: users.clone() });
        router.route(&mut state, HubEvent::RosterSnapshot { users });

        assert_eq!(state.online_users(), vec!["Sara".to_string()]);
        assert_eq!(state.presence.len(), 2);
        for _ in 0..2 {
            assert_matches!(
                next_payload(&mut sub).await,
                EventPayload::OnlineUsersChanged { users } if users == vec!["Sara".to_string()]
            );
        }
    }

    #[tokio::test]
    async fn connect_and_disconnect_update_roster() {
        let (router, mut state, bus) = setup("Ahmed");
        let mut sub = bus.subscribe("hub.presence.*").unwrap();

        router.on_user_connected(&mut state, "Sara");
        router.on_user_connected(&mut state, "sara");
        router.on_user_connected(&mut state, "Ahmed");

        assert_matches!(next_payload(&mut sub).await, EventPayload::UserConnected { name } if name == "Sara");
        assert_matches!(next_payload(&mut sub).await, EventPayload::OnlineUsersChanged { users } if users == vec!["Sara".to_string()]);
        assert_quiet(&mut sub).await;

        router.on_user_disconnected(&mut state, "SARA");
        assert_matches!(next_payload(&mut sub).await, EventPayload::UserDisconnected { name } if name == "SARA");
        assert_matches!(next_payload(&mut sub).await, EventPayload::OnlineUsersChanged { users } if users.is_empty());
    }

    #[tokio::test]
    async fn status_updates_announce_changes_and_unknown_ids() {
        let (router, mut state, bus) = setup("Ahmed");
        router.on_private_message(&mut state, delivery("m1", "Ahmed", "Sara"));
        let mut sub = bus.subscribe("hub.message.status").unwrap();

        router.on_message_status(&mut state, "m1".to_string(), MessageStatus::Read);
        router.on_message_status(&mut state, "m1".to_string(), MessageStatus::Read);
        router.on_message_status(&mut state, "elsewhere".to_string(), MessageStatus::Read);

        assert_matches!(next_payload(&mut sub).await, EventPayload::MessageStatusChanged { id, .. } if id == "m1");
        assert_matches!(next_payload(&mut sub).await, EventPayload::MessageStatusChanged { id, .. } if id == "elsewhere");
        assert_quiet(&mut sub).await;
        assert_eq!(
            state.conversations.find_by_id("m1").map(|m| m.status),
            Some(MessageStatus::Read)
        );
    }

    #[tokio::test]
    async fn mark_read_clears_unread_and_returns_receipt_ids() {
        let (router, mut state, bus) = setup("Ahmed");
        router.on_private_message(&mut state, delivery("m1", "Sara", "Ahmed"));
        router.on_private_message(&mut state, delivery("m2", "Ahmed", "Sara"));
        router.on_private_message(&mut state, delivery("m3", "Sara", "Ahmed"));
        router.on_private_message(&mut state, delivery("m4", "Mona", "Ahmed"));
        let mut ui = bus.subscribe("ui.unread.changed").unwrap();

        let ids = router.mark_read(&mut state, "sara");

        assert_eq!(ids, vec!["m1".to_string(), "m3".to_string()]);
        assert!(!state.unread.has_unread("Sara"));
        assert_eq!(state.unread.total(), 1);
        assert_matches!(next_payload(&mut ui).await, EventPayload::UnreadChanged { total: 1 });
    }

    #[tokio::test]
    async fn local_reaction_resolves_partner() {
        let (router, mut state, _bus) = setup("Ahmed");
        router.on_private_message(&mut state, delivery("m1", "Sara", "Ahmed"));

        assert_eq!(router.react(&mut state, "m1", "👍"), Some("Sara".to_string()));
        assert_eq!(router.react(&mut state, "missing", "👍"), None);
        assert!(
            state
                .conversations
                .find_by_id("m1")
                .is_some_and(|m| m.reactions.contains("👍"))
        );
    }

    #[tokio::test]
    async fn hub_error_and_group_message_are_forwarded() {
        let (router, mut state, bus) = setup("Ahmed");
        let mut sub = bus.subscribe("hub.{error,group}.*").unwrap();

        router.route(
            &mut state,
            HubEvent::Error {
                message: "rate limited".to_string(),
            },
        );
        router.route(
            &mut state,
            HubEvent::GroupMessage {
                user: "Sara".to_string(),
                text: "hi all".to_string(),
            },
        );

        assert_matches!(next_payload(&mut sub).await, EventPayload::HubError { message } if message == "rate limited");
        assert_matches!(next_payload(&mut sub).await, EventPayload::GroupMessageReceived { user, .. } if user == "Sara");
    }
}
