//! Client facade for the Parley presence and private-messaging layer.
//!
//! [`HubClient`] owns the hub connection, the event bus and the session
//! state. Hub traffic and caller commands are funnelled through a bounded
//! channel into a single dispatcher task, which is the only writer of
//! session state; queries read a snapshot under a short read lock.

mod dispatch;
mod error;

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use parley_core::EventBusError;
use parley_core::config::Config;
use parley_core::event::{ChatMessage, Event, EventBus, MessageStatus};
use parley_core::identity::IdentityResolver;
use parley_core::event::BroadcastEventBus;
use parley_hub::{
    ConnectionManager, ConnectionState, HubSignalReceiver, HubTransport, PendingOutbound,
    PrivateDelivery, SendOutcome,
};
use parley_messaging::{MessageRouter, SessionState};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatch::{Command, Dispatcher};

pub use crate::error::ClientError;

pub struct HubClient<T>
where
    T: HubTransport,
{
    connection: Arc<ConnectionManager<T>>,
    event_bus: Arc<dyn EventBus>,
    state: Arc<RwLock<SessionState>>,
    commands: mpsc::Sender<Command>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<T> HubClient<T>
where
    T: HubTransport,
{
    /// Start with a fresh event bus sized by `config.event_bus`.
    pub fn from_config(config: &Config, transport: Arc<T>, inbound: HubSignalReceiver) -> Self {
        let event_bus: Arc<dyn EventBus> =
            Arc::new(BroadcastEventBus::new(config.event_bus.channel_capacity));
        Self::start(config, transport, inbound, event_bus)
    }

    /// Wire up the session and spawn the dispatcher and inbound pump.
    ///
    /// `inbound` is the receiving half of the channel the transport pushes
    /// hub signals into. Must be called from within a Tokio runtime.
    pub fn start(
        config: &Config,
        transport: Arc<T>,
        inbound: HubSignalReceiver,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        let identity = IdentityResolver::new(
            config.identity.display_name.as_deref(),
            config.identity.login_name.as_deref(),
        );
        let state = Arc::new(RwLock::new(SessionState::new(
            identity,
            config.history.max_messages_per_conversation,
        )));

        let connection = Arc::new(ConnectionManager::with_event_bus(
            config.hub.clone(),
            transport,
            Arc::clone(&event_bus),
        ));

        let (commands, receiver) = mpsc::channel(config.client.command_buffer.max(1));
        let dispatcher = Dispatcher::new(
            Arc::clone(&state),
            MessageRouter::new(Arc::clone(&event_bus)),
        );
        let dispatcher = tokio::spawn(dispatcher.run(receiver));
        let pump = tokio::spawn(dispatch::pump(
            inbound,
            commands.clone(),
            Arc::clone(&connection),
        ));

        info!(url = %config.hub.url, "Hub client started");

        Self {
            connection,
            event_bus,
            state,
            commands,
            dispatcher: Mutex::new(Some(dispatcher)),
            pump: Mutex::new(Some(pump)),
        }
    }

    pub fn event_bus(&self) -> &Arc<dyn EventBus> {
        &self.event_bus
    }

    pub fn connection(&self) -> &Arc<ConnectionManager<T>> {
        &self.connection
    }

    // ── Commands ────────────────────────────────────────────────────

    pub async fn connect(&self) -> Result<(), ClientError> {
        self.connection.connect().await.map_err(ClientError::from)
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.connection.disconnect().await.map_err(ClientError::from)
    }

    /// Register with the hub under `name` and treat it as a local alias.
    pub async fn register_identity(&self, name: &str) -> Result<(), ClientError> {
        self.request(|reply| Command::RecordHubName {
            name: name.to_string(),
            reply,
        })
        .await?;
        self.connection.register_identity(name).await?;
        Ok(())
    }

    pub async fn set_local_identity(
        &self,
        display_name: Option<&str>,
        login_name: Option<&str>,
    ) -> Result<(), ClientError> {
        self.request(|reply| Command::SetLocalIdentity {
            display_name: display_name.map(str::to_string),
            login_name: login_name.map(str::to_string),
            reply,
        })
        .await
    }

    /// Store the message in the recipient's conversation and send it.
    ///
    /// A v4 UUID is assigned when `id` is `None`. The hub echoes the same
    /// id back, so the echo is not stored a second time.
    pub async fn send_private_message(
        &self,
        recipient: &str,
        text: &str,
        id: Option<String>,
    ) -> Result<SendOutcome, ClientError> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let delivery = PrivateDelivery {
            id: id.clone(),
            sender: String::new(),
            recipient: recipient.to_string(),
            text: text.to_string(),
            timestamp: chrono::Utc::now(),
        };
        self.request(|reply| Command::RecordOutbound { delivery, reply })
            .await?;

        Ok(self
            .connection
            .send_private_message(recipient, text, Some(id))
            .await)
    }

    /// Clear unread state for `partner` and send read receipts.
    ///
    /// Receipts are only sent while connected. Returns how many messages
    /// were marked read.
    pub async fn mark_read(&self, partner: &str) -> Result<usize, ClientError> {
        let ids = self
            .request(|reply| Command::MarkRead {
                partner: partner.to_string(),
                reply,
            })
            .await?;

        if self.connection.is_connected() {
            for id in &ids {
                if let Err(error) = self
                    .connection
                    .update_message_status(partner, id, MessageStatus::Read)
                    .await
                {
                    debug!(partner = %partner, id = %id, error = %error, "Read receipt not sent");
                }
            }
        }
        Ok(ids.len())
    }

    /// React to a stored message and tell its partner.
    ///
    /// Unknown ids are ignored.
    pub async fn add_reaction(&self, id: &str, emoji: &str) -> Result<(), ClientError> {
        let partner = self
            .request(|reply| Command::React {
                id: id.to_string(),
                emoji: emoji.to_string(),
                reply,
            })
            .await?;

        let Some(partner) = partner else {
            debug!(id = %id, "Reaction for unknown message ignored");
            return Ok(());
        };
        self.connection.add_reaction(&partner, id, emoji).await?;
        Ok(())
    }

    pub async fn request_online_users(&self) -> Result<(), ClientError> {
        self.connection
            .request_online_users()
            .await
            .map_err(ClientError::from)
    }

    pub async fn send_group_message(&self, user: &str, text: &str) -> Result<(), ClientError> {
        self.connection
            .send_group_message(user, text)
            .await
            .map_err(ClientError::from)
    }

    /// Stop the dispatcher and pump and close the connection.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let _ = self.commands.send(Command::Shutdown).await;

        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dispatcher) = dispatcher {
            if let Err(error) = dispatcher.await {
                warn!(error = %error, "Dispatcher task ended abnormally");
            }
        }

        let pump = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(pump) = pump {
            pump.abort();
        }

        self.connection.disconnect().await?;
        info!("Hub client shut down");
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    pub fn is_self(&self, name: &str) -> bool {
        self.read_state().identity.is_self(name)
    }

    /// Messages exchanged with `partner`, oldest first.
    ///
    /// Opens an empty conversation if none exists yet.
    pub async fn conversation(&self, partner: &str) -> Result<Vec<ChatMessage>, ClientError> {
        self.request(|reply| Command::OpenConversation {
            partner: partner.to_string(),
            reply,
        })
        .await
    }

    pub fn partners(&self) -> Vec<String> {
        self.read_state().conversations.partners()
    }

    pub fn has_unread(&self, partner: &str) -> bool {
        self.read_state().unread.has_unread(partner)
    }

    pub fn total_unread(&self) -> u32 {
        self.read_state().unread.total()
    }

    pub fn online_users(&self) -> Vec<String> {
        self.read_state().online_users()
    }

    pub fn pending_outbound(&self) -> Vec<PendingOutbound> {
        self.connection.outbound().snapshot()
    }

    // ── Handlers ────────────────────────────────────────────────────

    /// Run `handler` for every event matching `pattern`.
    ///
    /// A panicking handler is logged and keeps receiving later events.
    pub fn spawn_handler<F>(&self, pattern: &str, handler: F) -> Result<JoinHandle<()>, ClientError>
    where
        F: Fn(&Event) + Send + 'static,
    {
        let mut subscription = self.event_bus.subscribe(pattern)?;
        let pattern = pattern.to_string();

        Ok(tokio::spawn(async move {
            loop {
                match subscription.recv().await {
                    Ok(event) => {
                        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
                        if outcome.is_err() {
                            error!(pattern = %pattern, channel = %event.channel, "Event handler panicked");
                        }
                    }
                    Err(EventBusError::Lagged(count)) => {
                        warn!(pattern = %pattern, count, "Event handler lagged, some events dropped");
                    }
                    Err(EventBusError::ChannelClosed) => {
                        debug!(pattern = %pattern, "Event bus closed, handler stopping");
                        return;
                    }
                    Err(error) => {
                        error!(pattern = %pattern, error = %error, "Event handler subscription error");
                        return;
                    }
                }
            }
        }))
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ClientError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ClientError::ChannelClosed)?;
        response.await.map_err(|_| ClientError::ChannelClosed)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for HubClient<T>
where
    T: HubTransport,
{
    fn drop(&mut self) {
        for task in [&self.dispatcher, &self.pump] {
            if let Some(handle) = task.lock().unwrap_or_else(PoisonError::into_inner).take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use chrono::Utc;
    use parley_core::config::HubConfig;
    use parley_core::event::{BroadcastEventBus, EventPayload, EventSubscription};
    use parley_hub::{HubCall, HubEvent, PrivateMessageFrame, TransportEvent};
    use parley_test_support::ScriptedTransport;

    fn test_config() -> Config {
        let mut hub = HubConfig::new("http://127.0.0.1:9/hubs/chat");
        hub.wake_probe = false;
        Config {
            hub,
            identity: Default::default(),
            history: Default::default(),
            client: Default::default(),
            logging: Default::default(),
            event_bus: Default::default(),
        }
    }

    fn start() -> (HubClient<ScriptedTransport>, Arc<ScriptedTransport>) {
        let (transport, inbound) = ScriptedTransport::new(32);
        let event_bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
        let client = HubClient::start(&test_config(), Arc::clone(&transport), inbound, event_bus);
        (client, transport)
    }

    async fn next_payload(sub: &mut EventSubscription) -> EventPayload {
        tokio::time::timeout(Duration::from_millis(200), sub.recv())
            .await
            .expect("timed out")
            .expect("recv failed")
            .payload
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn private_from(sender: &str, id: &str) -> HubEvent {
        HubEvent::PrivateMessage(PrivateMessageFrame::Identified {
            sender: sender.to_string(),
            recipient: "Ahmed".to_string(),
            text: "hello".to_string(),
            timestamp: Utc::now(),
            id: id.to_string(),
        })
    }

    #[tokio::test]
    async fn inbound_message_reaches_conversation_and_unread() {
        let (client, transport) = start();
        client.set_local_identity(Some("Ahmed"), None).await.unwrap();
        let mut sub = client.event_bus().subscribe("hub.message.received").unwrap();

        transport.push_event(private_from("Sara", "m1")).await;
        next_payload(&mut sub).await;

        assert_eq!(client.total_unread(), 1);
        assert!(client.has_unread("sara"));
        let messages = client.conversation("Sara").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].is_me);
    }

    #[tokio::test]
    async fn online_users_exclude_local_identity() {
        let (client, transport) = start();
        client.set_local_identity(Some("Ahmed"), None).await.unwrap();
        let mut sub = client.event_bus().subscribe("hub.presence.roster").unwrap();

        transport
            .push_event(HubEvent::RosterSnapshot {
                users: vec!["Ahmed".to_string(), "Sara".to_string()],
            })
            .await;
        next_payload(&mut sub).await;

        assert_eq!(client.online_users(), vec!["Sara".to_string()]);
        assert!(client.is_self("AHMED"));
    }

    #[tokio::test]
    async fn offline_sends_replay_after_connect() {
        let (client, transport) = start();

        for text in ["one", "two", "three"] {
            assert_eq!(
                client.send_private_message("Sara", text, None).await.unwrap(),
                SendOutcome::Queued
            );
        }
        client.connect().await.unwrap();
        settle().await;

        let texts: Vec<String> = transport
            .calls_named("sendPrivateMessage")
            .into_iter()
            .filter_map(|call| match call {
                HubCall::SendPrivateMessage { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert!(client.pending_outbound().is_empty());
    }

    #[tokio::test]
    async fn sent_message_is_stored_under_recipient() {
        let (client, transport) = start();
        client.set_local_identity(Some("Ahmed"), None).await.unwrap();
        client.connect().await.unwrap();
        let mut sub = client.event_bus().subscribe("hub.message.received").unwrap();

        assert_eq!(
            client
                .send_private_message("Sara", "hi", Some("local-1".to_string()))
                .await
                .unwrap(),
            SendOutcome::Sent
        );

        let stored = client.conversation("Sara").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, "local-1");
        assert!(stored[0].is_me);
        assert_eq!(stored[0].status, MessageStatus::Sent);
        assert_eq!(client.total_unread(), 0);
        assert_matches!(
            next_payload(&mut sub).await,
            EventPayload::PrivateMessageReceived { message } if message.id == "local-1"
        );
        assert_eq!(
            transport.calls_named("sendPrivateMessage"),
            vec![HubCall::SendPrivateMessage {
                recipient: "Sara".to_string(),
                text: "hi".to_string(),
                id: Some("local-1".to_string()),
            }]
        );

        transport
            .push_event(HubEvent::PrivateMessage(PrivateMessageFrame::Identified {
                sender: "Ahmed".to_string(),
                recipient: "Sara".to_string(),
                text: "hi".to_string(),
                timestamp: Utc::now(),
                id: "local-1".to_string(),
            }))
            .await;
        settle().await;
        assert_eq!(client.conversation("Sara").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn generated_id_is_shared_by_store_and_wire() {
        let (client, transport) = start();
        client.connect().await.unwrap();

        client.send_private_message("Sara", "hi", None).await.unwrap();

        let stored = client.conversation("Sara").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_matches!(
            transport.calls_named("sendPrivateMessage").as_slice(),
            [HubCall::SendPrivateMessage { id: Some(id), .. }] if *id == stored[0].id
        );
    }

    #[tokio::test]
    async fn from_config_sizes_bus_from_config() {
        let (transport, inbound) = ScriptedTransport::new(8);
        let mut config = test_config();
        config.event_bus.channel_capacity = 4;
        let client = HubClient::from_config(&config, Arc::clone(&transport), inbound);
        let mut sub = client.event_bus().subscribe("hub.presence.connected").unwrap();

        for name in ["A1", "B1", "C1", "D1", "E1", "F1"] {
            transport
                .push_event(HubEvent::UserConnected {
                    name: name.to_string(),
                })
                .await;
        }
        while client.online_users().len() < 6 {
            tokio::task::yield_now().await;
        }

        assert_matches!(
            tokio::time::timeout(Duration::from_millis(200), sub.recv())
                .await
                .unwrap(),
            Err(EventBusError::Lagged(_))
        );
    }

    #[tokio::test]
    async fn mark_read_sends_receipts_when_connected() {
        let (client, transport) = start();
        client.set_local_identity(Some("Ahmed"), None).await.unwrap();
        client.connect().await.unwrap();
        let mut sub = client.event_bus().subscribe("hub.message.received").unwrap();

        transport.push_event(private_from("Sara", "m1")).await;
        next_payload(&mut sub).await;

        assert_eq!(client.mark_read("Sara").await.unwrap(), 1);
        assert!(!client.has_unread("Sara"));
        assert_eq!(
            transport.calls_named("updateMessageStatus"),
            vec![HubCall::UpdateMessageStatus {
                recipient: "Sara".to_string(),
                id: "m1".to_string(),
                status: MessageStatus::Read,
            }]
        );
    }

    #[tokio::test]
    async fn reaction_is_sent_to_message_partner() {
        let (client, transport) = start();
        client.set_local_identity(Some("Ahmed"), None).await.unwrap();
        client.connect().await.unwrap();
        let mut sub = client.event_bus().subscribe("hub.message.received").unwrap();

        transport.push_event(private_from("Sara", "m1")).await;
        next_payload(&mut sub).await;

        client.add_reaction("m1", "👍").await.unwrap();
        client.add_reaction("unknown", "👍").await.unwrap();

        assert_eq!(
            transport.calls_named("addReaction"),
            vec![HubCall::AddReaction {
                recipient: "Sara".to_string(),
                id: "m1".to_string(),
                emoji: "👍".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn transport_reconnect_re_registers_identity() {
        let (client, transport) = start();
        client.connect().await.unwrap();
        client.register_identity("Ahmed").await.unwrap();
        assert!(client.is_self("ahmed"));
        transport.clear_calls();
        let mut sub = client
            .event_bus()
            .subscribe("system.connection.changed")
            .unwrap();

        transport
            .push_lifecycle(TransportEvent::Reconnecting { reason: None })
            .await;
        assert_matches!(
            next_payload(&mut sub).await,
            EventPayload::ConnectionChanged { connected: false }
        );
        transport.push_lifecycle(TransportEvent::Reconnected).await;
        assert_matches!(
            next_payload(&mut sub).await,
            EventPayload::ConnectionChanged { connected: true }
        );

        assert_eq!(
            transport.calls_named("registerUser"),
            vec![HubCall::RegisterUser {
                name: "Ahmed".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn panicking_handler_keeps_receiving() {
        let (client, transport) = start();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        client
            .spawn_handler("hub.presence.connected", move |event| {
                if let EventPayload::UserConnected { name } = &event.payload {
                    assert_ne!(name, "Boom", "handler blew up");
                    let _ = seen_tx.send(name.clone());
                }
            })
            .unwrap();

        for name in ["Boom", "Sara"] {
            transport
                .push_event(HubEvent::UserConnected {
                    name: name.to_string(),
                })
                .await;
        }

        let seen = tokio::time::timeout(Duration::from_millis(200), seen_rx.recv())
            .await
            .unwrap();
        assert_eq!(seen.as_deref(), Some("Sara"));
    }

    #[tokio::test]
    async fn commands_fail_after_shutdown() {
        let (client, transport) = start();
        client.connect().await.unwrap();

        client.shutdown().await.unwrap();

        assert!(!client.is_connected());
        assert_eq!(transport.close_count(), 1);
        assert_matches!(
            client.set_local_identity(Some("Ahmed"), None).await,
            Err(ClientError::ChannelClosed)
        );
    }

    #[tokio::test]
    async fn fire_and_forget_calls_surface_not_connected() {
        let (client, _transport) = start();
        assert_matches!(
            client.request_online_users().await,
            Err(ClientError::Connection(parley_hub::ConnectionError::NotConnected))
        );
        assert_matches!(
            client.send_group_message("Sara", "hi").await,
            Err(ClientError::Connection(_))
        );
    }
}
