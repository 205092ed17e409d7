use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use parley_core::config::HubConfig;
use parley_core::event::{Event, EventBus, EventPayload, EventSource, MessageStatus};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::ConnectionError;
use crate::outbound::{OutboundQueue, PendingOutbound};
use crate::protocol::{HubCall, TransportEvent};
use crate::transport::HubTransport;
use crate::wake::WakeProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    WakingUp,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// What happened to a private message handed to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Queued,
}

pub struct ConnectionManager<T>
where
    T: HubTransport,
{
    transport: Arc<T>,
    config: HubConfig,
    state: watch::Sender<ConnectionState>,
    connect_lock: tokio::sync::Mutex<()>,
    disconnects: AtomicU64,
    outbound: OutboundQueue,
    registered_name: Mutex<Option<String>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    wake_probe: WakeProbe,
    event_bus: Option<Arc<dyn EventBus>>,
}

impl<T> ConnectionManager<T>
where
    T: HubTransport,
{
    pub fn new(config: HubConfig, transport: Arc<T>) -> Self {
        let wake_probe = WakeProbe::new(&config);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            config,
            state,
            connect_lock: tokio::sync::Mutex::new(()),
            disconnects: AtomicU64::new(0),
            outbound: OutboundQueue::new(),
            registered_name: Mutex::new(None),
            heartbeat: Mutex::new(None),
            wake_probe,
            event_bus: None,
        }
    }

    pub fn with_event_bus(
        config: HubConfig,
        transport: Arc<T>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        let mut manager = Self::new(config, transport);
        manager.event_bus = Some(event_bus);
        manager
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Wake the hub, perform one handshake and bring the session up.
    ///
    /// Concurrent callers are serialised. When already connected this only
    /// flushes the outbound queue. There is no retry on failure. A
    /// [`disconnect`](Self::disconnect) issued while the attempt is in flight
    /// wins: the attempt ends with [`ConnectionError::Closed`].
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let _guard = self.connect_lock.lock().await;
        let generation = self.disconnects.load(Ordering::SeqCst);

        if self.is_connected() {
            self.outbound.drain(self.transport.as_ref()).await;
            return Ok(());
        }

        self.set_state(ConnectionState::WakingUp);
        self.emit_event(EventPayload::WakingUp { active: true });
        self.wake_probe.poke().await;
        self.emit_event(EventPayload::WakingUp { active: false });

        self.set_state(ConnectionState::Connecting);
        let handshake_timeout = Duration::from_secs(self.config.handshake_timeout_seconds);
        let result = tokio::time::timeout(handshake_timeout, self.transport.handshake())
            .await
            .unwrap_or(Err(ConnectionError::Timeout));

        if self.disconnects.load(Ordering::SeqCst) != generation {
            info!(url = %self.config.url, "Disconnect requested during connect, dropping link");
            if result.is_ok() {
                let _ = self.transport.close().await;
            }
            self.set_state(ConnectionState::Disconnected);
            return Err(ConnectionError::Closed);
        }

        match result {
            Ok(()) => {
                info!(url = %self.config.url, "Connected to hub");
                self.on_link_up().await;
                Ok(())
            }
            Err(error) => {
                warn!(url = %self.config.url, error = %error, "Hub handshake failed");
                self.set_state(ConnectionState::Disconnected);
                self.emit_event(EventPayload::ConnectionChanged { connected: false });
                self.emit_connection_error(&error);
                Err(error)
            }
        }
    }

    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.stop_heartbeat();
        let closed = self.transport.close().await;
        let previous = self.set_state(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            info!("Disconnected from hub");
            self.emit_event(EventPayload::ConnectionChanged { connected: false });
        }
        closed
    }

    /// Apply a lifecycle change reported by the transport.
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Reconnecting { reason } => {
                let previous = self.state();
                if previous == ConnectionState::Disconnected {
                    return;
                }
                warn!(reason = ?reason, "Hub link lost, transport reconnecting");
                self.stop_heartbeat();
                self.set_state(ConnectionState::Reconnecting);
                if previous.is_connected() {
                    self.emit_event(EventPayload::ConnectionChanged { connected: false });
                }
            }
            TransportEvent::Reconnected => {
                let _guard = self.connect_lock.lock().await;
                if self.state() == ConnectionState::Disconnected {
                    debug!("Ignored transport reconnect after disconnect");
                    return;
                }
                info!("Hub link restored");
                self.on_link_up().await;
            }
            TransportEvent::Closed { reason } => {
                self.stop_heartbeat();
                let previous = self.set_state(ConnectionState::Disconnected);
                if previous != ConnectionState::Disconnected {
                    warn!(reason = ?reason, "Hub link closed");
                    self.emit_event(EventPayload::ConnectionChanged { connected: false });
                }
            }
        }
    }

    /// Remember `name` for registration and register now if connected.
    pub async fn register_identity(&self, name: &str) -> Result<(), ConnectionError> {
        *self.lock_registered_name() = Some(name.to_string());

        if !self.is_connected() {
            debug!(name = %name, "Deferred hub registration until connected");
            return Ok(());
        }
        self.transport
            .invoke(HubCall::RegisterUser {
                name: name.to_string(),
            })
            .await
    }

    pub fn registered_name(&self) -> Option<String> {
        self.lock_registered_name().clone()
    }

    /// Send a private message, parking it in the outbound queue when the hub
    /// is unreachable.
    ///
    /// While offline this also starts a background connect.
    pub async fn send_private_message(
        self: &Arc<Self>,
        recipient: &str,
        text: &str,
        id: Option<String>,
    ) -> SendOutcome {
        if !self.is_connected() {
            self.outbound
                .push(PendingOutbound::new(recipient, text).with_id(id));
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(error) = manager.connect().await {
                    warn!(error = %error, "Background connect for queued message failed");
                }
            });
            return SendOutcome::Queued;
        }

        let call = HubCall::SendPrivateMessage {
            recipient: recipient.to_string(),
            text: text.to_string(),
            id: id.clone(),
        };
        match self.transport.invoke(call).await {
            Ok(()) => SendOutcome::Sent,
            Err(error) => {
                warn!(recipient = %recipient, error = %error, "Send failed, queueing message");
                self.outbound
                    .push(PendingOutbound::new(recipient, text).with_id(id));
                SendOutcome::Queued
            }
        }
    }

    pub async fn request_online_users(&self) -> Result<(), ConnectionError> {
        self.invoke_connected(HubCall::RequestOnlineUsers).await
    }

    pub async fn update_message_status(
        &self,
        recipient: &str,
        id: &str,
        status: MessageStatus,
    ) -> Result<(), ConnectionError> {
        self.invoke_connected(HubCall::UpdateMessageStatus {
            recipient: recipient.to_string(),
            id: id.to_string(),
            status,
        })
        .await
    }

    pub async fn add_reaction(
        &self,
        recipient: &str,
        id: &str,
        emoji: &str,
    ) -> Result<(), ConnectionError> {
        self.invoke_connected(HubCall::AddReaction {
            recipient: recipient.to_string(),
            id: id.to_string(),
            emoji: emoji.to_string(),
        })
        .await
    }

    pub async fn send_group_message(&self, user: &str, text: &str) -> Result<(), ConnectionError> {
        self.invoke_connected(HubCall::SendGroupMessage {
            user: user.to_string(),
            text: text.to_string(),
        })
        .await
    }

    async fn invoke_connected(&self, call: HubCall) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            debug!(method = call.method_name(), "Dropped hub call while offline");
            return Err(ConnectionError::NotConnected);
        }
        self.transport.invoke(call).await
    }

    async fn on_link_up(&self) {
        self.set_state(ConnectionState::Connected);
        self.start_heartbeat();

        let registered = self.registered_name();
        if let Some(name) = registered {
            if let Err(error) = self.transport.invoke(HubCall::RegisterUser { name: name.clone() }).await {
                warn!(name = %name, error = %error, "Hub re-registration failed");
            }
        }

        self.outbound.drain(self.transport.as_ref()).await;
        self.emit_event(EventPayload::ConnectionChanged { connected: true });
    }

    fn start_heartbeat(&self) {
        let transport = Arc::clone(&self.transport);
        let state = self.state.subscribe();
        let period = Duration::from_secs(self.config.heartbeat_interval_seconds.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !state.borrow().is_connected() {
                    continue;
                }
                let transport = Arc::clone(&transport);
                tokio::spawn(async move {
                    if let Err(error) = transport.invoke(HubCall::KeepAlive).await {
                        debug!(error = %error, "Keep-alive failed");
                    }
                });
            }
        });

        if let Some(previous) = self.lock_heartbeat().replace(handle) {
            previous.abort();
        }
    }

    fn stop_heartbeat(&self) {
        if let Some(handle) = self.lock_heartbeat().take() {
            handle.abort();
        }
    }

    fn set_state(&self, next: ConnectionState) -> ConnectionState {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "Connection state changed");
        }
        previous
    }

    fn lock_heartbeat(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_registered_name(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.registered_name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_connection_error(&self, error: &ConnectionError) {
        self.emit_event(EventPayload::ErrorOccurred {
            component: "connection".to_string(),
            message: error.to_string(),
            recoverable: error.is_retryable(),
        });
    }

    fn emit_event(&self, payload: EventPayload) {
        let Some(event_bus) = &self.event_bus else {
            return;
        };

        let Ok(event) = Event::from_payload(EventSource::Hub, payload) else {
            return;
        };
        let _ = event_bus.publish(event);
    }
}

impl<T> Drop for ConnectionManager<T>
where
    T: HubTransport,
{
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}
