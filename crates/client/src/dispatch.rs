//! The single writer of session state.
//!
//! Every mutation of presence, conversations, unread counters and identity
//! aliases is posted here as a [`Command`] and applied in arrival order.

use std::sync::{Arc, PoisonError, RwLock};

use parley_core::event::ChatMessage;
use parley_hub::{
    ConnectionManager, HubEvent, HubSignal, HubSignalReceiver, HubTransport, PrivateDelivery,
};
use parley_messaging::{MessageRouter, SessionState};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub(crate) enum Command {
    Inbound(HubEvent),
    SetLocalIdentity {
        display_name: Option<String>,
        login_name: Option<String>,
        reply: oneshot::Sender<()>,
    },
    RecordOutbound {
        delivery: PrivateDelivery,
        reply: oneshot::Sender<bool>,
    },
    RecordHubName {
        name: String,
        reply: oneshot::Sender<()>,
    },
    OpenConversation {
        partner: String,
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    MarkRead {
        partner: String,
        reply: oneshot::Sender<Vec<String>>,
    },
    React {
        id: String,
        emoji: String,
        reply: oneshot::Sender<Option<String>>,
    },
    Shutdown,
}

pub(crate) struct Dispatcher {
    state: Arc<RwLock<SessionState>>,
    router: MessageRouter,
}

impl Dispatcher {
    pub(crate) fn new(state: Arc<RwLock<SessionState>>, router: MessageRouter) -> Self {
        Self { state, router }
    }

    pub(crate) async fn run(self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            if matches!(command, Command::Shutdown) {
                debug!("Dispatcher shutting down");
                break;
            }
            self.handle(command);
        }
    }

    fn handle(&self, command: Command) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        match command {
            Command::Inbound(event) => self.router.route(&mut state, event),
            Command::SetLocalIdentity {
                display_name,
                login_name,
                reply,
            } => {
                state
                    .identity
                    .set_local_names(display_name.as_deref(), login_name.as_deref());
                let _ = reply.send(());
            }
            Command::RecordOutbound { delivery, reply } => {
                let _ = reply.send(self.router.on_local_send(&mut state, delivery));
            }
            Command::RecordHubName { name, reply } => {
                state.identity.set_hub_name(&name);
                let _ = reply.send(());
            }
            Command::OpenConversation { partner, reply } => {
                let _ = reply.send(state.conversations.get(&partner));
            }
            Command::MarkRead { partner, reply } => {
                let _ = reply.send(self.router.mark_read(&mut state, &partner));
            }
            Command::React { id, emoji, reply } => {
                let _ = reply.send(self.router.react(&mut state, &id, &emoji));
            }
            Command::Shutdown => {}
        }
    }
}

/// Forward transport output: hub events go to the dispatcher, lifecycle
/// changes go straight to the connection.
pub(crate) async fn pump<T: HubTransport>(
    mut inbound: HubSignalReceiver,
    commands: mpsc::Sender<Command>,
    connection: Arc<ConnectionManager<T>>,
) {
    while let Some(signal) = inbound.recv().await {
        match signal {
            HubSignal::Event(event) => {
                if commands.send(Command::Inbound(event)).await.is_err() {
                    debug!("Dispatcher gone, inbound pump stopping");
                    return;
                }
            }
            HubSignal::Lifecycle(event) => connection.handle_transport_event(event).await,
        }
    }
    warn!("Transport closed its inbound channel");
}
