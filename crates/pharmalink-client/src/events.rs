use tokio::sync::broadcast;

use pharmalink_shared::constants::CHANNEL_CAPACITY;
use pharmalink_shared::{ConnectionState, Message, PharmacyId};

/// State changes published to the front-end.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Messages of the conversation with `counterparty` changed.
    ConversationUpdated { counterparty: PharmacyId },
    /// A message pushed over the socket was added to its conversation.
    MessageReceived(Message),
    PresenceChanged { pharmacy: PharmacyId, online: bool },
    /// A snapshot replaced the whole online set.
    PresenceSnapshot { online: usize },
    NotificationsChanged { unread: u64 },
    ConnectionStateChanged(ConnectionState),
    /// The server refused the credential; the user must log in again.
    AuthRequired,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ClientEvent) {
        // Fails only when nobody is subscribed.
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
