//! Session context: one authenticated pharmacy and its live components.
//!
//! The [`Session`] resolves the [`Actor`] once from the credential and hands
//! it explicitly to every component it builds. It owns the single
//! [`ConnectionManager`]; closing or dropping the session tears the socket
//! down and deregisters every handler.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{info, warn};

use pharmalink_net::{ConnectionManager, Dialer, PresenceStatus, PresenceTracker, RestApi};
use pharmalink_shared::identity;
use pharmalink_shared::{
    Actor, ClientError, ConnectionState, Counterparty, Credential, Message, Notification,
    NotificationId, PharmacyId, Room,
};

use crate::bridge::Bridge;
use crate::config::ClientConfig;
use crate::conversations::ConversationStore;
use crate::delivery::{DeliveryPipeline, ImageAttachment};
use crate::events::{ClientEvent, EventBus};
use crate::notifications::NotificationFeed;

pub struct Session<A: RestApi, D: Dialer> {
    actor: Actor,
    api: Arc<A>,
    connection: ConnectionManager<D>,
    presence: Arc<Mutex<PresenceTracker>>,
    store: Arc<ConversationStore>,
    feed: Arc<NotificationFeed>,
    pipeline: DeliveryPipeline<A>,
    bus: EventBus,
    selected: Mutex<Option<PharmacyId>>,
}

impl<A: RestApi, D: Dialer> Session<A, D> {
    /// Authenticate locally, connect the socket and load unread notifications.
    ///
    /// Fails only on an unusable credential. A notification bootstrap failure
    /// is published as [`ClientEvent::Error`] and the session stays usable.
    pub async fn open(
        config: &ClientConfig,
        credential: Credential,
        api: A,
        dialer: D,
    ) -> Result<Self, ClientError> {
        let actor = identity::resolve(&credential)?;
        info!(
            actor = %actor.id.short(),
            name = actor.display_name.as_deref().unwrap_or("-"),
            "Opening session"
        );

        let api = Arc::new(api);
        let bus = EventBus::new();
        let presence = Arc::new(Mutex::new(PresenceTracker::new()));
        let store = Arc::new(ConversationStore::new(actor.id.clone()));
        let feed = Arc::new(NotificationFeed::new(config.notification_display_limit));
        let pipeline = DeliveryPipeline::new(
            actor.id.clone(),
            api.clone(),
            store.clone(),
            config.optimistic_send,
        );

        let mut connection = ConnectionManager::new(dialer, config.connection());
        Arc::new(Bridge {
            actor: actor.id.clone(),
            presence: presence.clone(),
            store: store.clone(),
            feed: feed.clone(),
            bus: bus.clone(),
        })
        .install(&connection);
        connection.open(&actor.id, &actor.credential);

        let session = Self {
            actor,
            api,
            connection,
            presence,
            store,
            feed,
            pipeline,
            bus,
            selected: Mutex::new(None),
        };

        if let Err(e) = session.feed.bootstrap(&session.api, &session.actor.id).await {
            warn!(error = %e, "Could not load notifications");
            session.bus.emit(ClientEvent::Error(format!("Could not load notifications: {e}")));
        } else {
            session.bus.emit(ClientEvent::NotificationsChanged {
                unread: session.feed.unread_count(),
            });
        }

        Ok(session)
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.bus.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    fn presence(&self) -> MutexGuard<'_, PresenceTracker> {
        self.presence.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn selected(&self) -> MutexGuard<'_, Option<PharmacyId>> {
        self.selected.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All other pharmacies, with their live presence.
    pub async fn directory(&self) -> Result<Vec<Counterparty>, ClientError> {
        let mut pharmacies = self.api.list_pharmacies().await.map_err(|e| {
            self.bus.emit(ClientEvent::Error(format!("Could not load pharmacies: {e}")));
            e
        })?;
        pharmacies.retain(|p| p.id != self.actor.id);
        let presence = self.presence();
        for pharmacy in &mut pharmacies {
            pharmacy.online = presence.is_online(&pharmacy.id);
        }
        Ok(pharmacies)
    }

    /// Make `counterparty` the active conversation: join its room and load
    /// its history on first selection.
    pub async fn select(&self, counterparty: &PharmacyId) -> Result<Vec<Message>, ClientError> {
        *self.selected() = Some(counterparty.clone());
        self.connection.join(Room::Conversation(counterparty.clone()));

        if let Err(e) = self.store.ensure_history(&self.api, counterparty).await {
            self.bus.emit(ClientEvent::Error(format!("Failed to load chat history: {e}")));
            return Err(e.into());
        }
        self.bus.emit(ClientEvent::ConversationUpdated {
            counterparty: counterparty.clone(),
        });
        Ok(self.store.get(counterparty))
    }

    pub fn selected_counterparty(&self) -> Option<PharmacyId> {
        self.selected().clone()
    }

    /// Send to the selected counterparty.
    pub async fn send(
        &self,
        text: Option<&str>,
        image: Option<ImageAttachment>,
    ) -> Result<Message, ClientError> {
        let counterparty = self.selected_counterparty();
        match self
            .pipeline
            .send(&self.connection, counterparty.as_ref(), text, image)
            .await
        {
            Ok(message) => {
                self.bus.emit(ClientEvent::ConversationUpdated {
                    counterparty: message.counterparty_for(&self.actor.id).clone(),
                });
                Ok(message)
            }
            Err(e) => {
                self.bus.emit(ClientEvent::Error(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Returns whether the notification was removed from the feed.
    pub async fn acknowledge(&self, id: &NotificationId) -> Result<bool, ClientError> {
        match self.feed.acknowledge(&self.api, id).await {
            Ok(removed) => {
                if removed {
                    self.bus.emit(ClientEvent::NotificationsChanged {
                        unread: self.feed.unread_count(),
                    });
                }
                Ok(removed)
            }
            Err(e) => {
                self.bus.emit(ClientEvent::Error(format!("Failed to mark as read: {e}")));
                Err(e.into())
            }
        }
    }

    pub fn conversation(&self, counterparty: &PharmacyId) -> Vec<Message> {
        self.store.get(counterparty)
    }

    pub fn is_online(&self, pharmacy: &PharmacyId) -> bool {
        self.presence().is_online(pharmacy)
    }

    pub fn presence_status(&self, pharmacy: &PharmacyId) -> PresenceStatus {
        self.presence().status(pharmacy)
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.feed.visible()
    }

    pub fn unread_count(&self) -> u64 {
        self.feed.unread_count()
    }

    pub fn badge(&self) -> Option<String> {
        self.feed.badge()
    }

    pub fn close(&mut self) {
        self.connection.close();
        info!(actor = %self.actor.id.short(), "Session closed");
    }
}

impl<A: RestApi, D: Dialer> Drop for Session<A, D> {
    fn drop(&mut self) {
        self.connection.close();
    }
}
