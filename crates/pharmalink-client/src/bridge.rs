use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use pharmalink_net::{ConnectionManager, Dialer, Lifecycle, PresenceTracker};
use pharmalink_shared::protocol::{EventKind, InboundEvent};
use pharmalink_shared::{ConnectionState, Message, PharmacyId};

use crate::conversations::ConversationStore;
use crate::events::{ClientEvent, EventBus};
use crate::notifications::NotificationFeed;

/// Routes inbound socket events into the session's components and
/// publishes the resulting state changes on the event bus.
pub(crate) struct Bridge {
    pub actor: PharmacyId,
    pub presence: Arc<Mutex<PresenceTracker>>,
    pub store: Arc<ConversationStore>,
    pub feed: Arc<NotificationFeed>,
    pub bus: EventBus,
}

impl Bridge {
    /// Bind one handler per event kind plus the lifecycle observer.
    pub fn install<D: Dialer>(self: Arc<Self>, connection: &ConnectionManager<D>) {
        for kind in EventKind::ALL {
            let bridge = self.clone();
            if connection.on(kind, move |event| bridge.handle(event)).is_some() {
                debug!(kind = ?kind, "Replaced existing handler");
            }
        }
        let bridge = self;
        connection.on_lifecycle(move |signal| bridge.handle_lifecycle(signal));
        info!("Inbound event bridge installed");
    }

    fn presence(&self) -> MutexGuard<'_, PresenceTracker> {
        self.presence.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn handle(&self, event: &InboundEvent) {
        match event {
            InboundEvent::Message(wire) => {
                let message = Message::from(wire.clone());
                if !message.has_content() {
                    warn!(id = %message.key, "Dropping message without content");
                    return;
                }
                if message.sender != self.actor && message.receiver != self.actor {
                    debug!(id = %message.key, "Dropping message for another pharmacy");
                    return;
                }
                if self.store.append(message.clone()) {
                    self.bus.emit(ClientEvent::MessageReceived(message));
                }
            }

            InboundEvent::PharmacyOnline(id) => {
                if id == &self.actor {
                    return;
                }
                if self.presence().on_online(id.clone()) {
                    self.bus.emit(ClientEvent::PresenceChanged {
                        pharmacy: id.clone(),
                        online: true,
                    });
                }
            }

            InboundEvent::PharmacyOffline(id) => {
                if self.presence().on_offline(id) {
                    self.bus.emit(ClientEvent::PresenceChanged {
                        pharmacy: id.clone(),
                        online: false,
                    });
                }
            }

            InboundEvent::OnlineSnapshot(ids) => {
                let (changes, online) = {
                    let mut presence = self.presence();
                    let others = ids.iter().filter(|id| *id != &self.actor).cloned();
                    let changes = presence.apply_snapshot(others);
                    (changes, presence.online_count())
                };
                for (pharmacy, online) in changes {
                    self.bus.emit(ClientEvent::PresenceChanged { pharmacy, online });
                }
                self.bus.emit(ClientEvent::PresenceSnapshot { online });
            }

            InboundEvent::NewRequest(notification)
            | InboundEvent::StatusUpdate(notification)
            | InboundEvent::NewMedicine(notification) => {
                if self.feed.on_push(notification.clone()) {
                    info!(kind = ?notification.kind, "Notification received");
                    self.bus.emit(ClientEvent::NotificationsChanged {
                        unread: self.feed.unread_count(),
                    });
                }
            }
        }
    }

    pub fn handle_lifecycle(&self, signal: &Lifecycle) {
        match signal {
            Lifecycle::State(state) => {
                if *state == ConnectionState::Disconnected {
                    self.presence().mark_stale();
                }
                self.bus.emit(ClientEvent::ConnectionStateChanged(*state));
            }
            Lifecycle::AuthRejected(e) => {
                warn!(error = %e, "Credential rejected by the socket server");
                self.bus.emit(ClientEvent::AuthRequired);
            }
        }
    }
}
