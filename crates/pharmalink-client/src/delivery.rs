//! Outbound chat messages: validate, submit over REST, then relay.
//!
//! The REST service is the source of truth. Only a message it has accepted
//! is appended to the conversation and re-broadcast on the socket; a failed
//! submit leaves no trace and is not retried.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pharmalink_net::{ConnectionManager, Dialer, RestApi};
use pharmalink_shared::constants::MAX_IMAGE_SIZE;
use pharmalink_shared::protocol::OutboundEvent;
use pharmalink_shared::{
    Message, MessageKey, OutgoingMessage, PharmacyId, SendError, ValidationError,
};

use crate::conversations::ConversationStore;

/// An image picked by the user, before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ImageAttachment {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    /// `data:<mime>;base64,<payload>`, the form the chat service stores.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

/// Checked input of one send.
#[derive(Debug, PartialEq)]
struct Draft {
    counterparty: PharmacyId,
    text: String,
    image: Option<ImageAttachment>,
}

fn validate(
    counterparty: Option<&PharmacyId>,
    text: Option<&str>,
    image: Option<ImageAttachment>,
) -> Result<Draft, ValidationError> {
    let counterparty = counterparty
        .filter(|id| !id.is_empty())
        .ok_or(ValidationError::NoCounterparty)?;
    let text = text.map(str::trim).unwrap_or_default().to_string();
    let image = image.filter(|i| !i.bytes.is_empty());

    if text.is_empty() && image.is_none() {
        return Err(ValidationError::EmptyMessage);
    }
    if let Some(image) = &image {
        if image.bytes.len() > MAX_IMAGE_SIZE {
            return Err(ValidationError::ImageTooLarge {
                size: image.bytes.len(),
                max: MAX_IMAGE_SIZE,
            });
        }
    }

    Ok(Draft {
        counterparty: counterparty.clone(),
        text,
        image,
    })
}

pub struct DeliveryPipeline<A: RestApi> {
    actor: PharmacyId,
    api: Arc<A>,
    store: Arc<ConversationStore>,
    optimistic: bool,
}

impl<A: RestApi> DeliveryPipeline<A> {
    pub fn new(
        actor: PharmacyId,
        api: Arc<A>,
        store: Arc<ConversationStore>,
        optimistic: bool,
    ) -> Self {
        Self {
            actor,
            api,
            store,
            optimistic,
        }
    }

    /// Send a message to `counterparty` and return its confirmed form.
    pub async fn send<D: Dialer>(
        &self,
        connection: &ConnectionManager<D>,
        counterparty: Option<&PharmacyId>,
        text: Option<&str>,
        image: Option<ImageAttachment>,
    ) -> Result<Message, SendError> {
        let draft = validate(counterparty, text, image)?;
        let image = draft.image.as_ref().map(ImageAttachment::to_data_url);

        let outgoing = OutgoingMessage {
            pharmacy_id: draft.counterparty.clone(),
            message: draft.text.clone(),
            image: image.clone(),
        };

        let placeholder = if self.optimistic {
            let local_id = Uuid::new_v4();
            self.store.append_pending(Message {
                key: MessageKey::Pending(local_id),
                sender: self.actor.clone(),
                receiver: draft.counterparty.clone(),
                text: Some(draft.text.clone()).filter(|t| !t.is_empty()),
                image,
                created_at: Utc::now(),
                anonymous_sender: false,
            })
        } else {
            None
        };

        let wire = match self.api.send_message(&outgoing).await {
            Ok(wire) => wire,
            Err(e) => {
                if let Some(local_id) = placeholder {
                    self.store.retract(&draft.counterparty, local_id);
                }
                warn!(to = %draft.counterparty.short(), error = %e, "Message not sent");
                return Err(e.into());
            }
        };

        let confirmed = Message::from(wire.clone());
        match placeholder {
            Some(local_id) => self.store.confirm(local_id, confirmed.clone()),
            None => self.store.append(confirmed.clone()),
        };
        info!(to = %draft.counterparty.short(), id = %confirmed.key, "Message sent");

        // Best effort: the message is stored server-side either way.
        match connection.emit(OutboundEvent::SendMessage(wire)) {
            Ok(()) => debug!(id = %confirmed.key, "Message relayed"),
            Err(e) => warn!(id = %confirmed.key, error = %e, "Message stored but not relayed"),
        }

        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmalink_net::testing::{ChannelDialer, FakeApi};
    use pharmalink_net::ConnectionConfig;
    use pharmalink_shared::protocol::{Packet, EVENT_SEND_MESSAGE};
    use pharmalink_shared::{ConnectionState, Credential, FetchError};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn setup(optimistic: bool) -> (Arc<FakeApi>, Arc<ConversationStore>, DeliveryPipeline<FakeApi>) {
        let api = Arc::new(FakeApi::new("me"));
        let store = Arc::new(ConversationStore::new("me".into()));
        let pipeline = DeliveryPipeline::new("me".into(), api.clone(), store.clone(), optimistic);
        (api, store, pipeline)
    }

    fn offline() -> ConnectionManager<ChannelDialer> {
        let (dialer, _servers) = ChannelDialer::new();
        ConnectionManager::new(dialer, ConnectionConfig::default())
    }

    #[tokio::test]
    async fn test_empty_message_makes_no_request() {
        let (api, _, pipeline) = setup(false);
        let b = PharmacyId::from("b");

        let err = pipeline
            .send(&offline(), Some(&b), Some("   "), None)
            .await
            .unwrap_err();
        assert_eq!(err, SendError::Validation(ValidationError::EmptyMessage));
        assert_eq!(api.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_counterparty_rejected() {
        let (api, _, pipeline) = setup(false);
        let err = pipeline
            .send(&offline(), None, Some("hi"), None)
            .await
            .unwrap_err();
        assert_eq!(err, SendError::Validation(ValidationError::NoCounterparty));
        assert_eq!(api.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversized_image_rejected() {
        let (api, _, pipeline) = setup(false);
        let b = PharmacyId::from("b");
        let image = ImageAttachment::new("image/png", vec![0u8; MAX_IMAGE_SIZE + 1]);

        let err = pipeline
            .send(&offline(), Some(&b), None, Some(image))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SendError::Validation(ValidationError::ImageTooLarge { .. })
        ));
        assert_eq!(api.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_submit_leaves_no_trace() {
        let (api, store, pipeline) = setup(true);
        let b = PharmacyId::from("b");
        api.fail_next_send(FetchError::Timeout);

        let err = pipeline
            .send(&offline(), Some(&b), Some("hello"), None)
            .await
            .unwrap_err();
        assert_eq!(err, SendError::Fetch(FetchError::Timeout));
        assert!(store.get(&b).is_empty());
    }

    #[tokio::test]
    async fn test_image_only_message_is_sent_as_data_url() {
        let (api, store, pipeline) = setup(false);
        let b = PharmacyId::from("b");
        let image = ImageAttachment::new("image/png", vec![1, 2, 3]);

        let sent = pipeline
            .send(&offline(), Some(&b), None, Some(image))
            .await
            .unwrap();
        assert_eq!(sent.image.as_deref(), Some("data:image/png;base64,AQID"));
        assert!(sent.text.is_none());
        assert_eq!(api.sent.lock().unwrap()[0].message, "");
        assert_eq!(store.get(&b).len(), 1);
    }

    #[tokio::test]
    async fn test_confirmed_message_is_stored_and_relayed() {
        let (_, store, pipeline) = setup(true);
        let b = PharmacyId::from("b");

        let (dialer, mut servers) = ChannelDialer::new();
        let mut connection = ConnectionManager::new(dialer, ConnectionConfig::default());
        connection.open(&"me".into(), &Credential::new("t"));
        let mut server = servers.recv().await.unwrap();
        server.accept_and_drain(2).await;
        let mut state = connection.subscribe_state();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();

        let sent = pipeline
            .send(&connection, Some(&b), Some(" hello "), None)
            .await
            .unwrap();
        assert_eq!(sent.key, MessageKey::Confirmed("srv-1".into()));
        assert_eq!(sent.text.as_deref(), Some("hello"));
        assert_eq!(store.get(&b), vec![sent]);

        match server.next_packet().await {
            Packet::Event { name, data } => {
                assert_eq!(name, EVENT_SEND_MESSAGE);
                assert_eq!(data["_id"], "srv-1");
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }
}
