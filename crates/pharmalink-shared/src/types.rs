use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Pharmacy identity = opaque id assigned by the user service (`_id`)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PharmacyId(pub String);

impl PharmacyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for PharmacyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PharmacyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct NotificationId(pub String);

impl NotificationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bearer token shared by the REST API and the socket handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// The locally authenticated pharmacy.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: PharmacyId,
    pub display_name: Option<String>,
    pub credential: Credential,
}

/// Another pharmacy, as seen from the directory plus live presence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Counterparty {
    #[serde(rename = "_id")]
    pub id: PharmacyId,
    #[serde(rename = "pharmacyName", default)]
    pub display_name: String,
    #[serde(skip)]
    pub online: bool,
}

/// Socket.IO rooms the client joins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Room {
    /// Personal room, receives notifications addressed to the actor.
    Actor(PharmacyId),
    /// Conversation room with one counterparty.
    Conversation(PharmacyId),
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Identity of a chat message across its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Local placeholder shown before the server confirms the message.
    Pending(Uuid),
    /// Id assigned by the chat service.
    Confirmed(String),
}

impl MessageKey {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn confirmed_id(&self) -> Option<&str> {
        match self {
            Self::Confirmed(id) => Some(id),
            Self::Pending(_) => None,
        }
    }
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending(id) => write!(f, "pending:{id}"),
            Self::Confirmed(id) => f.write_str(id),
        }
    }
}

/// A chat message between two pharmacies. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub key: MessageKey,
    pub sender: PharmacyId,
    pub receiver: PharmacyId,
    pub text: Option<String>,
    /// Image payload as sent on the wire (a data URL or a hosted URL).
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub anonymous_sender: bool,
}

impl Message {
    /// A message must carry text, an image, or both.
    pub fn has_content(&self) -> bool {
        let has_text = self.text.as_deref().is_some_and(|t| !t.trim().is_empty());
        let has_image = self.image.as_deref().is_some_and(|i| !i.is_empty());
        has_text || has_image
    }

    /// The conversation this message belongs to, from `local`'s point of view.
    pub fn counterparty_for(&self, local: &PharmacyId) -> &PharmacyId {
        if &self.sender == local {
            &self.receiver
        } else {
            &self.sender
        }
    }

    pub fn is_from(&self, local: &PharmacyId) -> bool {
        &self.sender == local
    }
}

/// Message as exchanged with the chat service, over REST and the socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender: PharmacyId,
    pub receiver: PharmacyId,
    #[serde(rename = "message", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "isAnonymous", default)]
    pub anonymous: bool,
}

impl From<WireMessage> for Message {
    fn from(w: WireMessage) -> Self {
        Self {
            key: MessageKey::Confirmed(w.id),
            sender: w.sender,
            receiver: w.receiver,
            text: w.text.filter(|t| !t.is_empty()),
            image: w.image.filter(|i| !i.is_empty()),
            created_at: w.created_at,
            anonymous_sender: w.anonymous,
        }
    }
}

/// Body of `POST /chat/send`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub pharmacy_id: PharmacyId,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewRequest,
    StatusUpdate,
    NewMedicine,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: NotificationId,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub read: bool,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_wire() -> WireMessage {
        serde_json::from_value(serde_json::json!({
            "_id": "m1",
            "sender": "a",
            "receiver": "b",
            "message": "hello",
            "createdAt": "2024-05-01T10:00:00Z",
            "isAnonymous": false
        }))
        .unwrap()
    }

    #[test]
    fn test_wire_message_into_confirmed() {
        let msg: Message = sample_wire().into();
        assert_eq!(msg.key, MessageKey::Confirmed("m1".into()));
        assert_eq!(msg.text.as_deref(), Some("hello"));
        assert!(msg.image.is_none());
        assert!(msg.has_content());
    }

    #[test]
    fn test_counterparty_for_either_side() {
        let msg: Message = sample_wire().into();
        assert_eq!(msg.counterparty_for(&"a".into()), &PharmacyId::from("b"));
        assert_eq!(msg.counterparty_for(&"b".into()), &PharmacyId::from("a"));
        assert!(msg.is_from(&"a".into()));
    }

    #[test]
    fn test_empty_text_has_no_content() {
        let mut msg: Message = sample_wire().into();
        msg.text = Some("   ".into());
        assert!(!msg.has_content());
        msg.image = Some("data:image/png;base64,AAAA".into());
        assert!(msg.has_content());
    }

    #[test]
    fn test_notification_unknown_kind() {
        let n: Notification = serde_json::from_value(serde_json::json!({
            "_id": "n1",
            "message": "stock arrived",
            "type": "something_else"
        }))
        .unwrap();
        assert_eq!(n.kind, NotificationKind::Other);
        assert!(!n.read);
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let c = Credential::new("secret-token");
        assert_eq!(format!("{c:?}"), "Credential(***)");
    }
}
