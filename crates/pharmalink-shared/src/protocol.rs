//! Socket wire protocol: Socket.IO v4 packets carried as WebSocket text
//! frames, and the typed events exchanged through them.

use serde_json::Value;

use crate::error::TransportError;
use crate::types::{Notification, NotificationKind, PharmacyId, WireMessage};

pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_PHARMACY_ONLINE: &str = "pharmacyOnline";
pub const EVENT_PHARMACY_OFFLINE: &str = "pharmacyOffline";
pub const EVENT_ONLINE_SNAPSHOT: &str = "onlinePharmacies";
pub const EVENT_NEW_REQUEST: &str = "new_request";
pub const EVENT_STATUS_UPDATE: &str = "status_update";
pub const EVENT_NEW_MEDICINE: &str = "new_medicine";

pub const EVENT_JOIN: &str = "join";
pub const EVENT_JOIN_CHAT: &str = "joinChat";
pub const EVENT_SEND_MESSAGE: &str = "sendMessage";
pub const EVENT_REQUEST_PRESENCE: &str = "getOnlinePharmacies";

// ---------------------------------------------------------------------------
// Packets
// ---------------------------------------------------------------------------

/// One Engine.IO / Socket.IO packet on the default namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// `0{...}` engine handshake sent by the server.
    Open(Value),
    /// `1` engine close.
    Close,
    /// `2` heartbeat from the server.
    Ping,
    /// `3` heartbeat reply.
    Pong,
    /// `6` engine no-op.
    Noop,
    /// `40` namespace connect. Carries auth from the client, sid from the server.
    Connect(Option<Value>),
    /// `41` namespace disconnect.
    Disconnect,
    /// `42[name, data]` event.
    Event { name: String, data: Value },
    /// `44{...}` namespace connect refused.
    ConnectError(Value),
}

impl Packet {
    pub fn event(name: &str, data: Value) -> Self {
        Self::Event {
            name: name.to_string(),
            data,
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> String {
        match self {
            Self::Open(v) => format!("0{v}"),
            Self::Close => "1".to_string(),
            Self::Ping => "2".to_string(),
            Self::Pong => "3".to_string(),
            Self::Noop => "6".to_string(),
            Self::Connect(None) => "40".to_string(),
            Self::Connect(Some(v)) => format!("40{v}"),
            Self::Disconnect => "41".to_string(),
            Self::Event { name, data } => {
                let args = match data {
                    Value::Null => Value::Array(vec![Value::String(name.clone())]),
                    other => Value::Array(vec![Value::String(name.clone()), other.clone()]),
                };
                format!("42{args}")
            }
            Self::ConnectError(v) => format!("44{v}"),
        }
    }

    /// Parse a text frame.
    pub fn decode(frame: &str) -> Result<Self, TransportError> {
        let mut chars = frame.chars();
        let engine = chars
            .next()
            .ok_or_else(|| TransportError::Protocol("empty frame".into()))?;
        let rest = chars.as_str();

        match engine {
            '0' => Ok(Self::Open(parse_json(rest)?)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '6' => Ok(Self::Noop),
            '4' => decode_socket_packet(rest),
            other => Err(TransportError::Protocol(format!(
                "unknown engine packet type '{other}'"
            ))),
        }
    }
}

fn decode_socket_packet(body: &str) -> Result<Packet, TransportError> {
    let mut chars = body.chars();
    let kind = chars
        .next()
        .ok_or_else(|| TransportError::Protocol("empty socket packet".into()))?;
    let rest = chars.as_str();

    if rest.starts_with('/') {
        return Err(TransportError::Protocol(
            "packets for non-default namespaces are not supported".into(),
        ));
    }

    match kind {
        '0' if rest.is_empty() => Ok(Packet::Connect(None)),
        '0' => Ok(Packet::Connect(Some(parse_json(rest)?))),
        '1' => Ok(Packet::Disconnect),
        '2' => {
            // An ack id may precede the argument array.
            let args = rest.trim_start_matches(|c: char| c.is_ascii_digit());
            match parse_json(args)? {
                Value::Array(mut items) if !items.is_empty() => {
                    let name = match items.remove(0) {
                        Value::String(name) => name,
                        other => {
                            return Err(TransportError::Protocol(format!(
                                "event name is not a string: {other}"
                            )))
                        }
                    };
                    let data = if items.is_empty() {
                        Value::Null
                    } else {
                        items.remove(0)
                    };
                    Ok(Packet::Event { name, data })
                }
                _ => Err(TransportError::Protocol("event without a name".into())),
            }
        }
        '4' => Ok(Packet::ConnectError(if rest.is_empty() {
            Value::Null
        } else {
            parse_json(rest)?
        })),
        other => Err(TransportError::Protocol(format!(
            "unsupported socket packet type '{other}'"
        ))),
    }
}

fn parse_json(s: &str) -> Result<Value, TransportError> {
    serde_json::from_str(s).map_err(|e| TransportError::Protocol(format!("invalid JSON: {e}")))
}

// ---------------------------------------------------------------------------
// Typed events
// ---------------------------------------------------------------------------

/// Tag of an inbound event, used to key the handler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Message,
    PharmacyOnline,
    PharmacyOffline,
    OnlineSnapshot,
    NewRequest,
    StatusUpdate,
    NewMedicine,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Message,
        EventKind::PharmacyOnline,
        EventKind::PharmacyOffline,
        EventKind::OnlineSnapshot,
        EventKind::NewRequest,
        EventKind::StatusUpdate,
        EventKind::NewMedicine,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Message => EVENT_MESSAGE,
            Self::PharmacyOnline => EVENT_PHARMACY_ONLINE,
            Self::PharmacyOffline => EVENT_PHARMACY_OFFLINE,
            Self::OnlineSnapshot => EVENT_ONLINE_SNAPSHOT,
            Self::NewRequest => EVENT_NEW_REQUEST,
            Self::StatusUpdate => EVENT_STATUS_UPDATE,
            Self::NewMedicine => EVENT_NEW_MEDICINE,
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.wire_name() == name)
    }
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A confirmed chat message broadcast to the conversation room.
    Message(WireMessage),
    PharmacyOnline(PharmacyId),
    PharmacyOffline(PharmacyId),
    /// Reply to a presence snapshot request.
    OnlineSnapshot(Vec<PharmacyId>),
    NewRequest(Notification),
    StatusUpdate(Notification),
    NewMedicine(Notification),
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message(_) => EventKind::Message,
            Self::PharmacyOnline(_) => EventKind::PharmacyOnline,
            Self::PharmacyOffline(_) => EventKind::PharmacyOffline,
            Self::OnlineSnapshot(_) => EventKind::OnlineSnapshot,
            Self::NewRequest(_) => EventKind::NewRequest,
            Self::StatusUpdate(_) => EventKind::StatusUpdate,
            Self::NewMedicine(_) => EventKind::NewMedicine,
        }
    }

    pub fn notification(&self) -> Option<&Notification> {
        match self {
            Self::NewRequest(n) | Self::StatusUpdate(n) | Self::NewMedicine(n) => Some(n),
            _ => None,
        }
    }

    /// Decode an event by name. Unknown names yield `Ok(None)`.
    pub fn decode(name: &str, data: Value) -> Result<Option<Self>, TransportError> {
        let Some(kind) = EventKind::from_wire_name(name) else {
            return Ok(None);
        };

        let event = match kind {
            EventKind::Message => Self::Message(from_value(name, data)?),
            EventKind::PharmacyOnline => Self::PharmacyOnline(from_value(name, data)?),
            EventKind::PharmacyOffline => Self::PharmacyOffline(from_value(name, data)?),
            EventKind::OnlineSnapshot => Self::OnlineSnapshot(from_value(name, data)?),
            EventKind::NewRequest => {
                Self::NewRequest(notification(name, data, NotificationKind::NewRequest)?)
            }
            EventKind::StatusUpdate => {
                Self::StatusUpdate(notification(name, data, NotificationKind::StatusUpdate)?)
            }
            EventKind::NewMedicine => {
                Self::NewMedicine(notification(name, data, NotificationKind::NewMedicine)?)
            }
        };
        Ok(Some(event))
    }
}

fn from_value<T: serde::de::DeserializeOwned>(name: &str, data: Value) -> Result<T, TransportError> {
    serde_json::from_value(data)
        .map_err(|e| TransportError::Protocol(format!("bad '{name}' payload: {e}")))
}

fn notification(
    name: &str,
    data: Value,
    kind: NotificationKind,
) -> Result<Notification, TransportError> {
    let mut n: Notification = from_value(name, data)?;
    n.kind = kind;
    Ok(n)
}

/// Events sent by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    /// Join the actor's personal room.
    Join(PharmacyId),
    /// Join the conversation room with a counterparty.
    JoinChat(PharmacyId),
    /// Replicate an already-confirmed message to the room.
    SendMessage(WireMessage),
    /// Ask for the ids of every connected pharmacy.
    RequestPresence,
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => EVENT_JOIN,
            Self::JoinChat(_) => EVENT_JOIN_CHAT,
            Self::SendMessage(_) => EVENT_SEND_MESSAGE,
            Self::RequestPresence => EVENT_REQUEST_PRESENCE,
        }
    }

    pub fn to_packet(&self) -> Result<Packet, TransportError> {
        let data = match self {
            Self::Join(id) | Self::JoinChat(id) => Value::String(id.0.clone()),
            Self::SendMessage(msg) => serde_json::to_value(msg)
                .map_err(|e| TransportError::Protocol(format!("unserializable message: {e}")))?,
            Self::RequestPresence => Value::Null,
        };
        Ok(Packet::event(self.name(), data))
    }
}
