//! In-memory stand-ins for the socket server and the REST service.
//!
//! Compiled for this crate's tests and, behind the `test-support` feature,
//! for downstream crates' tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;

use pharmalink_shared::protocol::Packet;
use pharmalink_shared::{
    Counterparty, Credential, FetchError, Notification, NotificationId, OutgoingMessage,
    PharmacyId, TransportError, WireMessage,
};

use crate::api::RestApi;
use crate::error::ConnectionError;
use crate::transport::{Dialer, Link};

pub use pharmalink_shared::identity::encode_test_token;

// ---------------------------------------------------------------------------
// Socket side
// ---------------------------------------------------------------------------

/// The test's side of a dialed link. Dropping it drops the connection.
pub struct ServerEnd {
    pub to_client: mpsc::Sender<String>,
    pub from_client: mpsc::Receiver<String>,
}

impl ServerEnd {
    pub async fn send(&self, packet: Packet) {
        self.to_client
            .send(packet.encode())
            .await
            .expect("client dropped the link");
    }

    pub async fn next_packet(&mut self) -> Packet {
        let frame = tokio::time::timeout(Duration::from_secs(2), self.from_client.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("client closed the link");
        Packet::decode(&frame).expect("client sent an undecodable frame")
    }

    /// Play the server side of a successful handshake.
    pub async fn accept(&mut self) {
        self.send(Packet::Open(json!({ "sid": "e1", "pingInterval": 25000 })))
            .await;
        match self.next_packet().await {
            Packet::Connect(Some(_auth)) => {}
            other => panic!("expected connect with auth, got {other:?}"),
        }
        self.send(Packet::Connect(Some(json!({ "sid": "s1" })))).await;
    }

    /// Wait for the client to drop the link, returning anything it sent first.
    pub async fn closed(&mut self) -> Vec<Packet> {
        let mut sent = Vec::new();
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), self.from_client.recv())
                .await
                .expect("client kept the link open");
            match frame {
                Some(frame) => sent.extend(Packet::decode(&frame).ok()),
                None => return sent,
            }
        }
    }

    /// Accept, then consume the joins and presence request sent on connect.
    pub async fn accept_and_drain(&mut self, expected_packets: usize) {
        self.accept().await;
        for _ in 0..expected_packets {
            self.next_packet().await;
        }
    }
}

/// Every dial hands a fresh [`ServerEnd`] to the test.
#[derive(Clone)]
pub struct ChannelDialer {
    servers: mpsc::UnboundedSender<ServerEnd>,
    pub dials: Arc<AtomicUsize>,
    pub fail_next: Arc<Mutex<Option<ConnectionError>>>,
}

impl ChannelDialer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                servers: tx,
                dials: Arc::new(AtomicUsize::new(0)),
                fail_next: Arc::new(Mutex::new(None)),
            },
            rx,
        )
    }
}

impl Dialer for ChannelDialer {
    fn dial(
        &self,
        _credential: &Credential,
    ) -> impl Future<Output = Result<Link, ConnectionError>> + Send {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let failure = self.fail_next.lock().expect("poisoned").take();
        let servers = self.servers.clone();

        async move {
            if let Some(e) = failure {
                return Err(e);
            }
            let (to_client, inbound) = mpsc::channel(64);
            let (outbound, from_client) = mpsc::channel(64);
            servers
                .send(ServerEnd {
                    to_client,
                    from_client,
                })
                .map_err(|_| TransportError::Unreachable("test server gone".into()))?;
            Ok::<_, ConnectionError>(Link { outbound, inbound })
        }
    }
}

// ---------------------------------------------------------------------------
// REST side
// ---------------------------------------------------------------------------

/// Scripted [`RestApi`] that records every call.
///
/// `fail_*` slots hold a one-shot failure for the next call of that kind.
#[derive(Default)]
pub struct FakeApi {
    pub actor: PharmacyId,
    pub pharmacies: Mutex<Vec<Counterparty>>,
    pub histories: Mutex<HashMap<PharmacyId, Vec<WireMessage>>>,
    pub notifications: Mutex<Vec<Notification>>,
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub acked: Mutex<Vec<NotificationId>>,

    pub history_calls: AtomicUsize,
    pub notification_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub ack_calls: AtomicUsize,

    pub history_delay: Mutex<Duration>,
    pub fail_history: Mutex<Option<FetchError>>,
    pub fail_send: Mutex<Option<FetchError>>,
    pub fail_ack: Mutex<Option<FetchError>>,
    pub fail_notifications: Mutex<Option<FetchError>>,
}

impl FakeApi {
    pub fn new(actor: impl Into<PharmacyId>) -> Self {
        Self {
            actor: actor.into(),
            ..Self::default()
        }
    }

    pub fn with_history(self, counterparty: &str, messages: Vec<WireMessage>) -> Self {
        self.histories
            .lock()
            .expect("poisoned")
            .insert(counterparty.into(), messages);
        self
    }

    pub fn with_notifications(self, notifications: Vec<Notification>) -> Self {
        *self.notifications.lock().expect("poisoned") = notifications;
        self
    }

    pub fn with_pharmacies(self, pharmacies: Vec<Counterparty>) -> Self {
        *self.pharmacies.lock().expect("poisoned") = pharmacies;
        self
    }

    pub fn fail_next_history(&self, e: FetchError) {
        *self.fail_history.lock().expect("poisoned") = Some(e);
    }

    pub fn fail_next_send(&self, e: FetchError) {
        *self.fail_send.lock().expect("poisoned") = Some(e);
    }

    pub fn fail_next_ack(&self, e: FetchError) {
        *self.fail_ack.lock().expect("poisoned") = Some(e);
    }

    pub fn fail_next_notifications(&self, e: FetchError) {
        *self.fail_notifications.lock().expect("poisoned") = Some(e);
    }

    pub fn set_history_delay(&self, delay: Duration) {
        *self.history_delay.lock().expect("poisoned") = delay;
    }

    fn take(slot: &Mutex<Option<FetchError>>) -> Option<FetchError> {
        slot.lock().expect("poisoned").take()
    }
}

impl RestApi for FakeApi {
    fn list_pharmacies(&self) -> impl Future<Output = Result<Vec<Counterparty>, FetchError>> + Send {
        let pharmacies = self.pharmacies.lock().expect("poisoned").clone();
        async move { Ok(pharmacies) }
    }

    fn fetch_history(
        &self,
        counterparty: &PharmacyId,
    ) -> impl Future<Output = Result<Vec<WireMessage>, FetchError>> + Send {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let failure = Self::take(&self.fail_history);
        let delay = *self.history_delay.lock().expect("poisoned");
        let history = self
            .histories
            .lock()
            .expect("poisoned")
            .get(counterparty)
            .cloned()
            .unwrap_or_default();

        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match failure {
                Some(e) => Err(e),
                None => Ok(history),
            }
        }
    }

    fn send_message(
        &self,
        message: &OutgoingMessage,
    ) -> impl Future<Output = Result<WireMessage, FetchError>> + Send {
        let n = self.send_calls.fetch_add(1, Ordering::SeqCst);
        let result = match Self::take(&self.fail_send) {
            Some(e) => Err(e),
            None => {
                self.sent.lock().expect("poisoned").push(message.clone());
                Ok(WireMessage {
                    id: format!("srv-{}", n + 1),
                    sender: self.actor.clone(),
                    receiver: message.pharmacy_id.clone(),
                    text: Some(message.message.clone()).filter(|t| !t.is_empty()),
                    image: message.image.clone(),
                    created_at: Utc::now(),
                    anonymous: false,
                })
            }
        };
        async move { result }
    }

    fn fetch_notifications(
        &self,
    ) -> impl Future<Output = Result<Vec<Notification>, FetchError>> + Send {
        self.notification_calls.fetch_add(1, Ordering::SeqCst);
        let result = match Self::take(&self.fail_notifications) {
            Some(e) => Err(e),
            None => Ok(self.notifications.lock().expect("poisoned").clone()),
        };
        async move { result }
    }

    fn mark_as_read(
        &self,
        id: &NotificationId,
    ) -> impl Future<Output = Result<(), FetchError>> + Send {
        self.ack_calls.fetch_add(1, Ordering::SeqCst);
        let result = match Self::take(&self.fail_ack) {
            Some(e) => Err(e),
            None => {
                self.acked.lock().expect("poisoned").push(id.clone());
                Ok(())
            }
        };
        async move { result }
    }
}

/// A confirmed wire message, `minutes` after a fixed epoch.
pub fn wire_message(id: &str, sender: &str, receiver: &str, text: &str, minutes: i64) -> WireMessage {
    use chrono::TimeZone;
    let base = Utc
        .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp");
    WireMessage {
        id: id.to_string(),
        sender: sender.into(),
        receiver: receiver.into(),
        text: Some(text.to_string()),
        image: None,
        created_at: base + chrono::Duration::minutes(minutes),
        anonymous: false,
    }
}

pub fn notification(id: &str, read: bool) -> Notification {
    Notification {
        id: NotificationId(id.to_string()),
        message: format!("notification {id}"),
        read,
        kind: Default::default(),
        created_at: None,
    }
}
