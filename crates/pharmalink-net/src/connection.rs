//! Socket connection orchestration with the tokio mpsc command/notification pattern.
//!
//! The connection task owns the [`Link`] and runs in a dedicated tokio task.
//! The [`ConnectionManager`] talks to it through a command channel and
//! receives inbound events on a notification channel, which a second task
//! drains into the handler table one event at a time.
//!
//! Handlers and joined rooms belong to the manager, not the task, so they
//! survive reconnects: every successful handshake re-joins all rooms.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use pharmalink_shared::constants::{
    CHANNEL_CAPACITY, DEFAULT_HANDSHAKE_TIMEOUT_SECS, RECONNECT_FLOOR_MS, RECONNECT_MAX_MS,
    RECONNECT_MIN_MS,
};
use pharmalink_shared::protocol::{EventKind, InboundEvent, OutboundEvent, Packet};
use pharmalink_shared::{
    AuthError, ConnectionState, Credential, PharmacyId, Room, TransportError,
};

use crate::error::ConnectionError;
use crate::handlers::{Handler, HandlerTable, Lifecycle, LifecycleHandler};
use crate::transport::{Dialer, Link};

const MIN_BACKOFF: Duration = Duration::from_millis(RECONNECT_FLOOR_MS);

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the connection task.
#[derive(Debug)]
enum ConnectionCommand {
    /// Send an event if the link is up.
    Emit(OutboundEvent),
    /// Join a room now; it is also re-joined after every reconnect.
    Join(Room),
    /// Disconnect and stop the task.
    Shutdown,
}

/// Notifications sent *from* the connection task to the dispatcher.
#[derive(Debug)]
enum ConnectionNotification {
    Event(InboundEvent),
    Lifecycle(Lifecycle),
}

/// Configuration for the connection task.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Time allowed from dial to the server's connect acknowledgement.
    pub handshake_timeout: Duration,
    /// First reconnect delay; doubles after each failed attempt.
    pub reconnect_min: Duration,
    /// Upper bound for the reconnect delay.
    pub reconnect_max: Duration,
    /// Ask the server for the online set after every connect.
    pub presence_snapshot: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            reconnect_min: Duration::from_millis(RECONNECT_MIN_MS),
            reconnect_max: Duration::from_millis(RECONNECT_MAX_MS),
            presence_snapshot: true,
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionManager (public handle)
// ---------------------------------------------------------------------------

struct LiveConnection {
    cmd_tx: mpsc::Sender<ConnectionCommand>,
    task: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Owner of the single socket connection of a session.
///
/// Only the manager writes the handler table; everything else observes
/// inbound traffic through the handlers it registers.
pub struct ConnectionManager<D: Dialer> {
    dialer: Arc<D>,
    config: ConnectionConfig,
    handlers: Arc<Mutex<HandlerTable>>,
    rooms: Arc<Mutex<BTreeSet<Room>>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    /// Bumped on every open/close so a superseded task cannot publish state.
    generation: Arc<AtomicU64>,
    live: Option<LiveConnection>,
}

impl<D: Dialer> ConnectionManager<D> {
    pub fn new(dialer: D, config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            dialer: Arc::new(dialer),
            config,
            handlers: Arc::new(Mutex::new(HandlerTable::new())),
            rooms: Arc::new(Mutex::new(BTreeSet::new())),
            state_tx: Arc::new(state_tx),
            generation: Arc::new(AtomicU64::new(0)),
            live: None,
        }
    }

    /// Spawn the connection task for `actor_id`.
    ///
    /// Calling this while a connection is live shuts the stale one down first,
    /// so events are never delivered twice.
    pub fn open(&mut self, actor_id: &PharmacyId, credential: &Credential) {
        if self.live.is_some() {
            info!("Replacing live socket connection");
            self.stop_live();
        }

        lock(&self.rooms).insert(Room::Actor(actor_id.clone()));

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (cmd_tx, cmd_rx) = mpsc::channel::<ConnectionCommand>(CHANNEL_CAPACITY);
        let (notif_tx, notif_rx) = mpsc::channel::<ConnectionNotification>(CHANNEL_CAPACITY);

        let dispatcher = tokio::spawn(dispatch_loop(notif_rx, self.handlers.clone()));

        let ctx = TaskContext {
            dialer: self.dialer.clone(),
            credential: credential.clone(),
            config: self.config.clone(),
            rooms: self.rooms.clone(),
            notif_tx,
            state: StatePublisher {
                generation,
                current: self.generation.clone(),
                state_tx: self.state_tx.clone(),
            },
        };
        let task = tokio::spawn(connection_task(ctx, cmd_rx));

        info!(actor = %actor_id.short(), "Socket connection opened");

        self.live = Some(LiveConnection {
            cmd_tx,
            task,
            dispatcher,
        });
    }

    /// Bind `handler` to `kind`, returning (and thereby deregistering) the
    /// handler previously bound to it.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Option<Handler>
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        lock(&self.handlers).on(kind, Arc::new(handler))
    }

    pub fn off(&self, kind: EventKind) -> Option<Handler> {
        lock(&self.handlers).off(kind)
    }

    /// Observe state changes and handshake rejection, in order with events.
    pub fn on_lifecycle<F>(&self, handler: F) -> Option<LifecycleHandler>
    where
        F: Fn(&Lifecycle) + Send + Sync + 'static,
    {
        lock(&self.handlers).on_lifecycle(Arc::new(handler))
    }

    /// Best-effort send. Fails immediately when the socket is not connected;
    /// nothing is queued for later.
    pub fn emit(&self, event: OutboundEvent) -> Result<(), TransportError> {
        let live = self.live.as_ref().ok_or(TransportError::Closed)?;
        if self.state() != ConnectionState::Connected {
            warn!(event = event.name(), "Socket not connected, dropping outbound event");
            return Err(TransportError::Closed);
        }
        live.cmd_tx
            .try_send(ConnectionCommand::Emit(event))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    /// Join `room` now if connected, and after every reconnect.
    pub fn join(&self, room: Room) {
        if !lock(&self.rooms).insert(room.clone()) {
            return;
        }
        debug!(room = ?room, "Recorded room");
        if let Some(live) = &self.live {
            if live.cmd_tx.try_send(ConnectionCommand::Join(room)).is_err() {
                debug!("Join deferred to next reconnect");
            }
        }
    }

    pub fn rooms(&self) -> Vec<Room> {
        lock(&self.rooms).iter().cloned().collect()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.live.is_some()
    }

    /// Release the transport and deregister every handler and room.
    pub fn close(&mut self) {
        let was_live = self.live.is_some();
        self.stop_live();
        lock(&self.handlers).clear();
        lock(&self.rooms).clear();
        if was_live {
            info!("Socket connection closed");
        }
    }

    fn stop_live(&mut self) {
        if let Some(live) = self.live.take() {
            self.generation.fetch_add(1, Ordering::SeqCst);
            if live.cmd_tx.try_send(ConnectionCommand::Shutdown).is_err() {
                live.task.abort();
            }
            live.dispatcher.abort();
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }
    }
}

impl<D: Dialer> Drop for ConnectionManager<D> {
    fn drop(&mut self) {
        self.stop_live();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Runs handlers one notification at a time, each to completion.
async fn dispatch_loop(
    mut notif_rx: mpsc::Receiver<ConnectionNotification>,
    handlers: Arc<Mutex<HandlerTable>>,
) {
    while let Some(notification) = notif_rx.recv().await {
        match notification {
            ConnectionNotification::Event(event) => {
                // Clone the handler out so it runs without the table locked.
                let handler = lock(&handlers).handler_for(event.kind());
                match handler {
                    Some(handler) => handler(&event),
                    None => trace!(kind = ?event.kind(), "No handler bound, dropping event"),
                }
            }
            ConnectionNotification::Lifecycle(signal) => {
                let handler = lock(&handlers).lifecycle_handler();
                if let Some(handler) = handler {
                    handler(&signal);
                }
            }
        }
    }
    debug!("Dispatcher stopped");
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

struct StatePublisher {
    generation: u64,
    current: Arc<AtomicU64>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

struct TaskContext<D: Dialer> {
    dialer: Arc<D>,
    credential: Credential,
    config: ConnectionConfig,
    rooms: Arc<Mutex<BTreeSet<Room>>>,
    notif_tx: mpsc::Sender<ConnectionNotification>,
    state: StatePublisher,
}

impl<D: Dialer> TaskContext<D> {
    async fn publish(&self, state: ConnectionState) {
        if self.state.current.load(Ordering::SeqCst) != self.state.generation {
            return;
        }
        self.state.state_tx.send_replace(state);
        let _ = self
            .notif_tx
            .send(ConnectionNotification::Lifecycle(Lifecycle::State(state)))
            .await;
    }
}

enum SessionEnd {
    Shutdown,
    Dropped,
    Failed(ConnectionError),
}

async fn connection_task<D: Dialer>(
    ctx: TaskContext<D>,
    mut cmd_rx: mpsc::Receiver<ConnectionCommand>,
) {
    let reconnect_min = ctx.config.reconnect_min.max(MIN_BACKOFF);
    let mut backoff = reconnect_min;

    loop {
        ctx.publish(ConnectionState::Connecting).await;

        // A shutdown mid-handshake drops the half-open link right away.
        let attempt = tokio::select! {
            result = establish(&ctx) => Some(result),
            _ = until_shutdown(&mut cmd_rx) => None,
        };

        let end = match attempt {
            None => SessionEnd::Shutdown,
            Some(Ok(mut link)) => {
                backoff = reconnect_min;
                ctx.publish(ConnectionState::Connected).await;
                info!("Socket connected");
                run_session(&ctx, &mut link, &mut cmd_rx).await
            }
            Some(Err(e)) => SessionEnd::Failed(e),
        };

        ctx.publish(ConnectionState::Disconnected).await;

        match end {
            SessionEnd::Shutdown => {
                info!("Socket shutdown requested");
                break;
            }
            SessionEnd::Failed(ConnectionError::Auth(e)) => {
                error!(error = %e, "Socket handshake rejected, not reconnecting");
                let _ = ctx
                    .notif_tx
                    .send(ConnectionNotification::Lifecycle(Lifecycle::AuthRejected(e)))
                    .await;
                break;
            }
            SessionEnd::Failed(ConnectionError::Transport(e)) => {
                warn!(
                    error = %e,
                    retry_in_ms = backoff.as_millis() as u64,
                    "Socket connection failed"
                );
            }
            SessionEnd::Dropped => {
                warn!(retry_in_ms = backoff.as_millis() as u64, "Socket connection lost");
            }
        }

        if !wait_backoff(backoff, &mut cmd_rx).await {
            info!("Socket shutdown requested during backoff");
            break;
        }
        backoff = (backoff * 2).min(ctx.config.reconnect_max.max(reconnect_min));
    }

    info!("Connection task terminated");
}

/// Dial and complete the Socket.IO handshake within the configured timeout.
async fn establish<D: Dialer>(ctx: &TaskContext<D>) -> Result<Link, ConnectionError> {
    let mut link = ctx.dialer.dial(&ctx.credential).await?;

    let outcome = tokio::time::timeout(
        ctx.config.handshake_timeout,
        handshake(&mut link, &ctx.credential),
    )
    .await;

    match outcome {
        Ok(Ok(())) => Ok(link),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(TransportError::HandshakeTimeout.into()),
    }
}

/// Wait for the engine open, authenticate, and wait for the connect ack.
async fn handshake(link: &mut Link, credential: &Credential) -> Result<(), ConnectionError> {
    let mut opened = false;

    loop {
        let frame = link.recv().await.ok_or(TransportError::Closed)?;
        match Packet::decode(&frame)? {
            Packet::Open(info) => {
                debug!(info = %info, "Engine handshake received");
                if !opened {
                    opened = true;
                    let auth = Packet::Connect(Some(json!({ "token": credential.expose() })));
                    link.send_packet(&auth).await?;
                }
            }
            Packet::Ping => link.send_packet(&Packet::Pong).await?,
            Packet::Connect(_) if opened => return Ok(()),
            Packet::ConnectError(detail) => {
                return Err(AuthError::Rejected(rejection_reason(&detail)).into());
            }
            Packet::Close | Packet::Disconnect => return Err(TransportError::Closed.into()),
            other => debug!(packet = ?other, "Ignoring packet during handshake"),
        }
    }
}

async fn run_session<D: Dialer>(
    ctx: &TaskContext<D>,
    link: &mut Link,
    cmd_rx: &mut mpsc::Receiver<ConnectionCommand>,
) -> SessionEnd {
    if let Err(e) = rejoin(ctx, link).await {
        return SessionEnd::Failed(e.into());
    }

    loop {
        tokio::select! {
            // --- Outgoing commands ---
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ConnectionCommand::Emit(event)) => {
                        if let Err(e) = send_event(link, &event).await {
                            return SessionEnd::Failed(e.into());
                        }
                        debug!(event = event.name(), "Emitted event");
                    }
                    Some(ConnectionCommand::Join(room)) => {
                        if let Err(e) = send_event(link, &join_event(&room)).await {
                            return SessionEnd::Failed(e.into());
                        }
                        debug!(room = ?room, "Joined room");
                    }
                    Some(ConnectionCommand::Shutdown) | None => {
                        let _ = link.send_packet(&Packet::Disconnect).await;
                        return SessionEnd::Shutdown;
                    }
                }
            }

            // --- Incoming frames ---
            frame = link.recv() => {
                let Some(frame) = frame else {
                    return SessionEnd::Dropped;
                };

                match Packet::decode(&frame) {
                    Ok(Packet::Ping) => {
                        if link.send_packet(&Packet::Pong).await.is_err() {
                            return SessionEnd::Dropped;
                        }
                    }
                    Ok(Packet::Event { name, data }) => match InboundEvent::decode(&name, data) {
                        Ok(Some(event)) => {
                            trace!(kind = ?event.kind(), "Inbound event");
                            if ctx
                                .notif_tx
                                .send(ConnectionNotification::Event(event))
                                .await
                                .is_err()
                            {
                                // Dispatcher gone: the manager let go of this connection.
                                return SessionEnd::Shutdown;
                            }
                        }
                        Ok(None) => debug!(event = %name, "Ignoring unknown event"),
                        Err(e) => warn!(event = %name, error = %e, "Dropping malformed event"),
                    },
                    Ok(Packet::Disconnect) | Ok(Packet::Close) => {
                        info!("Server closed the socket session");
                        return SessionEnd::Dropped;
                    }
                    Ok(Packet::ConnectError(detail)) => {
                        return SessionEnd::Failed(
                            AuthError::Rejected(rejection_reason(&detail)).into(),
                        );
                    }
                    Ok(other) => debug!(packet = ?other, "Ignoring packet"),
                    Err(e) => warn!(error = %e, "Dropping undecodable frame"),
                }
            }
        }
    }
}

/// Re-join every recorded room and ask for a presence snapshot.
async fn rejoin<D: Dialer>(ctx: &TaskContext<D>, link: &Link) -> Result<(), TransportError> {
    let rooms: Vec<Room> = lock(&ctx.rooms).iter().cloned().collect();
    for room in &rooms {
        send_event(link, &join_event(room)).await?;
    }
    if ctx.config.presence_snapshot {
        send_event(link, &OutboundEvent::RequestPresence).await?;
    }
    info!(rooms = rooms.len(), "Joined rooms");
    Ok(())
}

/// Sleep out the backoff while draining commands. Returns `false` on shutdown.
async fn wait_backoff(delay: Duration, cmd_rx: &mut mpsc::Receiver<ConnectionCommand>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = until_shutdown(cmd_rx) => false,
    }
}

/// Drain commands while no session is up, until shutdown is requested.
async fn until_shutdown(cmd_rx: &mut mpsc::Receiver<ConnectionCommand>) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            ConnectionCommand::Emit(event) => {
                warn!(event = event.name(), "Socket down, dropping outbound event");
            }
            // Recorded by the manager; joined on reconnect.
            ConnectionCommand::Join(_) => {}
            ConnectionCommand::Shutdown => return,
        }
    }
}

async fn send_event(link: &Link, event: &OutboundEvent) -> Result<(), TransportError> {
    link.send_packet(&event.to_packet()?).await
}

fn join_event(room: &Room) -> OutboundEvent {
    match room {
        Room::Actor(id) => OutboundEvent::Join(id.clone()),
        Room::Conversation(id) => OutboundEvent::JoinChat(id.clone()),
    }
}

fn rejection_reason(detail: &Value) -> String {
    detail
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| detail.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ChannelDialer, ServerEnd};
    use pharmalink_shared::protocol::{EVENT_JOIN, EVENT_JOIN_CHAT, EVENT_REQUEST_PRESENCE};
    use std::sync::atomic::Ordering;

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            handshake_timeout: Duration::from_secs(1),
            reconnect_min: Duration::from_millis(10),
            reconnect_max: Duration::from_millis(50),
            presence_snapshot: true,
        }
    }

    fn actor() -> PharmacyId {
        PharmacyId::from("actor-1")
    }

    async fn next_server(
        servers: &mut mpsc::UnboundedReceiver<ServerEnd>,
    ) -> ServerEnd {
        tokio::time::timeout(Duration::from_secs(2), servers.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn wait_state(manager: &ConnectionManager<ChannelDialer>, state: ConnectionState) {
        let mut rx = manager.subscribe_state();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == state))
            .await
            .unwrap()
            .unwrap();
    }

    fn expect_event(packet: Packet, expected_name: &str) -> Value {
        match packet {
            Packet::Event { name, data } if name == expected_name => data,
            other => panic!("expected '{expected_name}', got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_joins_actor_room_and_requests_presence() {
        let (dialer, mut servers) = ChannelDialer::new();
        let mut manager = ConnectionManager::new(dialer, test_config());
        manager.open(&actor(), &Credential::new("t"));

        let mut server = next_server(&mut servers).await;
        server.accept().await;

        assert_eq!(expect_event(server.next_packet().await, EVENT_JOIN), json!("actor-1"));
        expect_event(server.next_packet().await, EVENT_REQUEST_PRESENCE);
        wait_state(&manager, ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn test_inbound_event_reaches_handler() {
        let (dialer, mut servers) = ChannelDialer::new();
        let mut manager = ConnectionManager::new(dialer, test_config());
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.on(EventKind::PharmacyOnline, move |event| {
            let _ = tx.send(event.clone());
        });
        manager.open(&actor(), &Credential::new("t"));

        let mut server = next_server(&mut servers).await;
        server.accept().await;
        server
            .send(Packet::event("pharmacyOnline", json!("B")))
            .await;

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, InboundEvent::PharmacyOnline("B".into()));
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let (dialer, mut servers) = ChannelDialer::new();
        let mut manager = ConnectionManager::new(dialer, test_config());
        manager.open(&actor(), &Credential::new("t"));

        let mut server = next_server(&mut servers).await;
        server.accept().await;
        server.next_packet().await; // join
        server.next_packet().await; // presence request
        server.send(Packet::Ping).await;
        assert_eq!(server.next_packet().await, Packet::Pong);
    }

    #[tokio::test]
    async fn test_reconnect_rejoins_every_room() {
        let (dialer, mut servers) = ChannelDialer::new();
        let mut manager = ConnectionManager::new(dialer, test_config());
        manager.open(&actor(), &Credential::new("t"));

        let mut server = next_server(&mut servers).await;
        server.accept().await;
        server.next_packet().await;
        server.next_packet().await;

        manager.join(Room::Conversation("B".into()));
        assert_eq!(expect_event(server.next_packet().await, EVENT_JOIN_CHAT), json!("B"));

        // Drop the link from the server side.
        drop(server);

        let mut server = next_server(&mut servers).await;
        server.accept().await;
        assert_eq!(expect_event(server.next_packet().await, EVENT_JOIN), json!("actor-1"));
        assert_eq!(expect_event(server.next_packet().await, EVENT_JOIN_CHAT), json!("B"));
        expect_event(server.next_packet().await, EVENT_REQUEST_PRESENCE);
    }

    #[tokio::test]
    async fn test_rejected_handshake_is_auth_error_without_retry() {
        let (dialer, mut servers) = ChannelDialer::new();
        let dials = dialer.dials.clone();
        let mut manager = ConnectionManager::new(dialer, test_config());
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.on_lifecycle(move |signal| {
            let _ = tx.send(signal.clone());
        });
        manager.open(&actor(), &Credential::new("expired"));

        let mut server = next_server(&mut servers).await;
        server.send(Packet::Open(json!({ "sid": "e1" }))).await;
        assert!(matches!(server.next_packet().await, Packet::Connect(Some(_))));
        server
            .send(Packet::ConnectError(json!({ "message": "invalid token" })))
            .await;

        let rejected = loop {
            let signal = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if let Lifecycle::AuthRejected(e) = signal {
                break e;
            }
        };
        assert_eq!(rejected, AuthError::Rejected("invalid token".into()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(dials.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_dial_failure_retries() {
        let (dialer, mut servers) = ChannelDialer::new();
        *dialer.fail_next.lock().unwrap() = Some(ConnectionError::Transport(
            TransportError::Unreachable("refused".into()),
        ));
        let dials = dialer.dials.clone();
        let mut manager = ConnectionManager::new(dialer, test_config());
        manager.open(&actor(), &Credential::new("t"));

        let mut server = next_server(&mut servers).await;
        server.accept().await;
        wait_state(&manager, ConnectionState::Connected).await;
        assert_eq!(dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_emit_without_connection_fails() {
        let (dialer, _servers) = ChannelDialer::new();
        let manager = ConnectionManager::new(dialer, test_config());
        assert_eq!(
            manager.emit(OutboundEvent::RequestPresence),
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn test_reopen_closes_stale_connection() {
        let (dialer, mut servers) = ChannelDialer::new();
        let mut manager = ConnectionManager::new(dialer, test_config());
        manager.open(&actor(), &Credential::new("t"));

        let mut first = next_server(&mut servers).await;
        first.accept().await;
        first.next_packet().await;
        first.next_packet().await;

        manager.open(&actor(), &Credential::new("t"));
        assert_eq!(first.next_packet().await, Packet::Disconnect);

        let mut second = next_server(&mut servers).await;
        second.accept().await;
        wait_state(&manager, ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn test_reopen_mid_handshake_drops_pending_link() {
        let (dialer, mut servers) = ChannelDialer::new();
        let config = ConnectionConfig {
            handshake_timeout: Duration::from_secs(30),
            ..test_config()
        };
        let mut manager = ConnectionManager::new(dialer, config);
        manager.open(&actor(), &Credential::new("t"));

        // Engine open and auth, but no connect ack.
        let mut first = next_server(&mut servers).await;
        first.send(Packet::Open(json!({ "sid": "e1" }))).await;
        assert!(matches!(first.next_packet().await, Packet::Connect(Some(_))));

        manager.open(&actor(), &Credential::new("t"));
        let leftovers = first.closed().await;
        assert!(leftovers
            .iter()
            .all(|packet| !matches!(packet, Packet::Event { .. })));

        let mut second = next_server(&mut servers).await;
        second.accept().await;
        wait_state(&manager, ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn test_close_deregisters_handlers_and_rooms() {
        let (dialer, _servers) = ChannelDialer::new();
        let mut manager = ConnectionManager::new(dialer, test_config());
        manager.on(EventKind::Message, |_| {});
        manager.open(&actor(), &Credential::new("t"));
        manager.join(Room::Conversation("B".into()));
        assert_eq!(manager.rooms().len(), 2);

        manager.close();
        assert!(!manager.is_open());
        assert!(manager.rooms().is_empty());
        assert!(manager.off(EventKind::Message).is_none());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
