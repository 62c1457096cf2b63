//! Dispatch table from inbound event kind to handler.

use std::collections::HashMap;
use std::sync::Arc;

use pharmalink_shared::protocol::{EventKind, InboundEvent};
use pharmalink_shared::{AuthError, ConnectionState};

pub type Handler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;
pub type LifecycleHandler = Arc<dyn Fn(&Lifecycle) + Send + Sync>;

/// Connection lifecycle signals, delivered in order with inbound events.
#[derive(Debug, Clone, PartialEq)]
pub enum Lifecycle {
    State(ConnectionState),
    /// The server refused the credential; the connection will not retry.
    AuthRejected(AuthError),
}

/// At most one handler per [`EventKind`], plus one lifecycle observer.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<EventKind, Handler>,
    lifecycle: Option<LifecycleHandler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `kind`, returning the handler it replaces.
    pub fn on(&mut self, kind: EventKind, handler: Handler) -> Option<Handler> {
        self.handlers.insert(kind, handler)
    }

    pub fn off(&mut self, kind: EventKind) -> Option<Handler> {
        self.handlers.remove(&kind)
    }

    pub fn on_lifecycle(&mut self, handler: LifecycleHandler) -> Option<LifecycleHandler> {
        self.lifecycle.replace(handler)
    }

    pub fn handler_for(&self, kind: EventKind) -> Option<Handler> {
        self.handlers.get(&kind).cloned()
    }

    pub fn lifecycle_handler(&self) -> Option<LifecycleHandler> {
        self.lifecycle.clone()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty() && self.lifecycle.is_none()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
        self.lifecycle = None;
    }
}
