// Real-time transport layer: Socket.IO over WebSocket plus the REST client.

pub mod api;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod presence;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use api::{HttpApi, RestApi};
pub use connection::{ConnectionConfig, ConnectionManager};
pub use error::ConnectionError;
pub use handlers::{Handler, HandlerTable, Lifecycle, LifecycleHandler};
pub use presence::{PresenceStatus, PresenceTracker};
pub use transport::{socket_url_for, Dialer, Link, WsDialer};
