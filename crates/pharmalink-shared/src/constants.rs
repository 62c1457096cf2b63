/// Application name
pub const APP_NAME: &str = "Pharmalink";

/// Hosted marketplace service
pub const DEFAULT_SERVICE_HOST: &str = "pharmacies-management.onrender.com";

/// Socket.IO endpoint path, Engine.IO protocol v4 over WebSocket
pub const SOCKET_PATH: &str = "/socket.io/?EIO=4&transport=websocket";

/// Maximum image attachment size in bytes
pub const MAX_IMAGE_SIZE: usize = 5_000_000;

/// Unread notifications kept for display
pub const NOTIFICATION_DISPLAY_LIMIT: usize = 5;

/// Unread counts above this are shown as "99+"
pub const BADGE_CAP: u64 = 99;

/// REST request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Socket handshake timeout in seconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Reconnect backoff bounds in milliseconds
pub const RECONNECT_MIN_MS: u64 = 500;
/// Lower bound for any configured reconnect delay.
pub const RECONNECT_FLOOR_MS: u64 = 1;
pub const RECONNECT_MAX_MS: u64 = 30_000;

/// Capacity of command and event channels
pub const CHANNEL_CAPACITY: usize = 256;
