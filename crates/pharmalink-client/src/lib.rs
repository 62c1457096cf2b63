pub mod config;
pub mod conversations;
pub mod delivery;
pub mod events;
pub mod notifications;
pub mod session;

mod bridge;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use conversations::ConversationStore;
pub use delivery::{DeliveryPipeline, ImageAttachment};
pub use events::{ClientEvent, EventBus};
pub use notifications::NotificationFeed;
pub use session::Session;

/// Install the global `fmt` subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("pharmalink_client=debug,pharmalink_net=debug,pharmalink_cli=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
