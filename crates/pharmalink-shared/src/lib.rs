// Types, wire protocol and error taxonomy shared by every Pharmalink crate.

pub mod constants;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;

pub use error::{AuthError, ClientError, FetchError, SendError, TransportError, ValidationError};
pub use types::*;
