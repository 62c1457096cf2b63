use thiserror::Error;

use pharmalink_shared::{AuthError, TransportError};

/// Why a socket session could not be established or ended.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The server refused the credential. Retrying will not help.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Anything else; the connection task retries with backoff.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
