use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Request failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No credential provided")]
    MissingCredential,

    #[error("Malformed credential: {0}")]
    MalformedCredential(String),

    #[error("Credential carries no pharmacy id")]
    MissingSubject,

    #[error("Credential expired")]
    Expired,

    #[error("Handshake rejected by server: {0}")]
    Rejected(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to reach socket server: {0}")]
    Unreachable(String),

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed")]
    Closed,

    #[error("Outbound queue full")]
    QueueFull,
}

/// A failed REST call. `Clone` so one in-flight result can reach every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request timed out")]
    Timeout,

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response body: {0}")]
    Decode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message has neither text nor image")]
    EmptyMessage,

    #[error("Image too large: {size} bytes (max {max})")]
    ImageTooLarge { size: usize, max: usize },

    #[error("No pharmacy selected")]
    NoCounterparty,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to send message: {0}")]
    Fetch(#[from] FetchError),
}

impl From<SendError> for ClientError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::Validation(v) => Self::Validation(v),
            SendError::Fetch(f) => Self::Fetch(f),
        }
    }
}
