/// Identity cache failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// No live token under the key (never stored, removed, or past its TTL).
    #[error("client not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication failed for {provider}: {reason}")]
    Failed { provider: String, reason: String },
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("no route found for {0}")]
    NotFound(String),
    #[error("invalid route pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{kind} handler not found: {name}")]
    HandlerNotFound { kind: &'static str, name: String },
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("handler failed: {0}")]
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown message type: {0}")]
    UnknownMessageType(i64),
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum PeriodicError {
    #[error("{task} failed: {reason}")]
    TickFailed { task: String, reason: String },
}
