use wamp_core::errors::{AuthError, DispatchError, ProtocolError, RouteError, StorageError};

/// Prefix of the error URIs sent in CALLERROR frames.
pub const ERROR_URI_BASE: &str = "http://wampd.local/error#";

#[derive(Debug, thiserror::Error)]
pub enum WampError {
    /// A topic-taking entry point received something that is not a topic URI.
    #[error("{operation} expects a topic URI, got {found}")]
    ContractViolation {
        operation: &'static str,
        found: &'static str,
    },

    /// The authentication provider returned without caching a token.
    #[error("identity for {key} still missing after re-authentication")]
    IdentityUnresolved { key: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(String),
}

impl WampError {
    /// Stable machine-readable kind, used in logs and error events.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ContractViolation { .. } => "contract_violation",
            Self::IdentityUnresolved { .. } => "identity_unresolved",
            Self::Storage(_) => "storage",
            Self::Auth(_) => "authentication",
            Self::Route(RouteError::NotFound(_)) => "route_not_found",
            Self::Route(RouteError::InvalidPattern { .. }) => "invalid_route",
            Self::Dispatch(DispatchError::HandlerNotFound { .. }) => "handler_not_found",
            Self::Dispatch(DispatchError::Rejected(_)) => "rejected",
            Self::Dispatch(DispatchError::Failed(_)) => "handler_failed",
            Self::Protocol(_) => "protocol",
            Self::Transport(_) => "transport",
        }
    }

    pub fn call_error_uri(&self) -> String {
        format!("{ERROR_URI_BASE}{}", self.error_kind())
    }
}

pub type Result<T> = std::result::Result<T, WampError>;
