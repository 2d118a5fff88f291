use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one socket session, `conn_<uuid v7>`.
///
/// Doubles as the WAMP session id announced in WELCOME and referenced by
/// publish exclude/eligible lists, so it serializes as a bare string.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// Wrap a session id received from a peer without validating it.
    pub fn from_session(session_id: impl Into<String>) -> Self {
        Self(session_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
