use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::ids::ConnectionId;
use crate::protocol::WampMessage;

/// Item queued for a connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Handshake details captured by the transport when the socket is accepted.
#[derive(Clone, Debug, Default)]
pub struct ConnectionInfo {
    pub remote_addr: Option<SocketAddr>,
    pub query: HashMap<String, String>,
}

/// Cheap-to-clone handle for one live socket session.
///
/// Equality is by id; the handle carries no subscription state of its own.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    info: ConnectionInfo,
    tx: mpsc::Sender<Outbound>,
}

impl Connection {
    /// Create a handle with a fresh id and a bounded outbound queue.
    pub fn open(info: ConnectionInfo, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        Self::open_with_id(ConnectionId::new(), info, capacity)
    }

    pub fn open_with_id(
        id: ConnectionId,
        info: ConnectionInfo,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Self {
            inner: Arc::new(Inner { id, info, tx }),
        };
        (conn, rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.inner.id
    }

    /// WAMP session id announced to the peer.
    pub fn session_id(&self) -> &str {
        self.inner.id.as_str()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.info.remote_addr
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.inner.info.query.get(key).map(String::as_str)
    }

    /// Queue a raw text frame. Returns false when the queue is full or the
    /// writer is gone; a full queue drops the frame.
    pub fn send(&self, frame: String) -> bool {
        match self.inner.tx.try_send(Outbound::Text(frame)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %self.inner.id, "send queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn send_message(&self, message: &WampMessage) -> bool {
        self.send(message.encode())
    }

    /// Ask the writer task to close the socket.
    pub fn close(&self) -> bool {
        self.inner.tx.try_send(Outbound::Close).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.tx.is_closed()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.info.remote_addr)
            .finish()
    }
}
