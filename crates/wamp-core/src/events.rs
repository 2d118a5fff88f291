use crate::connection::Connection;
use crate::ids::ConnectionId;

/// Connection lifecycle notifications published on the event bus.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    Connected {
        connection: Connection,
    },
    Disconnected {
        connection: Connection,
    },
    /// Orthogonal to the lifecycle: the connection stays open.
    Error {
        connection: Connection,
        kind: &'static str,
        message: String,
    },
    /// Authentication failed right after the socket opened.
    Rejected {
        connection: Connection,
        reason: String,
    },
}

impl ClientEvent {
    pub fn connection(&self) -> &Connection {
        match self {
            Self::Connected { connection }
            | Self::Disconnected { connection }
            | Self::Error { connection, .. }
            | Self::Rejected { connection, .. } => connection,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        self.connection().id()
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "client_connected",
            Self::Disconnected { .. } => "client_disconnected",
            Self::Error { .. } => "client_error",
            Self::Rejected { .. } => "client_rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionInfo;

    #[test]
    fn event_type_strings() {
        let (conn, _rx) = Connection::open(ConnectionInfo::default(), 1);
        let events = [
            ClientEvent::Connected { connection: conn.clone() },
            ClientEvent::Disconnected { connection: conn.clone() },
            ClientEvent::Error {
                connection: conn.clone(),
                kind: "route_not_found",
                message: "no route".into(),
            },
            ClientEvent::Rejected {
                connection: conn.clone(),
                reason: "bad token".into(),
            },
        ];
        let types: Vec<_> = events.iter().map(ClientEvent::event_type).collect();
        assert_eq!(
            types,
            vec!["client_connected", "client_disconnected", "client_error", "client_rejected"]
        );
        assert!(events.iter().all(|e| e.connection_id() == conn.id()));
    }
}
