use tokio::sync::broadcast;
use tracing::{info, trace, warn};

use wamp_core::events::ClientEvent;

/// Fire-and-forget fan-out of connection lifecycle events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no listeners is not an error.
    pub fn emit(&self, event: ClientEvent) {
        let event_type = event.event_type();
        if self.tx.send(event).is_err() {
            trace!(event_type, "no event listeners");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Log every lifecycle event until the bus closes.
pub fn spawn_event_logger(mut rx: broadcast::Receiver<ClientEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event logger lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("event bus closed");
                    break;
                }
            }
        }
    })
}

fn log_event(event: &ClientEvent) {
    let connection = event.connection();
    let remote = connection
        .remote_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    match event {
        ClientEvent::Connected { .. } => {
            info!(connection_id = %connection.id(), remote = %remote, "client connected");
        }
        ClientEvent::Disconnected { .. } => {
            info!(connection_id = %connection.id(), remote = %remote, "client disconnected");
        }
        ClientEvent::Error { kind, message, .. } => {
            warn!(connection_id = %connection.id(), kind, error = %message, "client error");
        }
        ClientEvent::Rejected { reason, .. } => {
            warn!(connection_id = %connection.id(), remote = %remote, reason = %reason, "client rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wamp_core::{Connection, ConnectionInfo};

    #[test]
    fn emit_without_listeners_is_fine() {
        let bus = EventBus::new(4);
        let (conn, _rx) = Connection::open(ConnectionInfo::default(), 1);
        bus.emit(ClientEvent::Connected { connection: conn });
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let (conn, _out) = Connection::open(ConnectionInfo::default(), 1);

        bus.emit(ClientEvent::Connected {
            connection: conn.clone(),
        });
        bus.emit(ClientEvent::Disconnected {
            connection: conn.clone(),
        });

        assert_eq!(rx.recv().await.unwrap().event_type(), "client_connected");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event_type(), "client_disconnected");
        assert_eq!(second.connection_id(), conn.id());
    }

    #[tokio::test]
    async fn logger_stops_when_bus_is_dropped() {
        let bus = EventBus::new(4);
        let handle = spawn_event_logger(bus.subscribe());
        let (conn, _out) = Connection::open(ConnectionInfo::default(), 1);
        bus.emit(ClientEvent::Rejected {
            connection: conn,
            reason: "bad token".into(),
        });
        drop(bus);
        handle.await.unwrap();
    }
}
