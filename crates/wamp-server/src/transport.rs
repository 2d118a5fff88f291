//! WebSocket plumbing: connection registry plus per-socket reader/writer
//! tasks feeding the event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use wamp_core::{Connection, ConnectionId, ConnectionInfo, Outbound};

/// Socket lifecycle as seen by the event loop.
#[derive(Debug)]
pub enum TransportEvent {
    Open(Connection),
    Message(Connection, String),
    Close(Connection),
    Error(Connection, String),
}

/// Live sockets, readable from any task (health checks, shutdown).
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new connection and return it with its outbound queue.
    pub fn register(&self, info: ConnectionInfo) -> (Connection, mpsc::Receiver<Outbound>) {
        let (connection, rx) = Connection::open(info, self.max_send_queue);
        self.connections
            .insert(connection.id().clone(), connection.clone());
        (connection, rx)
    }

    pub fn unregister(&self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Connection> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Ask every writer to close its socket.
    pub fn close_all(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().close())
            .count()
    }
}

/// Drive one socket until either side goes away, then report the close.
pub async fn handle_ws_connection(
    socket: WebSocket,
    connection: Connection,
    mut rx: mpsc::Receiver<Outbound>,
    registry: Arc<ConnectionRegistry>,
    events: mpsc::Sender<TransportEvent>,
    keepalive: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_conn = connection.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(keepalive);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                outbound = rx.recv() => match outbound {
                    Some(Outbound::Text(text)) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                },
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Default::default())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_conn.id(), "sent ping");
                }
            }
        }
    });

    let reader_conn = connection.clone();
    let reader_events = events.clone();
    let reader = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            let forwarded = match frame {
                Ok(WsMessage::Text(text)) => {
                    TransportEvent::Message(reader_conn.clone(), text.to_string())
                }
                Ok(WsMessage::Binary(_)) => TransportEvent::Error(
                    reader_conn.clone(),
                    "binary frames are not supported".into(),
                ),
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    let _ = reader_events
                        .send(TransportEvent::Error(reader_conn.clone(), e.to_string()))
                        .await;
                    break;
                }
            };
            if reader_events.send(forwarded).await.is_err() {
                break;
            }
        }
    });

    let mut writer = writer;
    let mut reader = reader;
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    registry.unregister(connection.id());
    let _ = events.send(TransportEvent::Close(connection)).await;
}
