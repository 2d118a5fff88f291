use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use wamp_core::errors::{PeriodicError, ProtocolError};
use wamp_core::protocol::{expand_curie, WampMessage, PROTOCOL_VERSION};
use wamp_core::{Connection, ConnectionId, ConnectionInfo, TopicArg};

use crate::application::WampApplication;
use crate::config::WampSettings;
use crate::dispatcher::RpcError;
use crate::error::{Result, WampError};
use crate::events::spawn_event_logger;
use crate::periodic::{PeriodicRegistry, PeriodicSet};
use crate::transport::{self, ConnectionRegistry, TransportEvent};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub keepalive_interval: Duration,
    /// Capacity of the transport → event loop channel.
    pub event_queue: usize,
    pub server_ident: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            max_send_queue: 256,
            keepalive_interval: Duration::from_secs(30),
            event_queue: 1024,
            server_ident: format!("wampd/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &WampSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_send_queue: settings.server.max_send_queue,
            keepalive_interval: Duration::from_secs(settings.server.keepalive_interval_secs.max(1)),
            ..Default::default()
        }
    }
}

/// Shared state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub events: mpsc::Sender<TransportEvent>,
    pub keepalive: Duration,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let info = ConnectionInfo {
        remote_addr: Some(remote),
        query,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, info, state))
}

async fn handle_socket(socket: WebSocket, info: ConnectionInfo, state: AppState) {
    let (connection, rx) = state.registry.register(info);
    debug!(connection_id = %connection.id(), "websocket accepted");

    if state
        .events
        .send(TransportEvent::Open(connection.clone()))
        .await
        .is_err()
    {
        state.registry.unregister(connection.id());
        return;
    }

    transport::handle_ws_connection(
        socket,
        connection,
        rx,
        state.registry,
        state.events,
        state.keepalive,
    )
    .await;
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.registry.count(),
    }))
}

/// Owns the application and processes transport events one at a time.
pub struct EventLoop {
    app: WampApplication,
    prefixes: HashMap<ConnectionId, HashMap<String, String>>,
    server_ident: String,
}

impl EventLoop {
    pub fn new(app: WampApplication, server_ident: impl Into<String>) -> Self {
        Self {
            app,
            prefixes: HashMap::new(),
            server_ident: server_ident.into(),
        }
    }

    pub fn app(&self) -> &WampApplication {
        &self.app
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<TransportEvent>, mut stop: watch::Receiver<bool>) {
        loop {
            let event = tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = stop.changed() => break,
            };
            self.handle(event).await;
        }

        let remaining = self.app.open_connections();
        if !remaining.is_empty() {
            info!(connections = remaining.len(), "closing remaining connections");
        }
        for connection in &remaining {
            self.close(connection).await;
        }

        if let Err(e) = self.app.shutdown() {
            warn!(error = %e, "failed to clear identity cache");
        }
        info!("event loop stopped");
    }

    pub async fn handle(&mut self, event: TransportEvent) {
        if let TransportEvent::Message(connection, _) | TransportEvent::Error(connection, _) = &event {
            if !self.app.is_open(connection.id()) {
                debug!(connection_id = %connection.id(), "dropping event for closed connection");
                return;
            }
        }

        match event {
            TransportEvent::Open(connection) => self.open(&connection).await,
            TransportEvent::Message(connection, text) => {
                let outcome = match WampMessage::decode(&text) {
                    Ok(message) => self.dispatch(&connection, message).await,
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = outcome {
                    self.report(&connection, e);
                }
            }
            TransportEvent::Close(connection) => self.close(&connection).await,
            TransportEvent::Error(connection, message) => {
                self.report(&connection, WampError::Transport(message));
            }
        }
    }

    async fn open(&mut self, connection: &Connection) {
        self.app.on_open(connection);

        match self.app.clients().authenticate(connection).await {
            Ok(()) => {
                connection.send_message(&WampMessage::Welcome {
                    session_id: connection.session_id().to_string(),
                    protocol_version: PROTOCOL_VERSION,
                    server_ident: self.server_ident.clone(),
                });
            }
            Err(e) => {
                warn!(connection_id = %connection.id(), error = %e, "authentication failed, closing");
                self.app.reject(connection, &e);
                connection.close();
            }
        }
    }

    async fn close(&mut self, connection: &Connection) {
        self.app.on_close(connection).await;
        self.prefixes.remove(connection.id());
        if let Err(e) = self.app.clients().forget(connection) {
            warn!(connection_id = %connection.id(), error = %e, "failed to drop cached identity");
        }
    }

    fn report(&mut self, connection: &Connection, error: WampError) {
        warn!(
            connection_id = %connection.id(),
            kind = error.error_kind(),
            error = %error,
            "message rejected"
        );
        self.app.on_error(connection, &error);
    }

    fn expand(&self, connection: &Connection, topic: TopicArg) -> TopicArg {
        match (topic, self.prefixes.get(connection.id())) {
            (TopicArg::Uri(uri), Some(prefixes)) => TopicArg::Uri(expand_curie(&uri, prefixes)),
            (topic, _) => topic,
        }
    }

    async fn dispatch(&mut self, connection: &Connection, message: WampMessage) -> Result<()> {
        match message {
            WampMessage::Prefix { prefix, uri } => {
                self.prefixes
                    .entry(connection.id().clone())
                    .or_default()
                    .insert(prefix, uri);
                Ok(())
            }
            WampMessage::Subscribe { topic } => {
                let topic = self.expand(connection, topic);
                self.app.on_subscribe(connection, &topic).await
            }
            WampMessage::Unsubscribe { topic } => {
                let topic = self.expand(connection, topic);
                self.app.on_unsubscribe(connection, &topic).await
            }
            WampMessage::Publish {
                topic,
                event,
                exclude_me,
                mut exclude,
                eligible,
            } => {
                let topic = self.expand(connection, topic);
                if exclude_me {
                    exclude.push(connection.session_id().to_string());
                }
                self.app
                    .on_publish(connection, &topic, &event, &exclude, &eligible)
                    .await
            }
            WampMessage::Call {
                call_id,
                procedure,
                params,
            } => {
                let procedure = self.expand(connection, procedure);
                let outcome = self
                    .app
                    .on_call(connection, &call_id, &procedure, &params)
                    .await;
                if let Err(e) = &outcome {
                    let reply = RpcError {
                        error_uri: e.call_error_uri(),
                        description: e.to_string(),
                        details: None,
                    };
                    connection.send_message(&reply.into_message(&call_id));
                }
                outcome
            }
            other => Err(ProtocolError::Malformed(format!(
                "message type {} is not accepted from clients",
                other.message_type()
            ))
            .into()),
        }
    }
}

/// Start the HTTP/WebSocket server, the event loop and the periodics.
pub async fn start(
    config: ServerConfig,
    app: WampApplication,
    periodics: PeriodicRegistry,
) -> std::io::Result<ServerHandle> {
    let registry = Arc::new(ConnectionRegistry::new(config.max_send_queue));
    let (events_tx, events_rx) = mpsc::channel(config.event_queue.max(1));
    let (stop_tx, stop_rx) = watch::channel(false);

    let logger = spawn_event_logger(app.events().subscribe());
    let event_loop = tokio::spawn(
        EventLoop::new(app, config.server_ident.clone()).run(events_rx, stop_rx.clone()),
    );

    let router = build_router(AppState {
        registry: Arc::clone(&registry),
        events: events_tx,
        keepalive: config.keepalive_interval,
    });
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;

    let mut server_stop = stop_rx;
    let server = tokio::spawn(async move {
        let serve = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = server_stop.changed().await;
        });
        if let Err(e) = serve.await {
            warn!(error = %e, "server error");
        }
    });

    let periodics = periodics.start();
    info!(addr = %local_addr, periodics = periodics.len(), "wamp server started");

    Ok(ServerHandle {
        local_addr,
        registry,
        stop: stop_tx,
        server,
        event_loop,
        logger,
        periodics,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    stop: watch::Sender<bool>,
    server: JoinHandle<()>,
    event_loop: JoinHandle<()>,
    logger: JoinHandle<()>,
    periodics: PeriodicSet,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.count()
    }

    /// Resolves when a periodic task fails; never resolves otherwise.
    pub async fn periodic_failure(&mut self) -> PeriodicError {
        self.periodics.next_failure().await
    }

    /// Stop periodics, ask every socket to close and stop the event loop.
    ///
    /// The loop runs the regular close path (unsubscribe handlers, then
    /// `Disconnected`) for each connection it still holds, then clears the
    /// identity cache. Frames still queued behind the stop signal are dropped.
    pub async fn shutdown(mut self) {
        self.periodics.stop();
        let closing = self.registry.close_all();
        let _ = self.stop.send(true);

        if self.event_loop.await.is_err() {
            warn!("event loop panicked");
        }
        if tokio::time::timeout(Duration::from_secs(5), &mut self.server)
            .await
            .is_err()
        {
            warn!("server did not stop in time, aborting");
            self.server.abort();
        }
        let _ = tokio::time::timeout(Duration::from_secs(1), &mut self.logger).await;
        self.logger.abort();
        info!(closed = closing, "wamp server stopped");
    }
}
