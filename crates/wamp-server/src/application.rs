//! Protocol state machine: turns connection lifecycle events into routed
//! dispatch calls and owns per-connection subscription bookkeeping.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, info, warn};

use wamp_core::events::ClientEvent;
use wamp_core::{Connection, ConnectionId, Route, TopicArg};

use crate::clients::ClientQuery;
use crate::dispatcher::{HandlerContext, RpcDispatcher, TopicDispatcher};
use crate::error::{Result, WampError};
use crate::events::EventBus;
use crate::router::WampRouter;
use crate::topics::TopicRegistry;

/// Ordered topic URIs each open connection is subscribed to.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: HashMap<ConnectionId, Vec<String>>,
}

impl SubscriptionTable {
    pub fn open(&mut self, id: &ConnectionId) {
        self.entries.entry(id.clone()).or_default();
    }

    /// Returns false if the topic was already recorded.
    pub fn record(&mut self, id: &ConnectionId, uri: &str) -> bool {
        let topics = self.entries.entry(id.clone()).or_default();
        if topics.iter().any(|t| t == uri) {
            return false;
        }
        topics.push(uri.to_string());
        true
    }

    pub fn forget(&mut self, id: &ConnectionId, uri: &str) -> bool {
        match self.entries.get_mut(id) {
            Some(topics) => {
                let before = topics.len();
                topics.retain(|t| t != uri);
                before != topics.len()
            }
            None => false,
        }
    }

    pub fn topics(&self, id: &ConnectionId) -> &[String] {
        self.entries.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Remove the connection's entry, handing back its topics in order.
    pub fn close(&mut self, id: &ConnectionId) -> Vec<String> {
        self.entries.remove(id).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Owned by the single event loop; every entry point takes `&mut self`.
pub struct WampApplication {
    clients: ClientQuery,
    router: WampRouter,
    topic_dispatcher: TopicDispatcher,
    rpc_dispatcher: RpcDispatcher,
    topics: TopicRegistry,
    subscriptions: SubscriptionTable,
    connections: HashMap<ConnectionId, Connection>,
    events: EventBus,
}

fn require_uri<'a>(operation: &'static str, topic: &'a TopicArg) -> Result<&'a str> {
    topic.uri().ok_or(WampError::ContractViolation {
        operation,
        found: topic.describe(),
    })
}

impl WampApplication {
    pub fn new(
        clients: ClientQuery,
        router: WampRouter,
        topic_dispatcher: TopicDispatcher,
        rpc_dispatcher: RpcDispatcher,
        events: EventBus,
    ) -> Self {
        Self {
            clients,
            router,
            topic_dispatcher,
            rpc_dispatcher,
            topics: TopicRegistry::new(),
            subscriptions: SubscriptionTable::default(),
            connections: HashMap::new(),
            events,
        }
    }

    pub fn clients(&self) -> &ClientQuery {
        &self.clients
    }

    pub fn topics(&self) -> &TopicRegistry {
        &self.topics
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_open(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connections opened and not yet closed, in no particular order.
    pub fn open_connections(&self) -> Vec<Connection> {
        self.connections.values().cloned().collect()
    }

    fn context(&self) -> HandlerContext<'_> {
        HandlerContext {
            clients: &self.clients,
            topics: &self.topics,
        }
    }

    /// Identity label for log lines, from the cache only.
    fn identity_label(&self, connection: &Connection) -> String {
        self.clients
            .cached_identity(connection)
            .map(|token| token.label().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn on_open(&mut self, connection: &Connection) {
        self.connections
            .insert(connection.id().clone(), connection.clone());
        self.subscriptions.open(connection.id());
        self.events.emit(ClientEvent::Connected {
            connection: connection.clone(),
        });
    }

    pub async fn on_subscribe(&mut self, connection: &Connection, topic: &TopicArg) -> Result<()> {
        let uri = require_uri("subscribe", topic)?;
        let route = self.router.match_route(uri)?;

        let recorded = self.subscriptions.record(connection.id(), uri);
        self.topics.subscribe(uri, connection.clone());

        info!(
            connection_id = %connection.id(),
            identity = %self.identity_label(connection),
            topic = %uri,
            "connection subscribed to topic"
        );

        let snapshot = self.topics.snapshot(uri);
        let outcome = self
            .topic_dispatcher
            .subscribe(&self.context(), connection, &snapshot, &route)
            .await;

        if let Err(e) = outcome {
            if recorded {
                self.subscriptions.forget(connection.id(), uri);
                self.topics.unsubscribe(uri, connection.id());
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn on_unsubscribe(&mut self, connection: &Connection, topic: &TopicArg) -> Result<()> {
        let uri = require_uri("unsubscribe", topic)?;
        let route = self.router.match_route(uri)?;

        self.subscriptions.forget(connection.id(), uri);
        self.topics.unsubscribe(uri, connection.id());

        info!(
            connection_id = %connection.id(),
            identity = %self.identity_label(connection),
            topic = %uri,
            "connection unsubscribed from topic"
        );

        let snapshot = self.topics.snapshot(uri);
        self.topic_dispatcher
            .unsubscribe(&self.context(), connection, &snapshot, &route)
            .await?;
        Ok(())
    }

    /// Exclude and eligible lists are passed to the handler untouched.
    pub async fn on_publish(
        &mut self,
        connection: &Connection,
        topic: &TopicArg,
        event: &Value,
        exclude: &[String],
        eligible: &[String],
    ) -> Result<()> {
        let uri = require_uri("publish", topic)?;
        let route = self.router.match_route(uri)?;

        debug!(
            connection_id = %connection.id(),
            identity = %self.identity_label(connection),
            topic = %uri,
            "connection published to topic"
        );

        let snapshot = self.topics.snapshot(uri);
        self.topic_dispatcher
            .publish(
                &self.context(),
                connection,
                &snapshot,
                &route,
                event,
                exclude,
                eligible,
            )
            .await?;
        Ok(())
    }

    pub async fn on_call(
        &mut self,
        connection: &Connection,
        call_id: &str,
        procedure: &TopicArg,
        params: &[Value],
    ) -> Result<()> {
        let uri = require_uri("call", procedure)?;
        let route = self.router.match_route(uri)?;

        self.rpc_dispatcher
            .dispatch(&self.context(), connection, call_id, &route, params)
            .await?;
        Ok(())
    }

    /// Unsubscribe the connection from every topic it still holds, in
    /// subscription order, then announce the disconnect.
    pub async fn on_close(&mut self, connection: &Connection) {
        let snapshot = self.subscriptions.close(connection.id());

        for uri in &snapshot {
            self.topics.unsubscribe(uri, connection.id());

            let route: Route = match self.router.match_route(uri) {
                Ok(route) => route,
                Err(e) => {
                    warn!(connection_id = %connection.id(), topic = %uri, error = %e, "no route while closing");
                    continue;
                }
            };

            let topic = self.topics.snapshot(uri);
            if let Err(e) = self
                .topic_dispatcher
                .unsubscribe(&self.context(), connection, &topic, &route)
                .await
            {
                warn!(connection_id = %connection.id(), topic = %uri, error = %e, "unsubscribe on close failed");
            }
        }

        self.connections.remove(connection.id());
        self.events.emit(ClientEvent::Disconnected {
            connection: connection.clone(),
        });
    }

    /// Report an error for a connection; the connection stays open.
    pub fn on_error(&mut self, connection: &Connection, error: &WampError) {
        self.events.emit(ClientEvent::Error {
            connection: connection.clone(),
            kind: error.error_kind(),
            message: error.to_string(),
        });
    }

    /// Authentication failed right after open.
    pub fn reject(&mut self, connection: &Connection, error: &WampError) {
        self.events.emit(ClientEvent::Rejected {
            connection: connection.clone(),
            reason: error.to_string(),
        });
    }

    /// Drop every cached identity. Called once when the server stops.
    pub fn shutdown(&mut self) -> Result<()> {
        self.connections.clear();
        self.clients.storage().remove_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::broadcast;
    use wamp_core::errors::{DispatchError, RouteError};
    use wamp_core::{ConnectionInfo, PubSubRouter, RouteDefinition, Topic};

    use crate::auth::{Authenticator, StaticTokenProvider};
    use crate::cache::ClientStorage;
    use crate::config::TokenSettings;
    use crate::dispatcher::{RpcError, RpcHandler, TopicHandler};
    use crate::router::PatternRouter;

    /// Router wrapper counting how often matching was attempted.
    struct CountingRouter {
        inner: PatternRouter,
        calls: AtomicUsize,
    }

    impl PubSubRouter for CountingRouter {
        fn match_uri(&self, uri: &str) -> std::result::Result<Route, RouteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.match_uri(uri)
        }
    }

    /// Records handler calls and, on each one, drains pending bus events
    /// so the log shows their relative order.
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        events: Mutex<broadcast::Receiver<ClientEvent>>,
        reject_secure: bool,
    }

    impl Recorder {
        fn note(&self, entry: String) {
            let mut log = self.log.lock();
            let mut events = self.events.lock();
            while let Ok(event) = events.try_recv() {
                log.push(format!("event:{}", event.event_type()));
            }
            log.push(entry);
        }
    }

    #[async_trait]
    impl TopicHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn secure(
            &self,
            _ctx: &HandlerContext<'_>,
            _connection: &Connection,
            topic: &Topic,
            _route: &Route,
        ) -> std::result::Result<(), DispatchError> {
            if self.reject_secure && topic.id().starts_with("vip/") {
                return Err(DispatchError::Rejected("vip only".into()));
            }
            Ok(())
        }

        async fn on_subscribe(
            &self,
            _ctx: &HandlerContext<'_>,
            _connection: &Connection,
            topic: &Topic,
            _route: &Route,
        ) -> std::result::Result<(), DispatchError> {
            self.note(format!("subscribe:{}", topic.id()));
            Ok(())
        }

        async fn on_unsubscribe(
            &self,
            _ctx: &HandlerContext<'_>,
            _connection: &Connection,
            topic: &Topic,
            _route: &Route,
        ) -> std::result::Result<(), DispatchError> {
            self.note(format!("unsubscribe:{}", topic.id()));
            Ok(())
        }

        async fn on_publish(
            &self,
            _ctx: &HandlerContext<'_>,
            _connection: &Connection,
            topic: &Topic,
            _route: &Route,
            event: &Value,
            exclude: &[String],
            eligible: &[String],
        ) -> std::result::Result<(), DispatchError> {
            self.note(format!(
                "publish:{}:{}:{}:{}",
                topic.id(),
                event,
                exclude.join(","),
                eligible.join(",")
            ));
            Ok(())
        }
    }

    struct Echo {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl RpcHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn call(
            &self,
            _ctx: &HandlerContext<'_>,
            _connection: &Connection,
            route: &Route,
            params: &[Value],
        ) -> std::result::Result<Value, RpcError> {
            self.log.lock().push(format!("call:{}", route.name));
            Ok(Value::Array(params.to_vec()))
        }
    }

    struct Harness {
        app: WampApplication,
        log: Arc<Mutex<Vec<String>>>,
        router: Arc<CountingRouter>,
        bus: broadcast::Receiver<ClientEvent>,
    }

    impl Harness {
        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }

        fn drain_events(&mut self) -> Vec<&'static str> {
            let mut seen = Vec::new();
            while let Ok(event) = self.bus.try_recv() {
                seen.push(event.event_type());
            }
            seen
        }
    }

    fn harness() -> Harness {
        let mut patterns = PatternRouter::new();
        patterns
            .add("room", RouteDefinition::new("room/{id}", "recorder"))
            .unwrap();
        patterns
            .add("vip", RouteDefinition::new("vip/{id}", "recorder"))
            .unwrap();
        patterns
            .add("orphan", RouteDefinition::new("orphan/{id}", "unregistered"))
            .unwrap();
        patterns
            .add("echo", RouteDefinition::new("rpc/echo", "echo"))
            .unwrap();
        let router = Arc::new(CountingRouter {
            inner: patterns,
            calls: AtomicUsize::new(0),
        });

        let events = EventBus::new(64);
        let log = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::new(Recorder {
            log: log.clone(),
            events: Mutex::new(events.subscribe()),
            reject_secure: true,
        });

        let storage = ClientStorage::in_memory();
        let tokens = HashMap::from([(
            "alice-token".to_string(),
            TokenSettings {
                username: "alice".into(),
                roles: vec!["USER".into()],
            },
        )]);
        let auth = Authenticator::new(storage.clone())
            .with_provider(Arc::new(StaticTokenProvider::new(tokens)));
        let clients = ClientQuery::new(storage, Arc::new(auth));

        let app = WampApplication::new(
            clients,
            WampRouter::new(router.clone()),
            TopicDispatcher::new().with_handler(recorder),
            RpcDispatcher::new().with_handler(Arc::new(Echo { log: log.clone() })),
            events.clone(),
        );

        Harness {
            app,
            log,
            router,
            bus: events.subscribe(),
        }
    }

    fn connection() -> Connection {
        Connection::open(ConnectionInfo::default(), 16).0
    }

    fn uri(s: &str) -> TopicArg {
        TopicArg::from(s)
    }

    #[tokio::test]
    async fn open_emits_connected_without_dispatch() {
        let mut h = harness();
        let conn = connection();
        h.app.on_open(&conn);

        assert!(h.app.is_open(conn.id()));
        assert_eq!(h.drain_events(), vec!["client_connected"]);
        assert!(h.log().is_empty());
        assert_eq!(h.router.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn subscribe_records_topic_and_dispatches() {
        let mut h = harness();
        let conn = connection();
        h.app.on_open(&conn);
        h.app.on_subscribe(&conn, &uri("room/1")).await.unwrap();

        assert_eq!(h.app.subscriptions().topics(conn.id()), ["room/1".to_string()]);
        assert!(h.app.topics().get("room/1").unwrap().contains(conn.id()));
        assert_eq!(h.log(), vec!["event:client_connected", "subscribe:room/1"]);
    }

    #[tokio::test]
    async fn malformed_topic_never_reaches_router_or_dispatcher() {
        let mut h = harness();
        let conn = connection();
        h.app.on_open(&conn);

        let bad = TopicArg::from_value(json!(42));
        let errors = vec![
            h.app.on_subscribe(&conn, &bad).await.unwrap_err(),
            h.app.on_unsubscribe(&conn, &bad).await.unwrap_err(),
            h.app
                .on_publish(&conn, &bad, &json!("hi"), &[], &[])
                .await
                .unwrap_err(),
            h.app.on_call(&conn, "c1", &bad, &[]).await.unwrap_err(),
        ];

        for (err, op) in errors.iter().zip(["subscribe", "unsubscribe", "publish", "call"]) {
            match err {
                WampError::ContractViolation { operation, found } => {
                    assert_eq!(*operation, op);
                    assert_eq!(*found, "number");
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(h.router.calls.load(Ordering::SeqCst), 0);
        assert!(h.log().is_empty());
        assert!(h.app.subscriptions().topics(conn.id()).is_empty());
    }

    #[tokio::test]
    async fn unknown_route_is_rejected_without_state_change() {
        let mut h = harness();
        let conn = connection();
        h.app.on_open(&conn);

        let err = h.app.on_subscribe(&conn, &uri("nowhere/1")).await.unwrap_err();
        assert_eq!(err.error_kind(), "route_not_found");
        assert!(h.app.subscriptions().topics(conn.id()).is_empty());
        assert!(h.app.topics().is_empty());
    }

    #[tokio::test]
    async fn missing_handler_rolls_back_subscription() {
        let mut h = harness();
        let conn = connection();
        h.app.on_open(&conn);

        let err = h.app.on_subscribe(&conn, &uri("orphan/1")).await.unwrap_err();
        assert_eq!(err.error_kind(), "handler_not_found");
        assert!(h.app.subscriptions().topics(conn.id()).is_empty());
        assert!(h.app.topics().get("orphan/1").is_none());
    }

    #[tokio::test]
    async fn secure_rejection_rolls_back_subscription() {
        let mut h = harness();
        let conn = connection();
        h.app.on_open(&conn);

        let err = h.app.on_subscribe(&conn, &uri("vip/1")).await.unwrap_err();
        assert_eq!(err.error_kind(), "rejected");
        assert!(h.app.subscriptions().topics(conn.id()).is_empty());
        assert!(h.app.topics().get("vip/1").is_none());
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_leaves_get_all_empty() {
        let mut h = harness();
        let conn = connection();
        let other = connection();
        h.app.on_open(&conn);
        h.app.on_open(&other);
        h.app.clients().authenticate(&conn).await.unwrap();

        h.app.on_subscribe(&other, &uri("room/1")).await.unwrap();
        h.app.on_subscribe(&conn, &uri("room/1")).await.unwrap();
        h.app.on_unsubscribe(&conn, &uri("room/1")).await.unwrap();

        let topic = h.app.topics().snapshot("room/1");
        let everyone = h.app.clients().get_all(&topic, true).await.unwrap();
        assert!(everyone.iter().all(|(_, c)| c != &conn));
        let named = h.app.clients().get_all(&topic, false).await.unwrap();
        assert!(named.is_empty());
        assert!(h.app.subscriptions().topics(conn.id()).is_empty());
    }

    #[tokio::test]
    async fn publish_passes_lists_through_unmodified() {
        let mut h = harness();
        let conn = connection();
        h.app.on_open(&conn);

        let exclude = vec!["conn_a".to_string(), "conn_b".to_string()];
        let eligible = vec!["conn_c".to_string()];
        h.app
            .on_publish(&conn, &uri("room/9"), &json!({"msg": "hi"}), &exclude, &eligible)
            .await
            .unwrap();

        assert_eq!(
            h.log().last().unwrap(),
            r#"publish:room/9:{"msg":"hi"}:conn_a,conn_b:conn_c"#
        );
    }

    #[tokio::test]
    async fn call_routes_to_rpc_handler() {
        let mut h = harness();
        let (conn, mut rx) = Connection::open(ConnectionInfo::default(), 4);
        h.app.on_open(&conn);

        h.app
            .on_call(&conn, "c7", &uri("rpc/echo"), &[json!(1), json!("two")])
            .await
            .unwrap();

        assert_eq!(h.log(), vec!["call:echo"]);
        match rx.try_recv().unwrap() {
            wamp_core::Outbound::Text(frame) => {
                let value: Value = serde_json::from_str(&frame).unwrap();
                assert_eq!(value, json!([3, "c7", [1, "two"]]));
            }
            other => panic!("unexpected outbound: {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_unsubscribes_each_topic_once_before_disconnect() {
        let mut h = harness();
        let conn = connection();
        h.app.on_open(&conn);
        h.app.on_subscribe(&conn, &uri("room/1")).await.unwrap();
        h.app.on_subscribe(&conn, &uri("room/2")).await.unwrap();

        h.app.on_close(&conn).await;

        // Drain whatever the recorder has not seen yet.
        let mut log = h.log();
        for event in h.drain_events().into_iter().skip(1) {
            log.push(format!("event:{event}"));
        }
        assert_eq!(
            log,
            vec![
                "event:client_connected",
                "subscribe:room/1",
                "subscribe:room/2",
                "unsubscribe:room/1",
                "unsubscribe:room/2",
                "event:client_disconnected",
            ]
        );
        assert!(h.app.topics().is_empty());
        assert!(!h.app.is_open(conn.id()));
        assert!(h.app.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn error_is_reported_without_cleanup() {
        let mut h = harness();
        let conn = connection();
        h.app.on_open(&conn);
        h.app.on_subscribe(&conn, &uri("room/1")).await.unwrap();
        h.drain_events();

        h.app
            .on_error(&conn, &WampError::Transport("reset by peer".into()));

        assert_eq!(h.drain_events(), vec!["client_error"]);
        assert!(h.app.is_open(conn.id()));
        assert_eq!(h.app.subscriptions().topics(conn.id()).len(), 1);
    }

    #[tokio::test]
    async fn shutdown_clears_identity_cache() {
        let mut h = harness();
        let conn = connection();
        h.app.on_open(&conn);
        h.app.clients().authenticate(&conn).await.unwrap();
        assert!(h.app.clients().cached_identity(&conn).is_some());

        h.app.shutdown().unwrap();
        assert!(h.app.clients().cached_identity(&conn).is_none());
        assert_eq!(h.app.connection_count(), 0);
    }

    #[test]
    fn subscription_table_keeps_order_and_uniqueness() {
        let mut table = SubscriptionTable::default();
        let id = ConnectionId::new();
        table.open(&id);
        assert!(table.record(&id, "a"));
        assert!(table.record(&id, "b"));
        assert!(!table.record(&id, "a"));
        assert_eq!(table.topics(&id), ["a".to_string(), "b".to_string()]);

        assert!(table.forget(&id, "a"));
        assert!(!table.forget(&id, "a"));
        assert_eq!(table.close(&id), vec!["b".to_string()]);
        assert!(table.is_empty());
    }
}
