//! Handler registries keyed by route callback name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use wamp_core::errors::DispatchError;
use wamp_core::protocol::WampMessage;
use wamp_core::{Connection, Route, Topic};

use crate::clients::ClientQuery;
use crate::error::{WampError, ERROR_URI_BASE};
use crate::topics::TopicRegistry;

/// Read-only view of server state handed to application handlers.
pub struct HandlerContext<'a> {
    pub clients: &'a ClientQuery,
    pub topics: &'a TopicRegistry,
}

#[async_trait]
pub trait TopicHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Gate run before `on_subscribe`; an error refuses the subscription.
    async fn secure(
        &self,
        _ctx: &HandlerContext<'_>,
        _connection: &Connection,
        _topic: &Topic,
        _route: &Route,
    ) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn on_subscribe(
        &self,
        ctx: &HandlerContext<'_>,
        connection: &Connection,
        topic: &Topic,
        route: &Route,
    ) -> Result<(), DispatchError>;

    async fn on_unsubscribe(
        &self,
        ctx: &HandlerContext<'_>,
        connection: &Connection,
        topic: &Topic,
        route: &Route,
    ) -> Result<(), DispatchError>;

    #[allow(clippy::too_many_arguments)]
    async fn on_publish(
        &self,
        ctx: &HandlerContext<'_>,
        connection: &Connection,
        topic: &Topic,
        route: &Route,
        event: &Value,
        exclude: &[String],
        eligible: &[String],
    ) -> Result<(), DispatchError>;
}

/// Failure reported back to the caller in a CALLERROR frame.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    pub error_uri: String,
    pub description: String,
    pub details: Option<Value>,
}

impl RpcError {
    pub fn new(kind: &str, description: impl Into<String>) -> Self {
        Self {
            error_uri: format!("{ERROR_URI_BASE}{kind}"),
            description: description.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn into_message(self, call_id: &str) -> WampMessage {
        WampMessage::CallError {
            call_id: call_id.to_string(),
            error_uri: self.error_uri,
            description: self.description,
            details: self.details,
        }
    }
}

impl From<WampError> for RpcError {
    fn from(e: WampError) -> Self {
        Self {
            error_uri: e.call_error_uri(),
            description: e.to_string(),
            details: None,
        }
    }
}

impl From<DispatchError> for RpcError {
    fn from(e: DispatchError) -> Self {
        WampError::from(e).into()
    }
}

#[async_trait]
pub trait RpcHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn call(
        &self,
        ctx: &HandlerContext<'_>,
        connection: &Connection,
        route: &Route,
        params: &[Value],
    ) -> Result<Value, RpcError>;
}

#[derive(Default)]
pub struct TopicDispatcher {
    handlers: HashMap<String, Arc<dyn TopicHandler>>,
}

impl TopicDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn TopicHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn TopicHandler>) -> Self {
        self.register(handler);
        self
    }

    fn lookup(&self, route: &Route) -> Result<&Arc<dyn TopicHandler>, DispatchError> {
        self.handlers
            .get(route.handler())
            .ok_or_else(|| DispatchError::HandlerNotFound {
                kind: "topic",
                name: route.handler().to_string(),
            })
    }

    pub async fn subscribe(
        &self,
        ctx: &HandlerContext<'_>,
        connection: &Connection,
        topic: &Topic,
        route: &Route,
    ) -> Result<(), DispatchError> {
        let handler = self.lookup(route)?;
        handler.secure(ctx, connection, topic, route).await?;
        handler.on_subscribe(ctx, connection, topic, route).await
    }

    pub async fn unsubscribe(
        &self,
        ctx: &HandlerContext<'_>,
        connection: &Connection,
        topic: &Topic,
        route: &Route,
    ) -> Result<(), DispatchError> {
        self.lookup(route)?
            .on_unsubscribe(ctx, connection, topic, route)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn publish(
        &self,
        ctx: &HandlerContext<'_>,
        connection: &Connection,
        topic: &Topic,
        route: &Route,
        event: &Value,
        exclude: &[String],
        eligible: &[String],
    ) -> Result<(), DispatchError> {
        self.lookup(route)?
            .on_publish(ctx, connection, topic, route, event, exclude, eligible)
            .await
    }
}

#[derive(Default)]
pub struct RpcDispatcher {
    handlers: HashMap<String, Arc<dyn RpcHandler>>,
}

impl RpcDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn RpcHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn RpcHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Run the handler and answer the caller with CALLRESULT or CALLERROR.
    /// Only a missing handler is returned as an error.
    pub async fn dispatch(
        &self,
        ctx: &HandlerContext<'_>,
        connection: &Connection,
        call_id: &str,
        route: &Route,
        params: &[Value],
    ) -> Result<(), DispatchError> {
        let handler = self
            .handlers
            .get(route.handler())
            .ok_or_else(|| DispatchError::HandlerNotFound {
                kind: "rpc",
                name: route.handler().to_string(),
            })?;

        let reply = match handler.call(ctx, connection, route, params).await {
            Ok(result) => {
                debug!(connection_id = %connection.id(), call_id, route = %route.name, "call succeeded");
                WampMessage::CallResult {
                    call_id: call_id.to_string(),
                    result,
                }
            }
            Err(e) => {
                warn!(
                    connection_id = %connection.id(),
                    call_id,
                    route = %route.name,
                    error = %e.description,
                    "call failed"
                );
                e.into_message(call_id)
            }
        };
        connection.send_message(&reply);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use wamp_core::{ConnectionInfo, Outbound, RouteDefinition};

    use crate::cache::ClientStorage;
    use crate::clients::ClientQuery;

    struct NoopAuth;

    #[async_trait]
    impl crate::auth::AuthenticationProvider for NoopAuth {
        async fn authenticate(&self, _c: &Connection) -> Result<(), wamp_core::errors::AuthError> {
            Ok(())
        }
    }

    struct Gated {
        allow: bool,
        subscribed: AtomicUsize,
    }

    #[async_trait]
    impl TopicHandler for Gated {
        fn name(&self) -> &str {
            "gated"
        }

        async fn secure(
            &self,
            _ctx: &HandlerContext<'_>,
            _connection: &Connection,
            _topic: &Topic,
            _route: &Route,
        ) -> Result<(), DispatchError> {
            if self.allow {
                Ok(())
            } else {
                Err(DispatchError::Rejected("members only".into()))
            }
        }

        async fn on_subscribe(
            &self,
            _ctx: &HandlerContext<'_>,
            _connection: &Connection,
            _topic: &Topic,
            _route: &Route,
        ) -> Result<(), DispatchError> {
            self.subscribed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_unsubscribe(
            &self,
            _ctx: &HandlerContext<'_>,
            _connection: &Connection,
            _topic: &Topic,
            _route: &Route,
        ) -> Result<(), DispatchError> {
            Ok(())
        }

        async fn on_publish(
            &self,
            _ctx: &HandlerContext<'_>,
            _connection: &Connection,
            _topic: &Topic,
            _route: &Route,
            _event: &Value,
            _exclude: &[String],
            _eligible: &[String],
        ) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    struct Adder;

    #[async_trait]
    impl RpcHandler for Adder {
        fn name(&self) -> &str {
            "adder"
        }

        async fn call(
            &self,
            _ctx: &HandlerContext<'_>,
            _connection: &Connection,
            _route: &Route,
            params: &[Value],
        ) -> Result<Value, RpcError> {
            let mut sum = 0;
            for p in params {
                sum += p
                    .as_i64()
                    .ok_or_else(|| RpcError::new("invalid_argument", "numbers only").with_details(p.clone()))?;
            }
            Ok(json!(sum))
        }
    }

    fn route(handler: &str) -> Route {
        Route {
            name: "test".into(),
            definition: Arc::new(RouteDefinition::new("test", handler)),
            params: HashMap::new(),
        }
    }

    fn fixtures() -> (ClientQuery, TopicRegistry) {
        (
            ClientQuery::new(ClientStorage::in_memory(), Arc::new(NoopAuth)),
            TopicRegistry::new(),
        )
    }

    fn next_frame(rx: &mut tokio::sync::mpsc::Receiver<Outbound>) -> Value {
        match rx.try_recv().unwrap() {
            Outbound::Text(text) => serde_json::from_str(&text).unwrap(),
            Outbound::Close => panic!("unexpected close"),
        }
    }

    #[tokio::test]
    async fn unknown_topic_handler_is_reported() {
        let (clients, topics) = fixtures();
        let ctx = HandlerContext {
            clients: &clients,
            topics: &topics,
        };
        let (conn, _rx) = Connection::open(ConnectionInfo::default(), 4);
        let err = TopicDispatcher::new()
            .subscribe(&ctx, &conn, &Topic::new("t"), &route("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::HandlerNotFound { kind: "topic", .. }));
    }

    #[tokio::test]
    async fn secure_rejection_skips_on_subscribe() {
        let (clients, topics) = fixtures();
        let ctx = HandlerContext {
            clients: &clients,
            topics: &topics,
        };
        let handler = Arc::new(Gated {
            allow: false,
            subscribed: AtomicUsize::new(0),
        });
        let dispatcher = TopicDispatcher::new().with_handler(handler.clone());
        let (conn, _rx) = Connection::open(ConnectionInfo::default(), 4);

        let err = dispatcher
            .subscribe(&ctx, &conn, &Topic::new("t"), &route("gated"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Rejected(_)));
        assert_eq!(handler.subscribed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rpc_success_sends_call_result() {
        let (clients, topics) = fixtures();
        let ctx = HandlerContext {
            clients: &clients,
            topics: &topics,
        };
        let dispatcher = RpcDispatcher::new().with_handler(Arc::new(Adder));
        let (conn, mut rx) = Connection::open(ConnectionInfo::default(), 4);

        dispatcher
            .dispatch(&ctx, &conn, "c1", &route("adder"), &[json!(2), json!(3)])
            .await
            .unwrap();

        assert_eq!(next_frame(&mut rx), json!([3, "c1", 5]));
    }

    #[tokio::test]
    async fn rpc_failure_sends_call_error_with_details() {
        let (clients, topics) = fixtures();
        let ctx = HandlerContext {
            clients: &clients,
            topics: &topics,
        };
        let dispatcher = RpcDispatcher::new().with_handler(Arc::new(Adder));
        let (conn, mut rx) = Connection::open(ConnectionInfo::default(), 4);

        dispatcher
            .dispatch(&ctx, &conn, "c2", &route("adder"), &[json!("x")])
            .await
            .unwrap();

        assert_eq!(
            next_frame(&mut rx),
            json!([4, "c2", "http://wampd.local/error#invalid_argument", "numbers only", "x"])
        );
    }

    #[tokio::test]
    async fn unknown_rpc_handler_is_returned_not_answered() {
        let (clients, topics) = fixtures();
        let ctx = HandlerContext {
            clients: &clients,
            topics: &topics,
        };
        let (conn, mut rx) = Connection::open(ConnectionInfo::default(), 4);
        let err = RpcDispatcher::new()
            .dispatch(&ctx, &conn, "c3", &route("nope"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::HandlerNotFound { kind: "rpc", .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rpc_error_from_wamp_error() {
        let err: RpcError = DispatchError::Failed("db down".into()).into();
        assert_eq!(err.error_uri, "http://wampd.local/error#handler_failed");
        assert_eq!(err.description, "handler failed: db down");
    }
}
