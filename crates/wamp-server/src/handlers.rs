//! Built-in handlers wired by default routes.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use wamp_core::errors::DispatchError;
use wamp_core::{Connection, Route, Topic};

use crate::dispatcher::{HandlerContext, RpcError, RpcHandler, TopicHandler};

/// Relays every publish to the topic's subscribers. Optionally restricted
/// to connections holding one of `required_roles`.
pub struct BroadcastTopic {
    name: String,
    required_roles: Vec<String>,
}

impl BroadcastTopic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required_roles: Vec::new(),
        }
    }

    pub fn with_required_roles(mut self, roles: Vec<String>) -> Self {
        self.required_roles = roles;
        self
    }
}

#[async_trait]
impl TopicHandler for BroadcastTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn secure(
        &self,
        ctx: &HandlerContext<'_>,
        connection: &Connection,
        topic: &Topic,
        _route: &Route,
    ) -> Result<(), DispatchError> {
        if self.required_roles.is_empty() {
            return Ok(());
        }
        let token = ctx
            .clients
            .resolve(connection)
            .await
            .map_err(|e| DispatchError::Failed(e.to_string()))?;
        if token.has_any_role(&self.required_roles) {
            Ok(())
        } else {
            Err(DispatchError::Rejected(format!(
                "{} requires one of {:?}",
                topic.id(),
                self.required_roles
            )))
        }
    }

    async fn on_subscribe(
        &self,
        _ctx: &HandlerContext<'_>,
        connection: &Connection,
        topic: &Topic,
        _route: &Route,
    ) -> Result<(), DispatchError> {
        debug!(connection_id = %connection.id(), topic = %topic, subscribers = topic.len(), "joined");
        Ok(())
    }

    async fn on_unsubscribe(
        &self,
        _ctx: &HandlerContext<'_>,
        connection: &Connection,
        topic: &Topic,
        _route: &Route,
    ) -> Result<(), DispatchError> {
        debug!(connection_id = %connection.id(), topic = %topic, subscribers = topic.len(), "left");
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
    ) -> Result<(), DispatchError> {
        let delivered = topic.broadcast(event, exclude, eligible);
        debug!(topic = %topic, delivered, "event broadcast");
        Ok(())
    }
}

/// Lists who is subscribed to a topic.
///
/// Params: `[topicUri, includeAnonymous?]`.
pub struct PresenceRpc {
    name: String,
}

impl PresenceRpc {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl RpcHandler for PresenceRpc {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        ctx: &HandlerContext<'_>,
        _connection: &Connection,
        _route: &Route,
        params: &[Value],
    ) -> Result<Value, RpcError> {
        let uri = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::new("invalid_argument", "expected a topic URI as first parameter"))?;
        let include_anonymous = params.get(1).and_then(Value::as_bool).unwrap_or(false);

        let Some(topic) = ctx.topics.get(uri) else {
            return Ok(json!([]));
        };

        let entries = ctx.clients.get_all(topic, include_anonymous).await?;
        let listed: Vec<Value> = entries
            .iter()
            .map(|(token, connection)| {
                json!({
                    "sessionId": connection.session_id(),
                    "username": token.username(),
                    "identity": token.identity(),
                })
            })
            .collect();
        Ok(Value::Array(listed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use wamp_core::identity::IdentityToken;
    use wamp_core::{ConnectionInfo, Outbound, RouteDefinition};

    use crate::auth::Authenticator;
    use crate::cache::ClientStorage;
    use crate::clients::ClientQuery;
    use crate::topics::TopicRegistry;

    fn route() -> Route {
        Route {
            name: "chat".into(),
            definition: Arc::new(RouteDefinition::new("chat/{room}", "broadcast")),
            params: HashMap::new(),
        }
    }

    fn frames(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(Outbound::Text(text)) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    fn clients() -> ClientQuery {
        let storage = ClientStorage::in_memory();
        ClientQuery::new(storage.clone(), Arc::new(Authenticator::new(storage)))
    }

    #[tokio::test]
    async fn broadcast_honours_exclude_and_eligible() {
        let clients = clients();
        let mut registry = TopicRegistry::new();
        let (a, mut rx_a) = Connection::open(ConnectionInfo::default(), 8);
        let (b, mut rx_b) = Connection::open(ConnectionInfo::default(), 8);
        let (c, mut rx_c) = Connection::open(ConnectionInfo::default(), 8);
        for conn in [&a, &b, &c] {
            registry.subscribe("chat/1", conn.clone());
        }
        let topic = registry.snapshot("chat/1");
        let ctx = HandlerContext {
            clients: &clients,
            topics: &registry,
        };
        let handler = BroadcastTopic::new("broadcast");

        handler
            .on_publish(&ctx, &a, &topic, &route(), &json!("hello"), &[a.session_id().to_string()], &[])
            .await
            .unwrap();
        assert!(frames(&mut rx_a).is_empty());
        assert_eq!(frames(&mut rx_b), vec![json!([8, "chat/1", "hello"])]);
        assert_eq!(frames(&mut rx_c).len(), 1);

        handler
            .on_publish(&ctx, &a, &topic, &route(), &json!(1), &[], &[c.session_id().to_string()])
            .await
            .unwrap();
        assert!(frames(&mut rx_a).is_empty());
        assert!(frames(&mut rx_b).is_empty());
        assert_eq!(frames(&mut rx_c), vec![json!([8, "chat/1", 1])]);
    }

    #[tokio::test]
    async fn role_gate_uses_resolved_identity() {
        let clients = clients();
        let registry = TopicRegistry::new();
        let ctx = HandlerContext {
            clients: &clients,
            topics: &registry,
        };
        let handler = BroadcastTopic::new("staff").with_required_roles(vec!["STAFF".into()]);
        let (staff, _rx1) = Connection::open(ConnectionInfo::default(), 1);
        let (guest, _rx2) = Connection::open(ConnectionInfo::default(), 1);
        clients
            .storage()
            .set(
                &ClientStorage::storage_key(&staff),
                IdentityToken::authenticated("sam", vec!["STAFF".into()]),
                None,
            )
            .unwrap();

        let topic = Topic::new("staff/room");
        handler.secure(&ctx, &staff, &topic, &route()).await.unwrap();
        let err = handler.secure(&ctx, &guest, &topic, &route()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected(_)));
    }

    #[tokio::test]
    async fn presence_lists_subscribers() {
        let clients = clients();
        let mut registry = TopicRegistry::new();
        let (named, _rx1) = Connection::open(ConnectionInfo::default(), 1);
        let (anon, _rx2) = Connection::open(ConnectionInfo::default(), 1);
        clients
            .storage()
            .set(
                &ClientStorage::storage_key(&named),
                IdentityToken::authenticated("nia", vec![]),
                None,
            )
            .unwrap();
        registry.subscribe("chat/1", named.clone());
        registry.subscribe("chat/1", anon.clone());
        let ctx = HandlerContext {
            clients: &clients,
            topics: &registry,
        };
        let rpc = PresenceRpc::new("presence");

        let named_only = rpc
            .call(&ctx, &named, &route(), &[json!("chat/1")])
            .await
            .unwrap();
        assert_eq!(
            named_only,
            json!([{
                "sessionId": named.session_id(),
                "username": "nia",
                "identity": {"type": "identifier", "value": "nia"}
            }])
        );

        let everyone = rpc
            .call(&ctx, &named, &route(), &[json!("chat/1"), json!(true)])
            .await
            .unwrap();
        assert_eq!(everyone.as_array().map(Vec::len), Some(2));
        assert_eq!(everyone[1]["username"], Value::Null);

        let empty = rpc
            .call(&ctx, &named, &route(), &[json!("chat/404")])
            .await
            .unwrap();
        assert_eq!(empty, json!([]));
    }

    #[tokio::test]
    async fn presence_requires_topic_param() {
        let clients = clients();
        let registry = TopicRegistry::new();
        let ctx = HandlerContext {
            clients: &clients,
            topics: &registry,
        };
        let (conn, _rx) = Connection::open(ConnectionInfo::default(), 1);
        let err = PresenceRpc::new("presence")
            .call(&ctx, &conn, &route(), &[json!(5)])
            .await
            .unwrap_err();
        assert_eq!(err.error_uri, "http://wampd.local/error#invalid_argument");
    }
}
