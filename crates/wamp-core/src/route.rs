use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::RouteError;

/// A registered URI pattern and the handler it dispatches to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDefinition {
    /// URI pattern, e.g. `chat/{room}`.
    pub pattern: String,
    /// Name of the topic or RPC handler registered for this route.
    pub callback: String,
    /// Per-placeholder regular expressions, e.g. `room => \d+`.
    #[serde(default)]
    pub requirements: HashMap<String, String>,
}

impl RouteDefinition {
    pub fn new(pattern: impl Into<String>, callback: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            callback: callback.into(),
            requirements: HashMap::new(),
        }
    }

    pub fn with_requirement(mut self, param: impl Into<String>, regex: impl Into<String>) -> Self {
        self.requirements.insert(param.into(), regex.into());
        self
    }
}

/// Result of matching a topic URI. Pure value; carries no mutable state.
#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub name: String,
    pub definition: Arc<RouteDefinition>,
    pub params: HashMap<String, String>,
}

impl Route {
    /// Handler name the dispatchers look up.
    pub fn handler(&self) -> &str {
        &self.definition.callback
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Pattern matcher that turns a topic URI into a route.
pub trait PubSubRouter: Send + Sync {
    fn match_uri(&self, uri: &str) -> Result<Route, RouteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_exposes_handler_and_params() {
        let route = Route {
            name: "chat_room".into(),
            definition: Arc::new(RouteDefinition::new("chat/{room}", "chat").with_requirement("room", r"\d+")),
            params: HashMap::from([("room".to_string(), "42".to_string())]),
        };
        assert_eq!(route.handler(), "chat");
        assert_eq!(route.param("room"), Some("42"));
        assert_eq!(route.param("other"), None);
        assert_eq!(route.definition.requirements["room"], r"\d+");
    }

    #[test]
    fn definition_requirements_default_to_empty() {
        let def: RouteDefinition =
            serde_json::from_str(r#"{"pattern":"news","callback":"broadcast"}"#).unwrap();
        assert!(def.requirements.is_empty());
    }
}
