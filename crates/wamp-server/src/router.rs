//! Topic URI → route resolution.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use wamp_core::errors::RouteError;
use wamp_core::{PubSubRouter, Route, RouteDefinition, Topic};

use crate::config::RouteSettings;

const DEFAULT_REQUIREMENT: &str = "[^/]+";

/// Anything that names a topic URI.
pub trait TopicUri {
    fn topic_uri(&self) -> &str;
}

impl TopicUri for Topic {
    fn topic_uri(&self) -> &str {
        self.id()
    }
}

impl TopicUri for str {
    fn topic_uri(&self) -> &str {
        self
    }
}

impl TopicUri for String {
    fn topic_uri(&self) -> &str {
        self
    }
}

/// Thin adapter over the pattern matcher. Accepts live topics or raw URIs.
#[derive(Clone)]
pub struct WampRouter {
    matcher: Arc<dyn PubSubRouter>,
}

impl WampRouter {
    pub fn new(matcher: Arc<dyn PubSubRouter>) -> Self {
        Self { matcher }
    }

    pub fn match_route<T: TopicUri + ?Sized>(&self, topic: &T) -> Result<Route, RouteError> {
        self.matcher.match_uri(topic.topic_uri())
    }
}

struct CompiledRoute {
    name: String,
    definition: Arc<RouteDefinition>,
    regex: Regex,
    params: Vec<String>,
}

/// Ordered list of `{param}` patterns; the first full match wins.
#[derive(Default)]
pub struct PatternRouter {
    routes: Vec<CompiledRoute>,
}

impl PatternRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(routes: &[RouteSettings]) -> Result<Self, RouteError> {
        let mut router = Self::new();
        for route in routes {
            let mut definition = RouteDefinition::new(&route.pattern, &route.handler);
            definition.requirements = route.requirements.clone();
            router.add(&route.name, definition)?;
        }
        Ok(router)
    }

    pub fn add(&mut self, name: &str, definition: RouteDefinition) -> Result<(), RouteError> {
        let (regex, params) = compile(&definition)?;
        self.routes.push(CompiledRoute {
            name: name.to_string(),
            definition: Arc::new(definition),
            regex,
            params,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl PubSubRouter for PatternRouter {
    fn match_uri(&self, uri: &str) -> Result<Route, RouteError> {
        for route in &self.routes {
            let Some(captures) = route.regex.captures(uri) else {
                continue;
            };
            let params: HashMap<String, String> = route
                .params
                .iter()
                .filter_map(|p| captures.name(p).map(|m| (p.clone(), m.as_str().to_string())))
                .collect();
            return Ok(Route {
                name: route.name.clone(),
                definition: Arc::clone(&route.definition),
                params,
            });
        }
        Err(RouteError::NotFound(uri.to_string()))
    }
}

fn invalid(definition: &RouteDefinition, reason: impl Into<String>) -> RouteError {
    RouteError::InvalidPattern {
        pattern: definition.pattern.clone(),
        reason: reason.into(),
    }
}

fn compile(definition: &RouteDefinition) -> Result<(Regex, Vec<String>), RouteError> {
    let pattern = &definition.pattern;
    let mut source = String::from("^");
    let mut params = Vec::new();
    let mut rest = pattern.as_str();

    while let Some(open) = rest.find('{') {
        source.push_str(&regex::escape(&rest[..open]));
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| invalid(definition, "unclosed placeholder"))?;
        let name = &after[..close];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid(definition, format!("bad placeholder name {name:?}")));
        }
        if params.iter().any(|p| p == name) {
            return Err(invalid(definition, format!("duplicate placeholder {name:?}")));
        }
        let requirement = definition
            .requirements
            .get(name)
            .map(String::as_str)
            .unwrap_or(DEFAULT_REQUIREMENT);
        source.push_str(&format!("(?P<{name}>{requirement})"));
        params.push(name.to_string());
        rest = &after[close + 1..];
    }
    source.push_str(&regex::escape(rest));
    source.push('$');

    let regex = Regex::new(&source).map_err(|e| invalid(definition, e.to_string()))?;
    Ok((regex, params))
}
