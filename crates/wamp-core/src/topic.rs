use std::fmt;

use serde_json::Value;

use crate::connection::Connection;
use crate::ids::ConnectionId;
use crate::protocol::WampMessage;

/// Topic position of a client frame, before the state machine validates it.
#[derive(Clone, Debug, PartialEq)]
pub enum TopicArg {
    Uri(String),
    /// Anything that is not a topic URI (number, object, null, ...).
    Malformed(Value),
}

impl TopicArg {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(uri) => Self::Uri(uri),
            other => Self::Malformed(other),
        }
    }

    pub fn uri(&self) -> Option<&str> {
        match self {
            Self::Uri(uri) => Some(uri),
            Self::Malformed(_) => None,
        }
    }

    /// JSON type of the argument, for contract-violation messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Uri(_) => "string",
            Self::Malformed(Value::Null) => "null",
            Self::Malformed(Value::Bool(_)) => "bool",
            Self::Malformed(Value::Number(_)) => "number",
            Self::Malformed(Value::String(_)) => "string",
            Self::Malformed(Value::Array(_)) => "array",
            Self::Malformed(Value::Object(_)) => "object",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Uri(uri) => Value::String(uri.clone()),
            Self::Malformed(raw) => raw.clone(),
        }
    }
}

impl From<&str> for TopicArg {
    fn from(uri: &str) -> Self {
        Self::Uri(uri.to_string())
    }
}

impl From<String> for TopicArg {
    fn from(uri: String) -> Self {
        Self::Uri(uri)
    }
}

/// A pub/sub channel and its live subscribers, in subscription order.
#[derive(Clone, Debug)]
pub struct Topic {
    id: String,
    subscribers: Vec<Connection>,
}

impl Topic {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subscribers: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a subscriber. Returns false if it was already subscribed.
    pub fn add(&mut self, connection: Connection) -> bool {
        if self.contains(connection.id()) {
            return false;
        }
        self.subscribers.push(connection);
        true
    }

    /// Remove a subscriber, preserving the order of the others.
    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|c| c.id() != id);
        before != self.subscribers.len()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.subscribers.iter().any(|c| c.id() == id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Connection> {
        self.subscribers.iter()
    }

    /// Send an EVENT frame to every subscriber whose session id is not in
    /// `exclude` and, when `eligible` is non-empty, is listed in it.
    /// Returns how many frames were queued.
    pub fn broadcast(&self, event: &Value, exclude: &[String], eligible: &[String]) -> usize {
        let frame = WampMessage::Event {
            topic: self.id.clone(),
            event: event.clone(),
        }
        .encode();

        self.subscribers
            .iter()
            .filter(|c| !exclude.iter().any(|s| s == c.session_id()))
            .filter(|c| eligible.is_empty() || eligible.iter().any(|s| s == c.session_id()))
            .filter(|c| c.send(frame.clone()))
            .count()
    }
}

impl<'a> IntoIterator for &'a Topic {
    type Item = &'a Connection;
    type IntoIter = std::slice::Iter<'a, Connection>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
