use std::collections::HashMap;

use wamp_core::{Connection, ConnectionId, Topic};

/// Live topics keyed by URI. A topic exists only while it has subscribers.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: HashMap<String, Topic>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uri: &str) -> Option<&Topic> {
        self.topics.get(uri)
    }

    /// Current state of a topic, empty if nobody is subscribed.
    pub fn snapshot(&self, uri: &str) -> Topic {
        self.topics
            .get(uri)
            .cloned()
            .unwrap_or_else(|| Topic::new(uri))
    }

    /// Returns false if the connection was already subscribed.
    pub fn subscribe(&mut self, uri: &str, connection: Connection) -> bool {
        self.topics
            .entry(uri.to_string())
            .or_insert_with(|| Topic::new(uri))
            .add(connection)
    }

    pub fn unsubscribe(&mut self, uri: &str, connection: &ConnectionId) -> bool {
        let Some(topic) = self.topics.get_mut(uri) else {
            return false;
        };
        let removed = topic.remove(connection);
        if topic.is_empty() {
            self.topics.remove(uri);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wamp_core::ConnectionInfo;

    fn connection() -> Connection {
        Connection::open(ConnectionInfo::default(), 4).0
    }

    #[test]
    fn subscribe_creates_topic_once() {
        let mut registry = TopicRegistry::new();
        let conn = connection();
        assert!(registry.subscribe("chat/1", conn.clone()));
        assert!(!registry.subscribe("chat/1", conn.clone()));
        assert_eq!(registry.get("chat/1").map(Topic::len), Some(1));
    }

    #[test]
    fn empty_topic_is_dropped() {
        let mut registry = TopicRegistry::new();
        let a = connection();
        let b = connection();
        registry.subscribe("chat/1", a.clone());
        registry.subscribe("chat/1", b.clone());

        assert!(registry.unsubscribe("chat/1", a.id()));
        assert_eq!(registry.len(), 1);
        assert!(registry.unsubscribe("chat/1", b.id()));
        assert!(registry.is_empty());
        assert!(!registry.unsubscribe("chat/1", b.id()));
    }

    #[test]
    fn snapshot_of_unknown_topic_is_empty() {
        let registry = TopicRegistry::new();
        let topic = registry.snapshot("nowhere");
        assert_eq!(topic.id(), "nowhere");
        assert!(topic.is_empty());
    }
}
