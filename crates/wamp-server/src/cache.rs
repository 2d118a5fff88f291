//! Identity cache: connection-keyed tokens with lazy TTL expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use wamp_core::errors::StorageError;
use wamp_core::identity::IdentityToken;
use wamp_core::storage::StorageDriver;
use wamp_core::Connection;

/// Default lifetime of a cached token.
pub const DEFAULT_TTL: Duration = Duration::from_secs(900);

struct Entry {
    token: IdentityToken,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// In-process driver. Expired entries are dropped when read.
#[derive(Default)]
pub struct InMemoryDriver {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn raw_len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl StorageDriver for InMemoryDriver {
    fn has(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.fetch(key)?.is_some())
    }

    fn fetch(&self, key: &str) -> Result<Option<IdentityToken>, StorageError> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.token.clone())),
            Some(_) => {
                entries.remove(key);
                debug!(key, "cached token expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn save(&self, key: &str, token: IdentityToken, ttl: Option<Duration>) -> Result<(), StorageError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .insert(key.to_string(), Entry { token, expires_at });
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .remove(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.entries.lock().clear();
        Ok(())
    }
}

/// Identity cache keyed by connection storage key.
#[derive(Clone)]
pub struct ClientStorage {
    driver: Arc<dyn StorageDriver>,
    ttl: Option<Duration>,
}

impl ClientStorage {
    pub fn new(driver: Arc<dyn StorageDriver>, ttl: Option<Duration>) -> Self {
        Self { driver, ttl }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryDriver::new()), Some(DEFAULT_TTL))
    }

    /// TTL applied by the authentication pipeline when it stores a token.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Stable key for a connection: its id, which never changes while it is open.
    pub fn storage_key(connection: &Connection) -> String {
        connection.id().to_string()
    }

    pub fn has(&self, key: &str) -> Result<bool, StorageError> {
        self.driver.has(key)
    }

    pub fn get(&self, key: &str) -> Result<IdentityToken, StorageError> {
        self.driver
            .fetch(key)?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    /// Store a token, replacing any previous one and restarting its TTL.
    pub fn set(&self, key: &str, token: IdentityToken, ttl: Option<Duration>) -> Result<(), StorageError> {
        self.driver.save(key, token, ttl)
    }

    pub fn remove(&self, key: &str) -> Result<bool, StorageError> {
        self.driver.delete(key)
    }

    pub fn remove_all(&self) -> Result<(), StorageError> {
        self.driver.clear()
    }
}
