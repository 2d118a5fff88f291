use std::time::Duration;

use crate::errors::StorageError;
use crate::identity::IdentityToken;

/// Backing store for the identity cache.
///
/// Implementations evaluate expiry lazily: an entry past its TTL must read as
/// absent from `has` and `fetch`. Saving over an existing key replaces the
/// token and restarts its TTL window.
pub trait StorageDriver: Send + Sync {
    fn has(&self, key: &str) -> Result<bool, StorageError>;

    fn fetch(&self, key: &str) -> Result<Option<IdentityToken>, StorageError>;

    /// `None` ttl keeps the entry until it is deleted.
    fn save(&self, key: &str, token: IdentityToken, ttl: Option<Duration>) -> Result<(), StorageError>;

    /// Returns whether a live entry was removed.
    fn delete(&self, key: &str) -> Result<bool, StorageError>;

    fn clear(&self) -> Result<(), StorageError>;
}
