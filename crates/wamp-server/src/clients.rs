//! Identity-aware queries over connections and topic subscribers.

use std::sync::Arc;

use tracing::debug;

use wamp_core::errors::StorageError;
use wamp_core::identity::{Identity, IdentityToken};
use wamp_core::{Connection, Topic};

use crate::auth::AuthenticationProvider;
use crate::cache::ClientStorage;
use crate::error::{Result, WampError};

/// A subscriber paired with the token it resolved to.
pub type ClientEntry = (IdentityToken, Connection);

pub struct ClientQuery {
    storage: ClientStorage,
    provider: Arc<dyn AuthenticationProvider>,
}

impl ClientQuery {
    pub fn new(storage: ClientStorage, provider: Arc<dyn AuthenticationProvider>) -> Self {
        Self { storage, provider }
    }

    pub fn storage(&self) -> &ClientStorage {
        &self.storage
    }

    /// Run the authentication provider for a connection, filling the cache.
    pub async fn authenticate(&self, connection: &Connection) -> Result<()> {
        Ok(self.provider.authenticate(connection).await?)
    }

    /// Token for a connection. A cache miss re-authenticates exactly once;
    /// a second miss means the provider broke its contract.
    pub async fn resolve(&self, connection: &Connection) -> Result<IdentityToken> {
        let key = ClientStorage::storage_key(connection);
        match self.storage.get(&key) {
            Ok(token) => return Ok(token),
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        debug!(connection_id = %connection.id(), "identity cache miss, re-authenticating");
        self.provider.authenticate(connection).await?;

        match self.storage.get(&key) {
            Ok(token) => Ok(token),
            Err(StorageError::NotFound(_)) => Err(WampError::IdentityUnresolved { key }),
            Err(e) => Err(e.into()),
        }
    }

    /// Cached token only; never triggers authentication.
    pub fn cached_identity(&self, connection: &Connection) -> Option<IdentityToken> {
        self.storage
            .get(&ClientStorage::storage_key(connection))
            .ok()
    }

    /// Subscribers of `topic` authenticated as `username`, in subscription order.
    pub async fn find_all_by_username(&self, topic: &Topic, username: &str) -> Result<Vec<ClientEntry>> {
        let mut found = Vec::new();
        for connection in topic {
            let token = self.resolve(connection).await?;
            if token.username() == Some(username) {
                found.push((token, connection.clone()));
            }
        }
        Ok(found)
    }

    /// Subscribers holding at least one of `roles`. Each connection appears once.
    pub async fn find_by_roles<S: AsRef<str> + Sync>(
        &self,
        topic: &Topic,
        roles: &[S],
    ) -> Result<Vec<ClientEntry>> {
        let mut found = Vec::new();
        for connection in topic {
            let token = self.resolve(connection).await?;
            if !token.is_anonymous() && token.has_any_role(roles) {
                found.push((token, connection.clone()));
            }
        }
        Ok(found)
    }

    pub async fn get_all(&self, topic: &Topic, include_anonymous: bool) -> Result<Vec<ClientEntry>> {
        let mut found = Vec::new();
        for connection in topic {
            let token = self.resolve(connection).await?;
            if include_anonymous || !token.is_anonymous() {
                found.push((token, connection.clone()));
            }
        }
        Ok(found)
    }

    pub async fn get_user_identity(&self, connection: &Connection) -> Result<Identity> {
        Ok(self.resolve(connection).await?.identity())
    }

    /// Drop the cached token of a connection that went away.
    pub fn forget(&self, connection: &Connection) -> Result<bool> {
        Ok(self.storage.remove(&ClientStorage::storage_key(connection))?)
    }
}
