//! Authentication pipeline that fills the identity cache.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use wamp_core::errors::AuthError;
use wamp_core::identity::IdentityToken;
use wamp_core::Connection;

use crate::cache::ClientStorage;
use crate::config::TokenSettings;

/// Resolves and caches an identity for a connection as a side effect.
#[async_trait]
pub trait AuthenticationProvider: Send + Sync {
    async fn authenticate(&self, connection: &Connection) -> Result<(), AuthError>;
}

/// One way of turning a connection into a token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this provider has anything to work with for the connection.
    fn supports(&self, connection: &Connection) -> bool;

    async fn authenticate(&self, connection: &Connection) -> Result<IdentityToken, AuthError>;
}

/// Runs token providers in order; the first one that supports the
/// connection decides. Connections nobody supports are stored as anonymous.
pub struct Authenticator {
    providers: Vec<Arc<dyn TokenProvider>>,
    storage: ClientStorage,
}

impl Authenticator {
    pub fn new(storage: ClientStorage) -> Self {
        Self {
            providers: Vec::new(),
            storage,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[async_trait]
impl AuthenticationProvider for Authenticator {
    async fn authenticate(&self, connection: &Connection) -> Result<(), AuthError> {
        let mut resolved = None;
        for provider in &self.providers {
            if provider.supports(connection) {
                let token = provider.authenticate(connection).await?;
                resolved = Some((provider.name(), token));
                break;
            }
        }

        let (provider, token) = resolved.unwrap_or(("anonymous", IdentityToken::Anonymous));
        info!(
            connection_id = %connection.id(),
            provider,
            username = token.label(),
            "connection authenticated"
        );

        let key = ClientStorage::storage_key(connection);
        self.storage.set(&key, token, self.storage.ttl())?;
        Ok(())
    }
}

/// Maps the `token` query parameter captured at handshake to a fixed identity.
pub struct StaticTokenProvider {
    tokens: HashMap<String, TokenSettings>,
}

impl StaticTokenProvider {
    pub const QUERY_PARAM: &'static str = "token";

    pub fn new(tokens: HashMap<String, TokenSettings>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    fn name(&self) -> &str {
        "static_token"
    }

    fn supports(&self, connection: &Connection) -> bool {
        connection.query_param(Self::QUERY_PARAM).is_some()
    }

    async fn authenticate(&self, connection: &Connection) -> Result<IdentityToken, AuthError> {
        let presented = connection
            .query_param(Self::QUERY_PARAM)
            .ok_or_else(|| AuthError::InvalidCredentials("no token presented".into()))?;

        match self.tokens.get(presented) {
            Some(entry) => Ok(IdentityToken::authenticated(
                entry.username.clone(),
                entry.roles.clone(),
            )),
            None => {
                debug!(connection_id = %connection.id(), "unknown static token");
                Err(AuthError::InvalidCredentials("unknown token".into()))
            }
        }
    }
}
