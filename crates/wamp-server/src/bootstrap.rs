//! Wiring of settings into a ready-to-run application.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use wamp_core::errors::RouteError;
use wamp_core::storage::StorageDriver;
use wamp_store::{Database, DatabasePing, SqliteDriver, StoreError};

use crate::application::WampApplication;
use crate::auth::{Authenticator, StaticTokenProvider};
use crate::cache::{ClientStorage, InMemoryDriver};
use crate::clients::ClientQuery;
use crate::config::{StorageKind, WampSettings};
use crate::dispatcher::{RpcDispatcher, TopicDispatcher};
use crate::events::EventBus;
use crate::handlers::{BroadcastTopic, PresenceRpc};
use crate::periodic::{MemoryUsage, PeriodicRegistry};
use crate::router::{PatternRouter, WampRouter};

/// Identity cache backend chosen by the settings.
pub struct StorageBackend {
    pub driver: Arc<dyn StorageDriver>,
    /// Present for SQLite storage; kept alive by the ping periodic.
    pub database: Option<Database>,
}

pub fn open_storage(settings: &WampSettings) -> Result<StorageBackend, StoreError> {
    match settings.storage.driver {
        StorageKind::Memory => Ok(StorageBackend {
            driver: Arc::new(InMemoryDriver::new()),
            database: None,
        }),
        StorageKind::Sqlite => {
            let db = Database::open(&settings.storage.resolved_path())?;
            Ok(StorageBackend {
                driver: Arc::new(SqliteDriver::new(db.clone())),
                database: Some(db),
            })
        }
    }
}

pub fn build_application(
    settings: &WampSettings,
    driver: Arc<dyn StorageDriver>,
    events: EventBus,
) -> Result<WampApplication, RouteError> {
    let storage = ClientStorage::new(driver, settings.client_ttl());
    let authenticator = Authenticator::new(storage.clone())
        .with_provider(Arc::new(StaticTokenProvider::new(settings.tokens.clone())));
    let clients = ClientQuery::new(storage, Arc::new(authenticator));

    let router = WampRouter::new(Arc::new(PatternRouter::from_settings(&settings.routes)?));
    let broadcast = BroadcastTopic::new("broadcast")
        .with_required_roles(settings.broadcast.required_roles.clone());
    let topics = TopicDispatcher::new().with_handler(Arc::new(broadcast));
    let rpcs = RpcDispatcher::new().with_handler(Arc::new(PresenceRpc::new("presence")));

    info!(routes = settings.routes.len(), "application wired");
    Ok(WampApplication::new(clients, router, topics, rpcs, events))
}

/// Memory reports when profiling, database pings when storage is SQLite.
pub fn build_periodics(settings: &WampSettings, database: Option<Database>) -> PeriodicRegistry {
    let mut periodics = PeriodicRegistry::new();
    if settings.server.profile {
        periodics.add(Arc::new(MemoryUsage::new()));
    }
    if let Some(db) = database {
        periodics.add(Arc::new(DatabasePing::new(
            db,
            Duration::from_secs(settings.ping.interval_secs),
        )));
    }
    periodics
}
