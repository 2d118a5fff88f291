use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use wamp_core::errors::PeriodicError;
use wamp_core::periodic::Periodic;

use crate::database::Database;
use crate::error::StoreError;

/// Something that can prove its backing connection is still alive.
pub trait Pingable: Send + Sync {
    fn ping(&self) -> Result<(), StoreError>;
}

impl Pingable for Database {
    fn ping(&self) -> Result<(), StoreError> {
        Database::ping(self)
    }
}

/// Keeps a long-lived database connection warm.
///
/// A failed ping is logged at error level and returned, so the supervisor
/// can treat a lost connection as fatal.
pub struct DatabasePing<P = Database> {
    target: P,
    interval: Duration,
}

impl<P: Pingable> DatabasePing<P> {
    pub fn new(target: P, interval: Duration) -> Self {
        Self { target, interval }
    }
}

#[async_trait]
impl<P: Pingable> Periodic for DatabasePing<P> {
    fn name(&self) -> &str {
        "database_ping"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> Result<(), PeriodicError> {
        match self.target.ping() {
            Ok(()) => {
                info!("database ping succeeded");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "connection with database server lost");
                Err(PeriodicError::TickFailed {
                    task: self.name().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
