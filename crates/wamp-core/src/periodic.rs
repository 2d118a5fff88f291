use std::time::Duration;

use async_trait::async_trait;

use crate::errors::PeriodicError;

/// Maintenance work run on a fixed interval outside the event loop.
#[async_trait]
pub trait Periodic: Send + Sync {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    async fn tick(&self) -> Result<(), PeriodicError>;
}
