//! Maintenance tasks run on their own timers, away from the event loop.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use wamp_core::errors::PeriodicError;
use wamp_core::periodic::Periodic;
use wamp_telemetry::{bytes_to_mib, process_memory_bytes};

pub const MEMORY_USAGE_INTERVAL: Duration = Duration::from_secs(5);

/// Logs resident memory of the server process.
pub struct MemoryUsage {
    interval: Duration,
}

impl MemoryUsage {
    pub fn new() -> Self {
        Self {
            interval: MEMORY_USAGE_INTERVAL,
        }
    }
}

impl Default for MemoryUsage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Periodic for MemoryUsage {
    fn name(&self) -> &str {
        "memory_usage"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> Result<(), PeriodicError> {
        let mib = bytes_to_mib(process_memory_bytes());
        info!(memory_mib = mib, "memory usage");
        Ok(())
    }
}

#[derive(Default)]
pub struct PeriodicRegistry {
    tasks: Vec<Arc<dyn Periodic>>,
}

impl PeriodicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, task: Arc<dyn Periodic>) {
        debug!(task = task.name(), interval_ms = task.interval().as_millis() as u64, "periodic registered");
        self.tasks.push(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Spawn one timer task per periodic.
    pub fn start(self) -> PeriodicSet {
        let (failures_tx, failures) = mpsc::unbounded_channel();
        let handles = self
            .tasks
            .into_iter()
            .map(|task| spawn_periodic(task, failures_tx.clone()))
            .collect();
        PeriodicSet { handles, failures }
    }
}

/// Runs `task` every interval (first run after one interval). A failing
/// tick ends the task and is reported on `failures`.
pub fn spawn_periodic(
    task: Arc<dyn Periodic>,
    failures: mpsc::UnboundedSender<PeriodicError>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(task.interval());
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = task.tick().await {
                let _ = failures.send(e);
                break;
            }
        }
    })
}

/// Running periodics plus the channel their failures arrive on.
pub struct PeriodicSet {
    handles: Vec<JoinHandle<()>>,
    failures: mpsc::UnboundedReceiver<PeriodicError>,
}

impl PeriodicSet {
    /// Wait for the first failing tick. Pends forever if nothing can fail.
    pub async fn next_failure(&mut self) -> PeriodicError {
        match self.failures.recv().await {
            Some(e) => e,
            None => pending().await,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn stop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for PeriodicSet {
    fn drop(&mut self) {
        self.stop();
    }
}
