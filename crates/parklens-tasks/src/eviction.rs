//! Eviction of finished task records.
//!
//! Records are kept forever unless a policy other than [`NeverEvict`] is
//! configured. Eviction only drops registry records; published artifacts are
//! never touched.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parklens_models::Task;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::error::TaskStoreResult;
use crate::store::TaskStore;

/// Decides whether a record may be dropped from the registry.
pub trait EvictionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn should_evict(&self, task: &Task, now: DateTime<Utc>) -> bool;
}

/// Keep every record for the lifetime of the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverEvict;

impl EvictionPolicy for NeverEvict {
    fn name(&self) -> &'static str {
        "never"
    }

    fn should_evict(&self, _task: &Task, _now: DateTime<Utc>) -> bool {
        false
    }
}

/// Drop terminal records whose last update is older than the TTL.
/// Pending and processing records are never evicted.
#[derive(Debug, Clone, Copy)]
pub struct TerminalTtl(pub Duration);

impl EvictionPolicy for TerminalTtl {
    fn name(&self) -> &'static str {
        "terminal_ttl"
    }

    fn should_evict(&self, task: &Task, now: DateTime<Utc>) -> bool {
        if !task.is_terminal() {
            return false;
        }
        match chrono::Duration::from_std(self.0) {
            Ok(ttl) => now.signed_duration_since(task.updated_at) >= ttl,
            Err(_) => false,
        }
    }
}

/// Periodically removes records selected by an [`EvictionPolicy`].
pub struct TaskSweeper {
    store: Arc<dyn TaskStore>,
    policy: Arc<dyn EvictionPolicy>,
    period: Duration,
}

impl TaskSweeper {
    pub fn new(store: Arc<dyn TaskStore>, policy: Arc<dyn EvictionPolicy>, period: Duration) -> Self {
        Self {
            store,
            policy,
            period,
        }
    }

    /// Run until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting task sweeper (policy: {}, interval: {:?})",
            self.policy.name(),
            self.period
        );

        let mut ticker = interval(self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!("Task sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Task sweeper stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Run one pass, returning the number of evicted records.
    pub async fn sweep_once(&self) -> TaskStoreResult<usize> {
        let now = Utc::now();
        let mut evicted = 0;

        for task in self.store.list().await? {
            if self.policy.should_evict(&task, now) && self.store.remove(&task.id).await? {
                debug!(task_id = %task.id, state = task.state.as_str(), "Evicted task record");
                evicted += 1;
            }
        }

        if evicted > 0 {
            metrics::counter!("parklens_tasks_evicted_total").increment(evicted as u64);
            info!("Evicted {} task records", evicted);
        }
        Ok(evicted)
    }
}
