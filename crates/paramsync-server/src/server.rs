//! The parameter server core
//!
//! [`ParameterServer`] owns the canonical versioned model. `pull` hands out
//! the current immutable snapshot; `push` merges a gradient into the current
//! weights under a single mutex and publishes the successor snapshot. The
//! push that crosses the checkpoint threshold hands its snapshot to the
//! [`CheckpointStore`] after the lock is released.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use paramsync_core::{
    staleness, ApplyError, CheckpointIoError, GradientUpdate, ModelSnapshot, NodeConfig,
    PushReceipt, StalenessScaling,
};

use crate::applier::{staleness_scale, GradientApplier};
use crate::checkpoint::CheckpointStore;

/// Server tuning taken from the node configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    /// Applied pushes between checkpoints
    pub checkpoint_frequency: u64,
    /// Treatment of stale gradients
    pub staleness_scaling: StalenessScaling,
    /// Artifacts kept per job after a successful checkpoint (0 keeps all)
    pub keep_checkpoints: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            checkpoint_frequency: 100,
            staleness_scaling: StalenessScaling::None,
            keep_checkpoints: 0,
        }
    }
}

impl From<&NodeConfig> for ServerOptions {
    fn from(config: &NodeConfig) -> Self {
        Self {
            checkpoint_frequency: config.checkpoint_frequency(),
            staleness_scaling: config.staleness_scaling,
            keep_checkpoints: config.keep_checkpoints,
        }
    }
}

/// Copy of the server's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerCounters {
    /// Pushes applied by this process
    pub update_count: u64,
    /// Pushes applied since the last checkpoint hand-off
    pub updates_since_checkpoint: u64,
    /// Where this job's checkpoints go
    pub checkpoint_dir: PathBuf,
    /// Version of the current snapshot
    pub current_version: u64,
    /// Successful checkpoint writes
    pub checkpoints_written: u64,
    /// Failed checkpoint writes
    pub checkpoint_failures: u64,
}

/// Per-agent push statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    /// Agent identifier
    pub agent_id: String,
    /// Pushes applied
    pub pushes: u64,
    /// Base version of the last applied push
    pub last_base_version: u64,
    /// Version produced by the last applied push
    pub last_new_version: u64,
    /// Largest staleness seen from this agent
    pub max_staleness: u64,
    /// Transitions behind all applied gradients
    pub samples: u64,
}

#[derive(Debug, Default)]
struct CriticalState {
    update_count: u64,
    updates_since_checkpoint: u64,
    checkpoints_written: u64,
    checkpoint_failures: u64,
}

struct Inner {
    job_id: Uuid,
    current: RwLock<Arc<ModelSnapshot>>,
    state: Mutex<CriticalState>,
    applier: Arc<dyn GradientApplier>,
    checkpoints: Arc<dyn CheckpointStore>,
    options: ServerOptions,
    agents: DashMap<String, AgentStats>,
}

/// Holder of the canonical model of one job.
///
/// Cloning is cheap and every clone serves the same model.
#[derive(Clone)]
pub struct ParameterServer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ParameterServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterServer")
            .field("job_id", &self.inner.job_id)
            .field("version", &self.inner.current.read().version)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl ParameterServer {
    /// Start serving `job_id`.
    ///
    /// Resumes from the latest checkpoint of the job when one exists,
    /// otherwise starts at version 0 with `initial_weights`.
    pub async fn start(
        job_id: Uuid,
        initial_weights: Vec<u8>,
        applier: Arc<dyn GradientApplier>,
        checkpoints: Arc<dyn CheckpointStore>,
        options: ServerOptions,
    ) -> Result<Self, CheckpointIoError> {
        let snapshot = match checkpoints.load_latest(job_id).await? {
            Some(snapshot) => {
                tracing::info!(
                    %job_id,
                    version = snapshot.version,
                    "resuming from checkpoint"
                );
                snapshot
            }
            None => {
                tracing::info!(%job_id, bytes = initial_weights.len(), "starting from initial weights");
                ModelSnapshot::initial(initial_weights)
            }
        };

        Ok(Self {
            inner: Arc::new(Inner {
                job_id,
                current: RwLock::new(Arc::new(snapshot)),
                state: Mutex::new(CriticalState::default()),
                applier,
                checkpoints,
                options,
                agents: DashMap::new(),
            }),
        })
    }

    /// Job served by this server
    #[must_use]
    pub fn job_id(&self) -> Uuid {
        self.inner.job_id
    }

    /// The current snapshot. Never waits on a push in progress.
    #[must_use]
    pub fn pull(&self) -> Arc<ModelSnapshot> {
        Arc::clone(&self.inner.current.read())
    }

    /// Apply `update` to the current weights.
    ///
    /// The gradient always lands on the newest snapshot, whatever version
    /// the agent computed it against. A rejected update leaves the model
    /// untouched. When this push reaches the checkpoint threshold the call
    /// returns after the checkpoint attempt.
    pub async fn push(&self, update: GradientUpdate) -> Result<PushReceipt, ApplyError> {
        let inner = &self.inner;

        let (receipt, due) = {
            let mut state = inner.state.lock();
            let current = Arc::clone(&inner.current.read());

            let new_version = current.version + 1;
            let missed = staleness(update.base_version, new_version);
            let scale = staleness_scale(inner.options.staleness_scaling, missed);
            let weights = inner
                .applier
                .apply(&current.weights, &update.gradient, scale)?;

            let next = Arc::new(current.successor(weights));
            *inner.current.write() = Arc::clone(&next);

            state.update_count += 1;
            state.updates_since_checkpoint += 1;
            let due = if state.updates_since_checkpoint >= inner.options.checkpoint_frequency {
                state.updates_since_checkpoint = 0;
                Some(next)
            } else {
                None
            };

            (PushReceipt::new(update.base_version, new_version), due)
        };

        self.record_push(&update, receipt);

        if let Some(snapshot) = due {
            self.checkpoint(snapshot).await;
        }
        Ok(receipt)
    }

    /// Persist the current snapshot outside the regular cadence
    pub async fn checkpoint_now(&self) -> Result<PathBuf, CheckpointIoError> {
        let snapshot = self.pull();
        self.inner
            .checkpoints
            .persist(&snapshot, self.inner.job_id)
            .await
    }

    /// Copy of the server's bookkeeping
    #[must_use]
    pub fn counters(&self) -> TrainerCounters {
        let state = self.inner.state.lock();
        TrainerCounters {
            update_count: state.update_count,
            updates_since_checkpoint: state.updates_since_checkpoint,
            checkpoint_dir: self.inner.checkpoints.location(self.inner.job_id),
            current_version: self.inner.current.read().version,
            checkpoints_written: state.checkpoints_written,
            checkpoint_failures: state.checkpoint_failures,
        }
    }

    /// Push statistics of every agent seen so far, sorted by agent id
    #[must_use]
    pub fn agent_stats(&self) -> Vec<AgentStats> {
        let mut stats: Vec<_> = self
            .inner
            .agents
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        stats.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        stats
    }

    fn record_push(&self, update: &GradientUpdate, receipt: PushReceipt) {
        let mut entry = self
            .inner
            .agents
            .entry(update.agent_id.clone())
            .or_insert_with(|| AgentStats {
                agent_id: update.agent_id.clone(),
                ..AgentStats::default()
            });
        entry.pushes += 1;
        entry.last_base_version = update.base_version;
        entry.last_new_version = receipt.new_version;
        entry.max_staleness = entry.max_staleness.max(receipt.staleness);
        entry.samples += u64::from(update.sample_count);
        drop(entry);

        metrics::counter!("paramsync_pushes_applied_total", 1);
        #[allow(clippy::cast_precision_loss)]
        let staleness = receipt.staleness as f64;
        metrics::histogram!("paramsync_push_staleness", staleness);

        tracing::debug!(
            agent = %update.agent_id,
            base_version = update.base_version,
            new_version = receipt.new_version,
            staleness = receipt.staleness,
            samples = update.sample_count,
            "applied gradient"
        );
    }

    /// Write `snapshot` off the critical section.
    ///
    /// Runs in its own task so a push future dropped mid-write does not
    /// abandon the checkpoint. A failed write restores the threshold counter
    /// so the next push tries again.
    async fn checkpoint(&self, snapshot: Arc<ModelSnapshot>) {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let version = snapshot.version;
            let result = inner.checkpoints.persist(&snapshot, inner.job_id).await;

            match result {
                Ok(path) => {
                    inner.state.lock().checkpoints_written += 1;
                    metrics::counter!("paramsync_checkpoints_written_total", 1);
                    tracing::info!(version, path = ?path, "checkpoint written");

                    if inner.options.keep_checkpoints > 0 {
                        if let Err(e) = inner
                            .checkpoints
                            .prune(inner.job_id, inner.options.keep_checkpoints)
                            .await
                        {
                            tracing::warn!(error = %e, "failed to prune checkpoints");
                        }
                    }
                }
                Err(e) => {
                    inner.restore_checkpoint_debt();
                    tracing::error!(version, error = %e, "checkpoint failed, retrying on next push");
                }
            }
        });

        if let Err(e) = task.await {
            self.inner.restore_checkpoint_debt();
            tracing::error!(error = %e, "checkpoint task aborted");
        }
    }
}

impl Inner {
    fn restore_checkpoint_debt(&self) {
        let mut state = self.state.lock();
        state.updates_since_checkpoint += self.options.checkpoint_frequency;
        state.checkpoint_failures += 1;
        metrics::counter!("paramsync_checkpoint_failures_total", 1);
    }
}
