//! The agent worker loop
//!
//! Each iteration pulls weights (every `sync_interval` iterations), plays one
//! episode, trains on a minibatch once the replay memory is large enough and
//! decays epsilon. Failures inside an iteration are logged and counted; the
//! loop only stops when cancelled or after `max_iterations`.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use paramsync_core::{
    ComputeBackend, ConfigError, Environment, GradientOptions, GradientUpdate, ModelSnapshot,
    NodeConfig, ParameterClient,
};

use crate::episode::{EpisodePhase, EpisodeStateMachine};
use crate::epsilon::{EpsilonSchedule, Schedule};
use crate::replay::ReplayMemory;

/// Settings of one agent worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Agent identifier sent with every push
    pub agent_id: String,
    /// Minibatch size
    pub batch_size: usize,
    /// Replay memory capacity
    pub replay_memory_size: usize,
    /// Iterations between pulls
    pub sync_interval: u64,
    /// Wall-clock limit of one episode
    pub max_epoch_runtime: Duration,
    /// Pause between failed pulls
    pub pull_retry_delay: Duration,
    /// Instructions for every gradient computation
    pub gradient_options: GradientOptions,
    /// Exploration schedule
    pub schedule: EpsilonSchedule,
    /// Stop after this many iterations
    pub max_iterations: Option<u64>,
}

impl WorkerConfig {
    /// Worker settings of an agent node
    pub fn from_node_config(config: &NodeConfig) -> Result<Self, ConfigError> {
        let agent_id = config
            .agent_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or(ConfigError::Missing("agent_id"))?;

        Ok(Self {
            agent_id,
            batch_size: config.batch_size,
            replay_memory_size: config.replay_memory_size,
            sync_interval: config.sync_interval,
            max_epoch_runtime: config.max_epoch_runtime(),
            pull_retry_delay: config.pull_retry_delay(),
            gradient_options: config.gradient_options(),
            schedule: EpsilonSchedule::from_config(config),
            max_iterations: None,
        })
    }
}

/// Mutable per-agent session data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Agent identifier
    pub agent_id: String,
    /// Exploration rate for the next episode
    pub epsilon: f64,
    /// Version of the weights in use
    pub last_synced_version: Option<u64>,
    /// Iterations run on the current weights
    pub iterations_since_sync: u64,
    /// Iterations completed
    pub iteration: u64,
}

/// How an iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The iteration ran to the end
    Completed,
    /// Cancelled while waiting for weights; nothing was recorded
    Cancelled,
}

/// Totals of a finished worker run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Agent identifier
    pub agent_id: String,
    /// Iterations completed
    pub iterations: u64,
    /// Episodes ended by the environment
    pub episodes_terminal: u64,
    /// Episodes ended by the wall-clock limit
    pub episodes_timeout: u64,
    /// Episodes discarded after an error
    pub episodes_discarded: u64,
    /// Pushes acknowledged by the server
    pub pushes_applied: u64,
    /// Pushes refused by the server
    pub pushes_rejected: u64,
    /// Pushes with unknown outcome
    pub pushes_unknown: u64,
    /// Failed pull attempts
    pub pull_failures: u64,
    /// Failed gradient computations
    pub gradient_failures: u64,
    /// Epsilon at the end of the run
    pub final_epsilon: f64,
    /// Last version pulled
    pub last_synced_version: Option<u64>,
    /// Transitions in replay memory at the end of the run
    pub replay_len: usize,
}

/// One agent: environment, replay memory and exploration state
pub struct AgentWorker<E, C, P> {
    config: WorkerConfig,
    env: E,
    compute: C,
    client: P,
    memory: ReplayMemory,
    episode: EpisodeStateMachine,
    state: AgentState,
    weights: Option<Arc<ModelSnapshot>>,
    rng: StdRng,
    report: WorkerReport,
}

impl<E, C, P> AgentWorker<E, C, P>
where
    E: Environment,
    C: ComputeBackend,
    P: ParameterClient,
{
    /// Create a worker with fresh local state
    pub fn new(config: WorkerConfig, env: E, compute: C, client: P) -> Self {
        let state = AgentState {
            agent_id: config.agent_id.clone(),
            epsilon: config.schedule.value(0),
            last_synced_version: None,
            iterations_since_sync: 0,
            iteration: 0,
        };
        let report = WorkerReport {
            agent_id: config.agent_id.clone(),
            ..WorkerReport::default()
        };

        Self {
            memory: ReplayMemory::new(config.replay_memory_size),
            episode: EpisodeStateMachine::new(config.max_epoch_runtime),
            config,
            env,
            compute,
            client,
            state,
            weights: None,
            rng: StdRng::from_entropy(),
            report,
        }
    }

    /// Use a seeded random source
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Current session data
    #[must_use]
    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Replay memory
    #[must_use]
    pub fn memory(&self) -> &ReplayMemory {
        &self.memory
    }

    /// Totals so far
    #[must_use]
    pub fn report(&self) -> &WorkerReport {
        &self.report
    }

    /// Run iterations until `shutdown` turns true (or its sender is dropped)
    /// or `max_iterations` is reached
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> WorkerReport {
        tracing::info!(agent = %self.state.agent_id, epsilon = self.state.epsilon, "agent worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            if self
                .config
                .max_iterations
                .is_some_and(|max| self.state.iteration >= max)
            {
                break;
            }
            if self.run_iteration(&mut shutdown).await == IterationOutcome::Cancelled {
                break;
            }
        }

        if let Err(e) = self.env.close().await {
            tracing::warn!(agent = %self.state.agent_id, error = %e, "failed to close environment");
        }
        self.finish_report();
        tracing::info!(
            agent = %self.report.agent_id,
            iterations = self.report.iterations,
            pushes = self.report.pushes_applied,
            "agent worker stopped"
        );
        self.report
    }

    /// Run one iteration
    pub async fn run_iteration(&mut self, shutdown: &mut watch::Receiver<bool>) -> IterationOutcome {
        let Some(snapshot) = self.sync_weights(shutdown).await else {
            return IterationOutcome::Cancelled;
        };

        self.play_episode(&snapshot).await;
        if self.memory.len() >= self.config.batch_size {
            self.train(&snapshot).await;
        }

        self.state.iteration += 1;
        self.state.iterations_since_sync += 1;
        self.state.epsilon = self.config.schedule.value(self.state.iteration);
        self.report.iterations = self.state.iteration;
        metrics::counter!("paramsync_agent_iterations_total", 1, "agent" => self.state.agent_id.clone());

        IterationOutcome::Completed
    }

    /// Current weights, pulling when due. `None` when cancelled while the
    /// server is unreachable.
    async fn sync_weights(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Arc<ModelSnapshot>> {
        if let Some(weights) = &self.weights {
            if self.state.iterations_since_sync < self.config.sync_interval {
                return Some(Arc::clone(weights));
            }
        }

        loop {
            match self.client.pull().await {
                Ok(snapshot) => {
                    tracing::debug!(agent = %self.state.agent_id, version = snapshot.version, "pulled weights");
                    self.state.last_synced_version = Some(snapshot.version);
                    self.state.iterations_since_sync = 0;
                    self.weights = Some(Arc::clone(&snapshot));
                    return Some(snapshot);
                }
                Err(e) => {
                    self.report.pull_failures += 1;
                    metrics::counter!("paramsync_transport_failures_total", 1, "operation" => "pull");
                    tracing::warn!(agent = %self.state.agent_id, error = %e, "pull failed, retrying");

                    tokio::select! {
                        () = tokio::time::sleep(self.config.pull_retry_delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                return None;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn play_episode(&mut self, snapshot: &ModelSnapshot) {
        let result = match self.episode.begin(&mut self.env).await {
            Ok(()) => {
                self.episode
                    .run(
                        &mut self.env,
                        &self.compute,
                        &snapshot.weights,
                        self.state.epsilon,
                        &mut self.rng,
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(phase) => {
                let trajectory = self.episode.finish();
                match phase {
                    EpisodePhase::Timeout => self.report.episodes_timeout += 1,
                    _ => self.report.episodes_terminal += 1,
                }
                metrics::counter!("paramsync_episodes_total", 1, "outcome" => phase.as_str());
                tracing::debug!(
                    agent = %self.state.agent_id,
                    outcome = phase.as_str(),
                    steps = trajectory.len(),
                    reward = trajectory.total_reward,
                    "episode finished"
                );
                self.memory.extend(trajectory.into_transitions());
            }
            Err(e) => {
                let staged = self.episode.staged().len();
                self.episode.discard();
                self.report.episodes_discarded += 1;
                if matches!(e, paramsync_core::Error::Compute(_)) {
                    metrics::counter!("paramsync_compute_failures_total", 1, "step" => "select_action");
                    // Re-pull before the next episode
                    self.weights = None;
                }
                metrics::counter!("paramsync_episodes_total", 1, "outcome" => "discarded");
                tracing::warn!(agent = %self.state.agent_id, error = %e, staged, "episode discarded");
            }
        }
    }

    async fn train(&mut self, snapshot: &ModelSnapshot) {
        let batch = match self.memory.sample(self.config.batch_size, &mut self.rng) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::debug!(agent = %self.state.agent_id, error = %e, "not enough data to train");
                return;
            }
        };

        let gradient = match self
            .compute
            .compute_gradient(&snapshot.weights, &batch, &self.config.gradient_options)
            .await
        {
            Ok(gradient) => gradient,
            Err(e) => {
                self.report.gradient_failures += 1;
                self.weights = None;
                metrics::counter!("paramsync_compute_failures_total", 1, "step" => "compute_gradient");
                tracing::warn!(agent = %self.state.agent_id, error = %e, "gradient computation failed");
                return;
            }
        };

        let update = GradientUpdate {
            base_version: snapshot.version,
            gradient,
            agent_id: self.state.agent_id.clone(),
            sample_count: u32::try_from(batch.len()).unwrap_or(u32::MAX),
        };

        match self.client.push(update).await {
            Ok(receipt) => {
                self.report.pushes_applied += 1;
                tracing::debug!(
                    agent = %self.state.agent_id,
                    base_version = snapshot.version,
                    new_version = receipt.new_version,
                    staleness = receipt.staleness,
                    "pushed gradient"
                );
            }
            Err(e) if e.is_rejection() => {
                self.report.pushes_rejected += 1;
                tracing::warn!(agent = %self.state.agent_id, error = %e, "gradient rejected");
            }
            Err(e) => {
                self.report.pushes_unknown += 1;
                metrics::counter!("paramsync_transport_failures_total", 1, "operation" => "push");
                tracing::warn!(agent = %self.state.agent_id, error = %e, "push sent, outcome unknown");
            }
        }
    }

    fn finish_report(&mut self) {
        self.report.final_epsilon = self.state.epsilon;
        self.report.last_synced_version = self.state.last_synced_version;
        self.report.replay_len = self.memory.len();
    }
}
