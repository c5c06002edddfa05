//! Episode state machine
//!
//! An episode starts `Running` after [`EpisodeStateMachine::begin`] and ends
//! either `Terminal` (the environment reported done) or `Timeout` (the
//! episode ran for `max_runtime` on the monotonic clock, or the environment
//! truncated it). Only `Terminal` marks the last transition terminal. The limit also
//! bounds every await inside a step, so a stalled environment or compute
//! call cannot hold an episode open. Transitions are
//! staged in a [`Trajectory`] and only handed out by
//! [`EpisodeStateMachine::finish`], so an aborted episode never reaches
//! replay memory.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use paramsync_core::{ComputeBackend, Environment, Observation, Trajectory, Transition};

/// Phase of the current episode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodePhase {
    /// Not started, or its data was discarded
    Idle,
    /// Steps are being taken
    Running,
    /// The environment ended the episode
    Terminal,
    /// The wall-clock limit ended the episode
    Timeout,
}

impl EpisodePhase {
    /// Whether the episode has ended
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Terminal | Self::Timeout)
    }

    /// Label used in logs and metrics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Terminal => "terminal",
            Self::Timeout => "timeout",
        }
    }
}

/// Drives one environment through epsilon-greedy episodes
#[derive(Debug)]
pub struct EpisodeStateMachine {
    phase: EpisodePhase,
    max_runtime: Duration,
    started: Instant,
    observation: Option<Observation>,
    trajectory: Trajectory,
}

impl EpisodeStateMachine {
    /// State machine whose episodes time out after `max_runtime`
    #[must_use]
    pub fn new(max_runtime: Duration) -> Self {
        Self {
            phase: EpisodePhase::Idle,
            max_runtime,
            started: Instant::now(),
            observation: None,
            trajectory: Trajectory::new(),
        }
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> EpisodePhase {
        self.phase
    }

    /// Transitions staged so far in this episode
    #[must_use]
    pub fn staged(&self) -> &Trajectory {
        &self.trajectory
    }

    /// Time since the episode started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Reset the environment and start a fresh episode
    pub async fn begin<E>(&mut self, env: &mut E) -> paramsync_core::Result<()>
    where
        E: Environment + ?Sized,
    {
        self.discard();
        let observation = env.reset().await?;
        self.observation = Some(observation);
        self.started = Instant::now();
        self.phase = EpisodePhase::Running;
        Ok(())
    }

    /// Take one epsilon-greedy step and return the resulting phase.
    ///
    /// With probability `epsilon` the action is drawn uniformly from the
    /// action space, otherwise `compute` picks the action the weights rate
    /// highest. On error nothing is recorded for this step.
    pub async fn step<E, C, R>(
        &mut self,
        env: &mut E,
        compute: &C,
        weights: &[u8],
        epsilon: f64,
        rng: &mut R,
    ) -> paramsync_core::Result<EpisodePhase>
    where
        E: Environment + ?Sized,
        C: ComputeBackend + ?Sized,
        R: Rng + Send + ?Sized,
    {
        if self.phase != EpisodePhase::Running {
            return Ok(self.phase);
        }
        if self.timed_out() {
            self.phase = EpisodePhase::Timeout;
            return Ok(self.phase);
        }

        let Some(state) = self.observation.take() else {
            return Err(paramsync_core::Error::Environment(
                "episode running without an observation".into(),
            ));
        };

        let deadline = self.started + self.max_runtime;
        let explore = rng.gen::<f64>() < epsilon;
        let action = if explore {
            env.action_space().sample(rng)
        } else {
            let selected =
                tokio::time::timeout_at(deadline, compute.select_action(weights, &state)).await;
            match selected {
                Ok(Ok(action)) => action,
                Ok(Err(e)) => {
                    self.observation = Some(state);
                    return Err(e.into());
                }
                Err(_) => return Ok(self.expire(state)),
            }
        };

        let stepped = tokio::time::timeout_at(deadline, env.step(action)).await;
        let outcome = match stepped {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                self.observation = Some(state);
                return Err(e);
            }
            Err(_) => return Ok(self.expire(state)),
        };

        self.observation = Some(outcome.observation.clone());
        self.trajectory.push(Transition {
            state,
            action,
            reward: outcome.reward,
            next_state: outcome.observation,
            is_terminal: outcome.done,
        });

        self.phase = if outcome.done {
            EpisodePhase::Terminal
        } else if outcome.truncated || self.timed_out() {
            EpisodePhase::Timeout
        } else {
            EpisodePhase::Running
        };
        Ok(self.phase)
    }

    /// Run steps until the episode ends
    pub async fn run<E, C, R>(
        &mut self,
        env: &mut E,
        compute: &C,
        weights: &[u8],
        epsilon: f64,
        rng: &mut R,
    ) -> paramsync_core::Result<EpisodePhase>
    where
        E: Environment + ?Sized,
        C: ComputeBackend + ?Sized,
        R: Rng + Send + ?Sized,
    {
        loop {
            let phase = self.step(env, compute, weights, epsilon, rng).await?;
            if phase.is_finished() {
                return Ok(phase);
            }
        }
    }

    /// Hand out the transitions of a finished episode
    pub fn finish(&mut self) -> Trajectory {
        self.phase = EpisodePhase::Idle;
        self.observation = None;
        std::mem::take(&mut self.trajectory)
    }

    /// Drop everything staged for the current episode
    pub fn discard(&mut self) {
        self.phase = EpisodePhase::Idle;
        self.observation = None;
        self.trajectory = Trajectory::new();
    }

    /// End the episode at the deadline; the step in flight records nothing
    fn expire(&mut self, state: Observation) -> EpisodePhase {
        tracing::debug!(staged = self.trajectory.len(), "episode step cut off by wall-clock limit");
        self.observation = Some(state);
        self.phase = EpisodePhase::Timeout;
        self.phase
    }

    fn timed_out(&self) -> bool {
        self.started.elapsed() >= self.max_runtime
    }
}
