//! Transitions and per-episode trajectories

use serde::{Deserialize, Serialize};

use crate::{DiscreteAction, Observation, Reward};

/// Single environment step as stored in replay memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Observation before the action
    pub state: Observation,
    /// Action taken
    pub action: DiscreteAction,
    /// Reward received
    pub reward: Reward,
    /// Observation after the action
    pub next_state: Observation,
    /// Whether the environment ended the episode on this step
    pub is_terminal: bool,
}

/// Transitions collected during one episode, in step order
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    /// Sequence of transitions
    pub transitions: Vec<Transition>,
    /// Total reward
    pub total_reward: f64,
}

impl Trajectory {
    /// Create a new empty trajectory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transition to the trajectory
    pub fn push(&mut self, transition: Transition) {
        self.total_reward += f64::from(transition.reward.0);
        self.transitions.push(transition);
    }

    /// Get the length of the trajectory
    #[must_use]
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Check if trajectory is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Whether the last recorded step was terminal
    #[must_use]
    pub fn ended_in_terminal(&self) -> bool {
        self.transitions.last().is_some_and(|t| t.is_terminal)
    }

    /// Consume the trajectory, yielding its transitions
    #[must_use]
    pub fn into_transitions(self) -> Vec<Transition> {
        self.transitions
    }
}
