//! Environment trait driven by the agent's episode loop

use async_trait::async_trait;

use crate::{DiscreteAction, DiscreteSpace, Observation, Reward};

/// Result of a single environment step
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Observation after the action
    pub observation: Observation,
    /// Reward signal
    pub reward: Reward,
    /// Whether the environment reached a terminal state
    pub done: bool,
    /// Whether the environment cut the episode short in a non-terminal state
    pub truncated: bool,
}

/// Core environment trait
#[async_trait]
pub trait Environment: Send {
    /// The discrete action space
    fn action_space(&self) -> DiscreteSpace;

    /// Reset the environment and return the first observation
    async fn reset(&mut self) -> crate::Result<Observation>;

    /// Take a step in the environment
    async fn step(&mut self, action: DiscreteAction) -> crate::Result<Step>;

    /// Close the environment
    async fn close(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<E: Environment + ?Sized> Environment for Box<E> {
    fn action_space(&self) -> DiscreteSpace {
        (**self).action_space()
    }

    async fn reset(&mut self) -> crate::Result<Observation> {
        (**self).reset().await
    }

    async fn step(&mut self, action: DiscreteAction) -> crate::Result<Step> {
        (**self).step(action).await
    }

    async fn close(&mut self) -> crate::Result<()> {
        (**self).close().await
    }
}
