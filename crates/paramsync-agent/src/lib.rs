//! Agent side of paramsync
//!
//! An agent repeatedly pulls the current weights, plays one episode against
//! its environment, trains on a minibatch from its replay memory and pushes
//! the gradient back to the parameter server.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod episode;
pub mod epsilon;
pub mod replay;
pub mod worker;

pub use episode::{EpisodePhase, EpisodeStateMachine};
pub use epsilon::{EpsilonSchedule, Schedule};
pub use replay::ReplayMemory;
pub use worker::{AgentState, AgentWorker, IterationOutcome, WorkerConfig, WorkerReport};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{AgentWorker, EpsilonSchedule, ReplayMemory, WorkerConfig, WorkerReport};
    pub use paramsync_core::prelude::*;
}
