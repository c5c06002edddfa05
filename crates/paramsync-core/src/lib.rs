//! Core types and traits for paramsync
//!
//! paramsync trains one reinforcement-learning model asynchronously: a single
//! trainer node (the parameter server) owns the canonical versioned weights
//! and any number of agent nodes pull weights, play episodes and push
//! gradients back. This crate holds what both sides share: the value objects
//! exchanged over the transport, node configuration, the error taxonomy and
//! the seams to the environment and to the network compute function.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod blob;
pub mod compute;
pub mod config;
pub mod environment;
pub mod error;
pub mod job;
pub mod logging;
pub mod observation;
pub mod reward;
pub mod snapshot;
pub mod trajectory;
pub mod transport;

// Re-export core traits and types
pub use action::{DiscreteAction, DiscreteSpace};
pub use compute::{ComputeBackend, GradientOptions, LayerTraining};
pub use config::{EpsilonResume, NodeConfig, StalenessScaling};
pub use environment::{Environment, Step};
pub use error::{
    ApplyError, CheckpointIoError, ComputeError, ConfigError, Error, InsufficientDataError,
    Result, TransportError,
};
pub use job::{Job, NodeAssignment, Role};
pub use observation::Observation;
pub use reward::Reward;
pub use snapshot::{staleness, GradientUpdate, ModelSnapshot, PushReceipt};
pub use trajectory::{Trajectory, Transition};
pub use transport::ParameterClient;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ComputeBackend, DiscreteAction, Environment, GradientUpdate, ModelSnapshot, NodeConfig,
        Observation, ParameterClient, Reward, Step, Transition,
    };
}
