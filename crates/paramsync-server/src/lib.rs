//! Trainer side of paramsync
//!
//! - [`ParameterServer`]: canonical versioned model with `pull` / `push`
//! - [`GradientApplier`] and [`Sgd`]: how a gradient becomes new weights
//! - [`CheckpointStore`] and [`FsCheckpointStore`]: durable snapshots
//! - [`transport`]: in-process and TCP clients, TCP server loop

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod applier;
pub mod checkpoint;
pub mod server;
pub mod transport;

pub use applier::{staleness_scale, GradientApplier, Sgd};
pub use checkpoint::{CheckpointInfo, CheckpointStore, FsCheckpointStore};
pub use server::{AgentStats, ParameterServer, ServerOptions, TrainerCounters};
pub use transport::{serve, LocalClient, TcpClient};
