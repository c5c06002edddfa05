//! Coordination transport between agents and the parameter server
//!
//! Two implementations of [`paramsync_core::ParameterClient`]: an in-process
//! [`LocalClient`] and a [`TcpClient`] talking to [`serve`] over
//! length-prefixed bincode frames.

mod local;
mod tcp;
pub mod wire;

pub use local::LocalClient;
pub use tcp::{serve, TcpClient};
pub use wire::{Request, Response};
