//! Reference environment and compute backend for paramsync
//!
//! [`CartPoleEnv`] and [`LinearQBackend`] are small enough to train inside
//! tests and local runs while exercising the same seams a real environment
//! and network would.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cartpole;
pub mod linear_q;

pub use cartpole::{CartPoleConfig, CartPoleEnv};
pub use linear_q::LinearQBackend;

/// Linear Q backend sized for CartPole
#[must_use]
pub fn cartpole_backend() -> LinearQBackend {
    LinearQBackend::new(cartpole::OBSERVATION_DIM, cartpole::ACTION_COUNT)
}
