//! The pluggable network compute capability
//!
//! The coordination core never looks inside a weight or gradient blob. Action
//! selection and gradient computation are delegated to a [`ComputeBackend`],
//! which tests replace with a deterministic fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ComputeError;
use crate::{DiscreteAction, Observation, Transition};

/// Which parameters a gradient may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerTraining {
    /// Every parameter receives a gradient
    #[default]
    All,
    /// Convolutional parameters are excluded from the gradient
    FreezeConvolutional,
}

/// Instructions carried with every gradient request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GradientOptions {
    /// Which parameters may change
    pub layer_training: LayerTraining,
}

impl GradientOptions {
    /// Whether convolutional parameters must be left out of the gradient
    #[must_use]
    pub fn freezes_convolutional(&self) -> bool {
        self.layer_training == LayerTraining::FreezeConvolutional
    }
}

/// Opaque network forward/backward computation
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Weights for a model that has never been trained
    fn initial_weights(&self) -> Vec<u8>;

    /// The action the weights rate highest for an observation
    async fn select_action(
        &self,
        weights: &[u8],
        observation: &Observation,
    ) -> Result<DiscreteAction, ComputeError>;

    /// Gradient of the training loss over a minibatch
    async fn compute_gradient(
        &self,
        weights: &[u8],
        minibatch: &[Transition],
        options: &GradientOptions,
    ) -> Result<Vec<u8>, ComputeError>;
}

#[async_trait]
impl<T: ComputeBackend + ?Sized> ComputeBackend for std::sync::Arc<T> {
    fn initial_weights(&self) -> Vec<u8> {
        (**self).initial_weights()
    }

    async fn select_action(
        &self,
        weights: &[u8],
        observation: &Observation,
    ) -> Result<DiscreteAction, ComputeError> {
        (**self).select_action(weights, observation).await
    }

    async fn compute_gradient(
        &self,
        weights: &[u8],
        minibatch: &[Transition],
        options: &GradientOptions,
    ) -> Result<Vec<u8>, ComputeError> {
        (**self).compute_gradient(weights, minibatch, options).await
    }
}
