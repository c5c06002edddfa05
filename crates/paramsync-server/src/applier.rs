//! Merging gradients into the canonical weights
//!
//! The applier runs inside the server's push critical section, so it must be
//! cheap relative to gradient computation and must never block.

use paramsync_core::blob;
use paramsync_core::{ApplyError, StalenessScaling};

/// Turns `(weights, gradient)` into the next weights
pub trait GradientApplier: Send + Sync {
    /// Apply `gradient` to `weights`, scaled by `scale`
    fn apply(&self, weights: &[u8], gradient: &[u8], scale: f32) -> Result<Vec<u8>, ApplyError>;
}

/// Plain stochastic gradient descent over little-endian `f32` blobs:
/// `w <- w - learning_rate * scale * g`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sgd {
    /// Step size
    pub learning_rate: f32,
}

impl Sgd {
    /// Create an SGD applier
    #[must_use]
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl GradientApplier for Sgd {
    fn apply(&self, weights: &[u8], gradient: &[u8], scale: f32) -> Result<Vec<u8>, ApplyError> {
        if weights.len() != gradient.len() {
            return Err(ApplyError::LengthMismatch {
                weights: weights.len(),
                gradient: gradient.len(),
            });
        }
        let mut params = blob::decode_f32(weights)?;
        let grads = blob::decode_f32(gradient)?;

        let step = self.learning_rate * scale;
        for (w, g) in params.iter_mut().zip(&grads) {
            *w -= step * g;
        }
        Ok(blob::encode_f32(&params))
    }
}

/// Multiplier applied to a gradient that missed `staleness` updates
#[must_use]
pub fn staleness_scale(policy: StalenessScaling, staleness: u64) -> f32 {
    match policy {
        StalenessScaling::None => 1.0,
        #[allow(clippy::cast_precision_loss)]
        StalenessScaling::Inverse => 1.0 / (1.0 + staleness as f32),
    }
}
