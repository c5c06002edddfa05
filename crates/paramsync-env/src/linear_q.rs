//! Linear Q-function compute backend
//!
//! `Q(s, ·) = s · W + b` with `W` of shape `(obs_dim, n_actions)`. The weight
//! blob is `W` in row-major order followed by `b`, as little-endian `f32`.
//! Gradients are the semi-gradient of the one-step TD error averaged over
//! the minibatch, in the same layout.

use async_trait::async_trait;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use paramsync_core::{
    blob, ComputeBackend, ComputeError, DiscreteAction, GradientOptions, Observation, Transition,
};

/// Reference Q-learning backend over a linear model
#[derive(Debug, Clone)]
pub struct LinearQBackend {
    obs_dim: usize,
    n_actions: usize,
    gamma: f32,
    seed: u64,
}

impl LinearQBackend {
    /// Backend for `obs_dim` features and `n_actions` actions
    #[must_use]
    pub fn new(obs_dim: usize, n_actions: usize) -> Self {
        Self {
            obs_dim,
            n_actions,
            gamma: 0.99,
            seed: 0,
        }
    }

    /// Set the discount factor
    #[must_use]
    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    /// Seed of the initial weights
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Parameters in a weight blob
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.obs_dim * self.n_actions + self.n_actions
    }

    fn decode(&self, weights: &[u8]) -> Result<(Array2<f32>, Array1<f32>), ComputeError> {
        let params =
            blob::decode_f32(weights).map_err(|e| ComputeError::MalformedWeights(e.to_string()))?;
        if params.len() != self.param_count() {
            return Err(ComputeError::MalformedWeights(format!(
                "expected {} parameters, got {}",
                self.param_count(),
                params.len()
            )));
        }

        let split = self.obs_dim * self.n_actions;
        let w = ArrayView2::from_shape((self.obs_dim, self.n_actions), &params[..split])
            .map_err(|e| ComputeError::MalformedWeights(e.to_string()))?
            .to_owned();
        let b = Array1::from(params[split..].to_vec());
        Ok((w, b))
    }

    fn check_observation(&self, observation: &Observation) -> Result<(), ComputeError> {
        if observation.len() == self.obs_dim {
            Ok(())
        } else {
            Err(ComputeError::MalformedObservation {
                expected: self.obs_dim,
                actual: observation.len(),
            })
        }
    }

    fn q_values(w: &Array2<f32>, b: &Array1<f32>, observation: &Observation) -> Array1<f32> {
        ArrayView1::from(observation.as_slice()).dot(w) + b
    }
}

fn argmax(values: &Array1<f32>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_value), (i, &v)| {
            if v > best_value {
                (i, v)
            } else {
                (best, best_value)
            }
        })
        .0
}

#[async_trait]
impl ComputeBackend for LinearQBackend {
    fn initial_weights(&self) -> Vec<u8> {
        #[allow(clippy::cast_precision_loss)]
        let limit = (6.0 / (self.obs_dim + self.n_actions) as f32).sqrt();
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut params: Vec<f32> = (0..self.obs_dim * self.n_actions)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();
        params.extend(std::iter::repeat(0.0).take(self.n_actions));
        blob::encode_f32(&params)
    }

    async fn select_action(
        &self,
        weights: &[u8],
        observation: &Observation,
    ) -> Result<DiscreteAction, ComputeError> {
        self.check_observation(observation)?;
        let (w, b) = self.decode(weights)?;
        let q = Self::q_values(&w, &b, observation);
        if q.iter().any(|v| !v.is_finite()) {
            return Err(ComputeError::Numerical("non-finite Q-value".into()));
        }
        Ok(DiscreteAction(argmax(&q)))
    }

    async fn compute_gradient(
        &self,
        weights: &[u8],
        minibatch: &[Transition],
        options: &GradientOptions,
    ) -> Result<Vec<u8>, ComputeError> {
        if options.freezes_convolutional() {
            // A linear model has no convolutional parameters to hold back
            tracing::debug!("convolutional freeze requested on a linear model");
        }
        let (w, b) = self.decode(weights)?;

        let mut grad_w = Array2::<f32>::zeros((self.obs_dim, self.n_actions));
        let mut grad_b = Array1::<f32>::zeros(self.n_actions);

        for transition in minibatch {
            self.check_observation(&transition.state)?;
            self.check_observation(&transition.next_state)?;
            let action = transition.action.index();
            if action >= self.n_actions {
                return Err(ComputeError::Backend(format!(
                    "action {action} outside {} actions",
                    self.n_actions
                )));
            }

            let q = Self::q_values(&w, &b, &transition.state);
            let bootstrap = if transition.is_terminal {
                0.0
            } else {
                let next = Self::q_values(&w, &b, &transition.next_state);
                self.gamma * next[argmax(&next)]
            };
            let target = transition.reward.value() + bootstrap;
            let delta = q[action] - target;

            let state = ArrayView1::from(transition.state.as_slice());
            let mut column = grad_w.slice_mut(s![.., action]);
            column.scaled_add(delta, &state);
            grad_b[action] += delta;
        }

        if !minibatch.is_empty() {
            #[allow(clippy::cast_precision_loss)]
            let n = minibatch.len() as f32;
            grad_w /= n;
            grad_b /= n;
        }

        let mut gradient: Vec<f32> = grad_w.iter().copied().collect();
        gradient.extend(grad_b.iter().copied());
        if gradient.iter().any(|g| !g.is_finite()) {
            return Err(ComputeError::Numerical("non-finite gradient".into()));
        }
        Ok(blob::encode_f32(&gradient))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use paramsync_core::Reward;

    fn weights(w: &[f32], b: &[f32]) -> Vec<u8> {
        let mut params = w.to_vec();
        params.extend_from_slice(b);
        blob::encode_f32(&params)
    }

    #[tokio::test]
    async fn test_initial_weights_shape_and_seed() {
        let backend = LinearQBackend::new(4, 2).with_seed(9);
        let first = backend.initial_weights();
        assert_eq!(blob::param_count(&first), 10);
        assert_eq!(first, backend.initial_weights());
    }

    #[tokio::test]
    async fn test_select_action_is_argmax() {
        let backend = LinearQBackend::new(2, 3);
        // Row-major (obs_dim, n_actions): feature 0 favours action 2
        let w = weights(&[0.0, 1.0, 2.0, 0.0, 0.0, 0.0], &[0.0, 0.0, 0.0]);

        let action = backend
            .select_action(&w, &Observation::new(vec![1.0, 0.0]))
            .await
            .unwrap();
        assert_eq!(action, DiscreteAction(2));

        // Bias can dominate
        let w = weights(&[0.0; 6], &[5.0, 0.0, 0.0]);
        let action = backend
            .select_action(&w, &Observation::new(vec![1.0, 1.0]))
            .await
            .unwrap();
        assert_eq!(action, DiscreteAction(0));
    }

    #[tokio::test]
    async fn test_malformed_inputs() {
        let backend = LinearQBackend::new(2, 2);
        let w = backend.initial_weights();

        assert_eq!(
            backend
                .select_action(&w, &Observation::new(vec![1.0]))
                .await
                .unwrap_err(),
            ComputeError::MalformedObservation {
                expected: 2,
                actual: 1
            }
        );
        assert!(matches!(
            backend
                .select_action(&w[..8], &Observation::new(vec![1.0, 1.0]))
                .await,
            Err(ComputeError::MalformedWeights(_))
        ));
    }

    #[tokio::test]
    async fn test_terminal_td_gradient() {
        let backend = LinearQBackend::new(2, 2);
        // Q(s, 0) = 1 for s = [1, 0]
        let w = weights(&[1.0, 0.0, 0.0, 0.0], &[0.0, 0.0]);
        let batch = [Transition {
            state: Observation::new(vec![1.0, 0.0]),
            action: DiscreteAction(0),
            reward: Reward(3.0),
            next_state: Observation::new(vec![0.0, 1.0]),
            is_terminal: true,
        }];

        let gradient = backend
            .compute_gradient(&w, &batch, &GradientOptions::default())
            .await
            .unwrap();
        let g = blob::decode_f32(&gradient).unwrap();

        // delta = 1 - 3 = -2 on the column of action 0 and its bias
        assert_relative_eq!(g[0], -2.0);
        assert_relative_eq!(g[1], 0.0);
        assert_relative_eq!(g[2], 0.0);
        assert_relative_eq!(g[3], 0.0);
        assert_relative_eq!(g[4], -2.0);
        assert_relative_eq!(g[5], 0.0);
    }

    #[tokio::test]
    async fn test_bootstrapped_gradient_is_averaged() {
        let backend = LinearQBackend::new(1, 2).with_gamma(0.5);
        // Q(s, a) = s * [1, 2]
        let w = weights(&[1.0, 2.0], &[0.0, 0.0]);
        let transition = Transition {
            state: Observation::new(vec![1.0]),
            action: DiscreteAction(1),
            reward: Reward(0.0),
            next_state: Observation::new(vec![2.0]),
            is_terminal: false,
        };
        let batch = [transition.clone(), transition];

        let g = blob::decode_f32(
            &backend
                .compute_gradient(&w, &batch, &GradientOptions::default())
                .await
                .unwrap(),
        )
        .unwrap();

        // target = 0.5 * max(2, 4) = 2, Q = 2, delta = 0
        assert_relative_eq!(g[1], 0.0);
        assert_relative_eq!(g[3], 0.0);
    }
}
