//! CartPole balancing task

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use paramsync_core::{
    DiscreteAction, DiscreteSpace, Environment, Error, Observation, Result, Reward, Step,
};

/// Number of features in a CartPole observation
pub const OBSERVATION_DIM: usize = 4;

/// Number of CartPole actions: 0 pushes left, 1 pushes right
pub const ACTION_COUNT: usize = 2;

/// Physical constants and episode limits
#[derive(Debug, Clone, PartialEq)]
pub struct CartPoleConfig {
    /// Gravitational acceleration
    pub gravity: f64,
    /// Mass of the cart
    pub mass_cart: f64,
    /// Mass of the pole
    pub mass_pole: f64,
    /// Half the pole length
    pub length: f64,
    /// Force applied per action
    pub force_mag: f64,
    /// Steps before the episode is cut off
    pub max_steps: usize,
    /// Cart position limit
    pub x_threshold: f64,
    /// Pole angle limit in radians
    pub theta_threshold: f64,
}

impl Default for CartPoleConfig {
    fn default() -> Self {
        Self {
            gravity: 9.8,
            mass_cart: 1.0,
            mass_pole: 0.1,
            length: 0.5,
            force_mag: 10.0,
            max_steps: 500,
            x_threshold: 2.4,
            theta_threshold: 0.209, // ~12 degrees
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CartPoleState {
    x: f64,         // Cart position
    x_dot: f64,     // Cart velocity
    theta: f64,     // Pole angle
    theta_dot: f64, // Pole angular velocity
}

/// CartPole environment
pub struct CartPoleEnv {
    state: CartPoleState,
    config: CartPoleConfig,
    steps: usize,
    rng: StdRng,
}

impl CartPoleEnv {
    /// CartPole with default physics
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CartPoleConfig::default())
    }

    /// CartPole with custom physics
    #[must_use]
    pub fn with_config(config: CartPoleConfig) -> Self {
        Self {
            state: CartPoleState::default(),
            config,
            steps: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a seeded random source for resets
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    #[allow(clippy::cast_possible_truncation)]
    fn observation(&self) -> Observation {
        Observation::new(vec![
            self.state.x as f32,
            self.state.x_dot as f32,
            self.state.theta as f32,
            self.state.theta_dot as f32,
        ])
    }

    fn has_fallen(&self) -> bool {
        self.state.x.abs() > self.config.x_threshold
            || self.state.theta.abs() > self.config.theta_threshold
    }
}

impl Default for CartPoleEnv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Environment for CartPoleEnv {
    fn action_space(&self) -> DiscreteSpace {
        DiscreteSpace::new(ACTION_COUNT)
    }

    async fn reset(&mut self) -> Result<Observation> {
        self.state = CartPoleState {
            x: self.rng.gen_range(-0.05..0.05),
            x_dot: self.rng.gen_range(-0.05..0.05),
            theta: self.rng.gen_range(-0.05..0.05),
            theta_dot: self.rng.gen_range(-0.05..0.05),
        };
        self.steps = 0;

        Ok(self.observation())
    }

    async fn step(&mut self, action: DiscreteAction) -> Result<Step> {
        let force = match action.index() {
            0 => -self.config.force_mag,
            1 => self.config.force_mag,
            other => {
                return Err(Error::Environment(format!("invalid CartPole action {other}")));
            }
        };

        let cos_theta = self.state.theta.cos();
        let sin_theta = self.state.theta.sin();

        let total_mass = self.config.mass_cart + self.config.mass_pole;
        let pole_mass_length = self.config.mass_pole * self.config.length;

        let temp =
            (force + pole_mass_length * self.state.theta_dot.powi(2) * sin_theta) / total_mass;
        let theta_acc = (self.config.gravity * sin_theta - cos_theta * temp)
            / (self.config.length
                * (4.0 / 3.0 - self.config.mass_pole * cos_theta.powi(2) / total_mass));
        let x_acc = temp - pole_mass_length * theta_acc * cos_theta / total_mass;

        let dt = 0.02;
        self.state.x += dt * self.state.x_dot;
        self.state.x_dot += dt * x_acc;
        self.state.theta += dt * self.state.theta_dot;
        self.state.theta_dot += dt * theta_acc;

        self.steps += 1;
        let done = self.has_fallen();

        Ok(Step {
            observation: self.observation(),
            reward: Reward(1.0), // one per step survived
            done,
            truncated: !done && self.steps >= self.config.max_steps,
        })
    }
}
