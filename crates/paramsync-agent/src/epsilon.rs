//! Exploration schedule

use paramsync_core::{EpsilonResume, NodeConfig};

/// Trait for schedules (e.g., for epsilon decay)
pub trait Schedule: Send + Sync {
    /// Get value after `t` completed iterations
    fn value(&self, t: u64) -> f64;
}

/// Linear epsilon decay with a floor:
/// `max(min, initial - t * reduction)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsilonSchedule {
    /// Epsilon before the first iteration
    pub initial: f64,
    /// Decrement per iteration
    pub reduction: f64,
    /// Floor
    pub min: f64,
}

impl EpsilonSchedule {
    /// Create a new epsilon schedule
    #[must_use]
    pub fn new(initial: f64, reduction: f64, min: f64) -> Self {
        Self {
            initial,
            reduction,
            min,
        }
    }

    /// Schedule described by a node configuration, honouring its resume policy
    #[must_use]
    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(
            config.initial_epsilon,
            config.per_iter_epsilon_reduction,
            config.min_epsilon,
        )
        .resumed(config.resume_epsilon)
    }

    /// Starting point for an agent that lost its local state
    #[must_use]
    pub fn resumed(self, policy: EpsilonResume) -> Self {
        match policy {
            EpsilonResume::Initial => self,
            EpsilonResume::Minimum => Self {
                initial: self.min,
                ..self
            },
        }
    }
}

impl Schedule for EpsilonSchedule {
    #[allow(clippy::cast_precision_loss)]
    fn value(&self, t: u64) -> f64 {
        (self.initial - t as f64 * self.reduction).max(self.min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_linear_decay_to_floor() {
        let schedule = EpsilonSchedule::new(1.0, 0.25, 0.1);
        assert_relative_eq!(schedule.value(0), 1.0);
        assert_relative_eq!(schedule.value(1), 0.75);
        assert_relative_eq!(schedule.value(3), 0.25);
        assert_relative_eq!(schedule.value(4), 0.1);
        assert_relative_eq!(schedule.value(1_000), 0.1);
    }

    #[test]
    fn test_resume_policies() {
        let schedule = EpsilonSchedule::new(1.0, 0.01, 0.05);
        assert_relative_eq!(schedule.resumed(EpsilonResume::Initial).value(0), 1.0);
        assert_relative_eq!(schedule.resumed(EpsilonResume::Minimum).value(0), 0.05);

        let config = NodeConfig {
            resume_epsilon: EpsilonResume::Minimum,
            min_epsilon: 0.2,
            ..NodeConfig::default()
        };
        assert_relative_eq!(EpsilonSchedule::from_config(&config).value(0), 0.2);
    }

    proptest! {
        #[test]
        fn prop_matches_closed_form(
            initial in 0.0f64..=1.0,
            reduction in 0.0f64..0.1,
            floor in 0.0f64..=1.0,
            i in 0u64..10_000,
        ) {
            let min = floor.min(initial);
            let schedule = EpsilonSchedule::new(initial, reduction, min);
            #[allow(clippy::cast_precision_loss)]
            let expected = (initial - i as f64 * reduction).max(min);
            prop_assert!((schedule.value(i) - expected).abs() < 1e-12);
            prop_assert!(schedule.value(i) >= min);
            prop_assert!(schedule.value(i + 1) <= schedule.value(i));
        }
    }
}
