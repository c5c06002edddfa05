//! Bounded experience replay

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;

use paramsync_core::{InsufficientDataError, Transition};

/// Fixed-capacity FIFO of transitions.
///
/// Once full, every insert evicts the oldest transition.
#[derive(Debug, Clone)]
pub struct ReplayMemory {
    buffer: VecDeque<Transition>,
    capacity: usize,
}

impl ReplayMemory {
    /// Create a new replay memory
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a transition, evicting the oldest when full
    pub fn push(&mut self, transition: Transition) {
        if self.capacity == 0 {
            return;
        }
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    /// Add transitions in order
    pub fn extend(&mut self, transitions: impl IntoIterator<Item = Transition>) {
        for transition in transitions {
            self.push(transition);
        }
    }

    /// Draw `n` distinct transitions uniformly at random.
    ///
    /// The memory itself is left unchanged.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<Transition>, InsufficientDataError> {
        if self.buffer.len() < n {
            return Err(InsufficientDataError {
                requested: n,
                available: self.buffer.len(),
            });
        }

        let indices: Vec<usize> = (0..self.buffer.len()).collect();
        Ok(indices
            .choose_multiple(rng, n)
            .map(|&i| self.buffer[i].clone())
            .collect())
    }

    /// Stored transitions, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.buffer.iter()
    }

    /// Get the current size of the memory
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if memory is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Maximum number of transitions held
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
