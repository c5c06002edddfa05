//! Versioned model snapshots and the updates exchanged with the server
//!
//! Snapshots and updates are value objects: once handed across the
//! transport each side works on its own copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical model weights at one version.
///
/// Versions start at 0 for a fresh model and grow by exactly one per applied
/// gradient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    /// Monotonic model version
    pub version: u64,
    /// Opaque weight blob
    pub weights: Vec<u8>,
    /// When this version was produced
    pub created_at: DateTime<Utc>,
}

impl ModelSnapshot {
    /// Snapshot of a model that has not received any update yet
    #[must_use]
    pub fn initial(weights: Vec<u8>) -> Self {
        Self::at_version(0, weights)
    }

    /// Snapshot at an explicit version, stamped now
    #[must_use]
    pub fn at_version(version: u64, weights: Vec<u8>) -> Self {
        Self {
            version,
            weights,
            created_at: Utc::now(),
        }
    }

    /// The snapshot that follows this one after one applied update
    #[must_use]
    pub fn successor(&self, weights: Vec<u8>) -> Self {
        Self::at_version(self.version + 1, weights)
    }
}

/// Gradient computed by one agent against the version it pulled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientUpdate {
    /// Version the gradient was computed against
    pub base_version: u64,
    /// Opaque gradient blob
    pub gradient: Vec<u8>,
    /// Agent that produced the update
    pub agent_id: String,
    /// Number of transitions in the minibatch
    pub sample_count: u32,
}

/// Server acknowledgement of an applied push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReceipt {
    /// Version produced by this update
    pub new_version: u64,
    /// Updates applied between the agent's pull and this push
    pub staleness: u64,
}

impl PushReceipt {
    /// Build a receipt for an update based on `base_version`
    #[must_use]
    pub fn new(base_version: u64, new_version: u64) -> Self {
        Self {
            new_version,
            staleness: staleness(base_version, new_version),
        }
    }
}

/// Number of interleaving updates an agent missed: `new - base - 1`.
///
/// Saturates at zero for a base version ahead of the server, which happens
/// when a restarted server resumes from an older checkpoint.
#[must_use]
pub fn staleness(base_version: u64, new_version: u64) -> u64 {
    new_version.saturating_sub(base_version).saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successor_increments_version() {
        let snapshot = ModelSnapshot::initial(vec![1, 2, 3]);
        assert_eq!(snapshot.version, 0);

        let next = snapshot.successor(vec![4, 5, 6]);
        assert_eq!(next.version, 1);
        assert_eq!(next.weights, vec![4, 5, 6]);
        assert!(next.created_at >= snapshot.created_at);
    }

    #[test]
    fn test_staleness() {
        assert_eq!(staleness(0, 1), 0);
        assert_eq!(staleness(0, 2), 1);
        assert_eq!(staleness(5, 9), 3);
        // Server resumed behind the agent's base version
        assert_eq!(staleness(10, 4), 0);
    }

    #[test]
    fn test_receipt() {
        let receipt = PushReceipt::new(3, 7);
        assert_eq!(receipt.new_version, 7);
        assert_eq!(receipt.staleness, 3);
    }
}
