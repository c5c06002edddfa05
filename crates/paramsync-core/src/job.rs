//! Jobs: one trainer plus a roster of agents

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;

/// Role a node plays in a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Parameter server holding the canonical model
    Trainer,
    /// Worker running episodes and pushing gradients
    Agent,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trainer => f.write_str("trainer"),
            Self::Agent => f.write_str("agent"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trainer" => Ok(Self::Trainer),
            "agent" => Ok(Self::Agent),
            other => Err(ConfigError::invalid("role", format!("unknown role {other:?}"))),
        }
    }
}

/// One node in a job roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAssignment {
    /// Node name, unique within the job
    pub node_id: String,
    /// Role of the node
    pub role: Role,
}

/// Logical grouping of one trainer and N agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier
    pub job_id: Uuid,
    /// Nodes taking part in the job
    pub roster: Vec<NodeAssignment>,
}

impl Job {
    /// New job with a fresh id, one trainer and `agents` agents named
    /// `agent-0` .. `agent-{n-1}`
    #[must_use]
    pub fn new(agents: usize) -> Self {
        Self::with_id(Uuid::new_v4(), agents)
    }

    /// Same as [`Job::new`] with a caller-chosen id
    #[must_use]
    pub fn with_id(job_id: Uuid, agents: usize) -> Self {
        let mut roster = Vec::with_capacity(agents + 1);
        roster.push(NodeAssignment {
            node_id: "trainer".to_string(),
            role: Role::Trainer,
        });
        roster.extend((0..agents).map(|i| NodeAssignment {
            node_id: format!("agent-{i}"),
            role: Role::Agent,
        }));
        Self { job_id, roster }
    }

    /// Agent node ids in roster order
    pub fn agent_ids(&self) -> impl Iterator<Item = &str> {
        self.roster
            .iter()
            .filter(|n| n.role == Role::Agent)
            .map(|n| n.node_id.as_str())
    }

    /// Number of agents in the roster
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agent_ids().count()
    }

    /// Check roster invariants: exactly one trainer and unique node ids
    pub fn validate(&self) -> Result<(), ConfigError> {
        let trainers = self
            .roster
            .iter()
            .filter(|n| n.role == Role::Trainer)
            .count();
        if trainers != 1 {
            return Err(ConfigError::invalid(
                "roster",
                format!("expected exactly one trainer, found {trainers}"),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for node in &self.roster {
            if !seen.insert(node.node_id.as_str()) {
                return Err(ConfigError::invalid(
                    "roster",
                    format!("duplicate node id {:?}", node.node_id),
                ));
            }
        }
        Ok(())
    }
}
