//! Node configuration supplied by the job launcher
//!
//! Every node of a job (trainer or agent) starts from one [`NodeConfig`].
//! Values come from a TOML file, command-line flags or environment
//! variables; the node binary merges them and calls
//! [`NodeConfig::validate`] before starting.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::compute::{GradientOptions, LayerTraining};
use crate::error::ConfigError;
use crate::job::Role;

/// How the server scales a gradient that was computed against an old version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StalenessScaling {
    /// Apply every gradient at full magnitude
    #[default]
    None,
    /// Scale by `1 / (1 + staleness)`
    Inverse,
}

/// Epsilon a restarted agent starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpsilonResume {
    /// Start again from `initial_epsilon`
    #[default]
    Initial,
    /// Start at `min_epsilon`
    Minimum,
}

/// Configuration of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Role of this node
    pub role: Role,
    /// Job this node belongs to
    pub job_id: Uuid,
    /// Experiment name, used to namespace checkpoints and logs
    pub experiment_name: String,
    /// Agent identifier (agents only)
    pub agent_id: Option<String>,
    /// Applied updates between checkpoints
    pub batch_update_frequency: u64,
    /// Overrides `batch_update_frequency` for the checkpoint cadence
    pub checkpoint_frequency: Option<u64>,
    /// Wall-clock limit of one episode, in seconds
    pub max_epoch_runtime_sec: u64,
    /// Epsilon at the first iteration
    pub initial_epsilon: f64,
    /// Epsilon decrement per iteration
    pub per_iter_epsilon_reduction: f64,
    /// Epsilon floor
    pub min_epsilon: f64,
    /// Minibatch size
    pub batch_size: usize,
    /// Replay memory capacity
    pub replay_memory_size: usize,
    /// Optional pretrained starting weights
    pub weights_path: Option<PathBuf>,
    /// Whether convolutional layers keep training on top of pretrained weights
    #[serde(deserialize_with = "deserialize_flag")]
    pub train_conv_layers: bool,
    /// Root of durable storage
    pub data_dir: PathBuf,
    /// Iterations between weight pulls
    pub sync_interval: u64,
    /// Server-side treatment of stale gradients
    pub staleness_scaling: StalenessScaling,
    /// Step size of the server's gradient applier
    pub learning_rate: f32,
    /// Timeout of a single transport call, in milliseconds
    pub transport_timeout_ms: u64,
    /// Pause between failed pull attempts, in milliseconds
    pub pull_retry_delay_ms: u64,
    /// Epsilon policy after an agent restart
    pub resume_epsilon: EpsilonResume,
    /// Checkpoint artifacts to keep per job (0 keeps all)
    pub keep_checkpoints: usize,
    /// Address agents connect to
    pub server_addr: String,
    /// Address the trainer listens on
    pub listen_addr: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: Role::Agent,
            job_id: Uuid::nil(),
            experiment_name: "default".to_string(),
            agent_id: None,
            batch_update_frequency: 100,
            checkpoint_frequency: None,
            max_epoch_runtime_sec: 600,
            initial_epsilon: 1.0,
            per_iter_epsilon_reduction: 0.003,
            min_epsilon: 0.1,
            batch_size: 32,
            replay_memory_size: 10_000,
            weights_path: None,
            train_conv_layers: true,
            data_dir: PathBuf::from("./data"),
            sync_interval: 1,
            staleness_scaling: StalenessScaling::None,
            learning_rate: 1e-3,
            transport_timeout_ms: 5_000,
            pull_retry_delay_ms: 100,
            resume_epsilon: EpsilonResume::Initial,
            keep_checkpoints: 0,
            server_addr: "127.0.0.1:7070".to_string(),
            listen_addr: "0.0.0.0:7070".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check value ranges and role requirements
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job_id.is_nil() {
            return Err(ConfigError::Missing("job_id"));
        }
        if self.experiment_name.trim().is_empty() {
            return Err(ConfigError::Missing("experiment_name"));
        }
        if self.role == Role::Agent
            && self.agent_id.as_deref().map_or(true, |id| id.trim().is_empty())
        {
            return Err(ConfigError::Missing("agent_id"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        if self.replay_memory_size < self.batch_size {
            return Err(ConfigError::invalid(
                "replay_memory_size",
                format!(
                    "{} cannot hold a minibatch of {}",
                    self.replay_memory_size, self.batch_size
                ),
            ));
        }
        if self.checkpoint_frequency() == 0 {
            return Err(ConfigError::invalid(
                "batch_update_frequency",
                "checkpoint frequency must be at least 1",
            ));
        }
        if self.max_epoch_runtime_sec == 0 {
            return Err(ConfigError::invalid(
                "max_epoch_runtime_sec",
                "must be at least 1",
            ));
        }
        if self.sync_interval == 0 {
            return Err(ConfigError::invalid("sync_interval", "must be at least 1"));
        }
        for (field, value) in [
            ("initial_epsilon", self.initial_epsilon),
            ("min_epsilon", self.min_epsilon),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(field, format!("{value} is outside [0, 1]")));
            }
        }
        if self.min_epsilon > self.initial_epsilon {
            return Err(ConfigError::invalid(
                "min_epsilon",
                format!(
                    "{} exceeds initial_epsilon {}",
                    self.min_epsilon, self.initial_epsilon
                ),
            ));
        }
        if !(self.per_iter_epsilon_reduction >= 0.0) {
            return Err(ConfigError::invalid(
                "per_iter_epsilon_reduction",
                "must be a non-negative number",
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ConfigError::invalid("learning_rate", "must be positive"));
        }
        Ok(())
    }

    /// Applied updates between checkpoints
    #[must_use]
    pub fn checkpoint_frequency(&self) -> u64 {
        self.checkpoint_frequency
            .unwrap_or(self.batch_update_frequency)
    }

    /// `data_dir/checkpoint/<experiment_name>`
    #[must_use]
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir
            .join("checkpoint")
            .join(&self.experiment_name)
    }

    /// `data_dir/logs/<experiment_name>`
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs").join(&self.experiment_name)
    }

    /// Name of this node: `trainer`, or `agent-<id>`
    #[must_use]
    pub fn node_name(&self) -> String {
        match (self.role, &self.agent_id) {
            (Role::Agent, Some(id)) => format!("{}-{id}", Role::Agent),
            (role, _) => role.to_string(),
        }
    }

    /// Wall-clock limit of one episode
    #[must_use]
    pub fn max_epoch_runtime(&self) -> Duration {
        Duration::from_secs(self.max_epoch_runtime_sec)
    }

    /// Timeout of one transport call
    #[must_use]
    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }

    /// Pause between failed pulls
    #[must_use]
    pub fn pull_retry_delay(&self) -> Duration {
        Duration::from_millis(self.pull_retry_delay_ms)
    }

    /// Instructions handed to the compute function with every gradient
    /// request.
    ///
    /// Convolutional layers are frozen only when training starts from
    /// pretrained weights and `train_conv_layers` is off.
    #[must_use]
    pub fn gradient_options(&self) -> GradientOptions {
        let layer_training = if self.weights_path.is_some() && !self.train_conv_layers {
            LayerTraining::FreezeConvolutional
        } else {
            LayerTraining::All
        };
        GradientOptions { layer_training }
    }
}

/// Parse a launcher boolean such as `"True"`, `"false"`, `"1"` or `"no"`
pub fn parse_flag(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(
            "train_conv_layers",
            format!("{other:?} is not a boolean"),
        )),
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Text(text) => parse_flag(&text).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_config() -> NodeConfig {
        NodeConfig {
            job_id: Uuid::new_v4(),
            agent_id: Some("agent-0".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_agent_config_is_valid_once_identified() {
        assert!(agent_config().validate().is_ok());
        assert!(matches!(
            NodeConfig::default().validate(),
            Err(ConfigError::Missing("job_id"))
        ));
    }

    #[test]
    fn test_agent_requires_id() {
        let config = NodeConfig {
            agent_id: None,
            ..agent_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("agent_id"))
        ));

        let trainer = NodeConfig {
            role: Role::Trainer,
            agent_id: None,
            ..agent_config()
        };
        assert!(trainer.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_ranges() {
        let cases = [
            NodeConfig { batch_size: 0, ..agent_config() },
            NodeConfig { replay_memory_size: 8, batch_size: 16, ..agent_config() },
            NodeConfig { batch_update_frequency: 0, ..agent_config() },
            NodeConfig { min_epsilon: 0.5, initial_epsilon: 0.2, ..agent_config() },
            NodeConfig { initial_epsilon: 1.5, ..agent_config() },
            NodeConfig { per_iter_epsilon_reduction: -0.1, ..agent_config() },
            NodeConfig { max_epoch_runtime_sec: 0, ..agent_config() },
            NodeConfig { sync_interval: 0, ..agent_config() },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "accepted {config:?}");
        }
    }

    #[test]
    fn test_checkpoint_frequency_falls_back_to_batch_update_frequency() {
        let config = NodeConfig {
            batch_update_frequency: 50,
            ..agent_config()
        };
        assert_eq!(config.checkpoint_frequency(), 50);

        let config = NodeConfig {
            checkpoint_frequency: Some(7),
            ..config
        };
        assert_eq!(config.checkpoint_frequency(), 7);
    }

    #[test]
    fn test_storage_paths() {
        let config = NodeConfig {
            data_dir: PathBuf::from("/mnt/share"),
            experiment_name: "breakout".into(),
            ..agent_config()
        };
        assert_eq!(
            config.checkpoint_dir(),
            PathBuf::from("/mnt/share/checkpoint/breakout")
        );
        assert_eq!(config.log_dir(), PathBuf::from("/mnt/share/logs/breakout"));
    }

    #[test]
    fn test_node_name_carries_role() {
        let agent = NodeConfig {
            agent_id: Some("a7".into()),
            ..agent_config()
        };
        assert_eq!(agent.node_name(), "agent-a7");

        let trainer = NodeConfig {
            role: Role::Trainer,
            ..agent
        };
        assert_eq!(trainer.node_name(), "trainer");
    }

    #[test]
    fn test_flag_parsing() {
        for text in ["true", "True", "TRUE", "1", "yes"] {
            assert!(parse_flag(text).unwrap());
        }
        for text in ["false", "False", "0", "no"] {
            assert!(!parse_flag(text).unwrap());
        }
        assert!(parse_flag("maybe").is_err());
    }

    #[test]
    fn test_toml_accepts_string_flag() {
        let text = r#"
            role = "trainer"
            job_id = "67e55044-10b1-426f-9247-bb680e5fe0c8"
            experiment_name = "pong"
            batch_update_frequency = 25
            weights_path = "/models/pretrained.bin"
            train_conv_layers = "False"
            data_dir = "/data"
        "#;
        let config: NodeConfig = toml::from_str(text).unwrap();
        assert_eq!(config.role, Role::Trainer);
        assert!(!config.train_conv_layers);
        assert_eq!(config.batch_update_frequency, 25);
        // Unspecified values keep their defaults
        assert_eq!(config.batch_size, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            "role = \"agent\"\nagent_id = \"a-1\"\ntrain_conv_layers = true\n",
        )
        .unwrap();
        let config = NodeConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.agent_id.as_deref(), Some("a-1"));
        assert!(config.train_conv_layers);

        let missing = NodeConfig::from_toml_file(dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_gradient_options_freeze_only_pretrained() {
        let fresh = NodeConfig {
            train_conv_layers: false,
            ..agent_config()
        };
        assert_eq!(fresh.gradient_options().layer_training, LayerTraining::All);

        let pretrained = NodeConfig {
            weights_path: Some(PathBuf::from("/models/w.bin")),
            train_conv_layers: false,
            ..agent_config()
        };
        assert_eq!(
            pretrained.gradient_options().layer_training,
            LayerTraining::FreezeConvolutional
        );

        let fine_tune = NodeConfig {
            train_conv_layers: true,
            ..pretrained
        };
        assert_eq!(fine_tune.gradient_options().layer_training, LayerTraining::All);
    }
}
