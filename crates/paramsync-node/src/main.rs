// paramsync node
// Runs a parameter server, an agent worker, or a whole job in one process

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use paramsync_core::config::parse_flag;
use paramsync_core::{NodeConfig, Role, StalenessScaling};

mod commands;

#[derive(Parser)]
#[command(name = "paramsync-node")]
#[command(about = "Asynchronous parameter-server reinforcement learning node", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the canonical model to agents over TCP
    Trainer {
        #[command(flatten)]
        common: CommonArgs,

        /// Persist the current model once more on shutdown
        #[arg(long)]
        checkpoint_on_exit: bool,
    },

    /// Run one agent worker against a remote trainer
    Agent {
        #[command(flatten)]
        common: CommonArgs,

        /// Stop after this many iterations
        #[arg(long)]
        iterations: Option<u64>,
    },

    /// Run a trainer and N agents in this process
    Local {
        #[command(flatten)]
        common: CommonArgs,

        /// Number of agents
        #[arg(long, default_value = "2")]
        agents: usize,

        /// Iterations per agent; runs until Ctrl-C when omitted
        #[arg(long)]
        iterations: Option<u64>,
    },

    /// List the checkpoints of a job
    Checkpoints {
        #[command(flatten)]
        common: CommonArgs,
    },
}

/// Launcher values; each overrides the same key of the config file
#[derive(Args, Debug, Clone, Default)]
struct CommonArgs {
    /// TOML configuration file
    #[arg(short, long, env = "PARAMSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Job identifier
    #[arg(long, env = "PARAMSYNC_JOB_ID")]
    job_id: Option<Uuid>,

    /// Experiment name
    #[arg(long, env = "PARAMSYNC_EXPERIMENT_NAME")]
    experiment_name: Option<String>,

    /// Agent identifier
    #[arg(long, env = "PARAMSYNC_AGENT_ID")]
    agent_id: Option<String>,

    /// Root of checkpoints and logs
    #[arg(long, env = "PARAMSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Applied updates between checkpoints
    #[arg(long, env = "PARAMSYNC_BATCH_UPDATE_FREQUENCY")]
    batch_update_frequency: Option<u64>,

    /// Episode wall-clock limit in seconds
    #[arg(long, env = "PARAMSYNC_MAX_EPOCH_RUNTIME_SEC")]
    max_epoch_runtime_sec: Option<u64>,

    /// Epsilon decrement per iteration
    #[arg(long, env = "PARAMSYNC_PER_ITER_EPSILON_REDUCTION")]
    per_iter_epsilon_reduction: Option<f64>,

    /// Epsilon floor
    #[arg(long, env = "PARAMSYNC_MIN_EPSILON")]
    min_epsilon: Option<f64>,

    /// Minibatch size
    #[arg(long, env = "PARAMSYNC_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Replay memory capacity
    #[arg(long, env = "PARAMSYNC_REPLAY_MEMORY_SIZE")]
    replay_memory_size: Option<usize>,

    /// Pretrained starting weights
    #[arg(long, env = "PARAMSYNC_WEIGHTS_PATH")]
    weights_path: Option<PathBuf>,

    /// Keep training convolutional layers (true/false)
    #[arg(long, env = "PARAMSYNC_TRAIN_CONV_LAYERS")]
    train_conv_layers: Option<String>,

    /// Stale gradient treatment (none, inverse)
    #[arg(long, env = "PARAMSYNC_STALENESS_SCALING")]
    staleness_scaling: Option<String>,

    /// Gradient step size on the trainer
    #[arg(long, env = "PARAMSYNC_LEARNING_RATE")]
    learning_rate: Option<f32>,

    /// Trainer address for agents
    #[arg(long, env = "PARAMSYNC_SERVER_ADDR")]
    server_addr: Option<String>,

    /// Listen address of the trainer
    #[arg(long, env = "PARAMSYNC_LISTEN_ADDR")]
    listen_addr: Option<String>,
}

impl CommonArgs {
    /// Merge file values, flags and the subcommand's role, then validate
    fn resolve(&self, role: Role) -> Result<NodeConfig> {
        let config = self.merge(role)?;
        config
            .validate()
            .with_context(|| format!("invalid {role} configuration"))?;
        Ok(config)
    }

    /// Like [`CommonArgs::resolve`], minting a job id when none is given
    fn resolve_local(&self) -> Result<NodeConfig> {
        let mut config = self.merge(Role::Trainer)?;
        if config.job_id.is_nil() {
            config.job_id = Uuid::new_v4();
        }
        config
            .validate()
            .context("invalid local configuration")?;
        Ok(config)
    }

    fn merge(&self, role: Role) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_toml_file(path)?,
            None => NodeConfig::default(),
        };
        config.role = role;

        if let Some(job_id) = self.job_id {
            config.job_id = job_id;
        }
        if let Some(name) = &self.experiment_name {
            config.experiment_name.clone_from(name);
        }
        if let Some(agent_id) = &self.agent_id {
            config.agent_id = Some(agent_id.clone());
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir.clone_from(dir);
        }
        if let Some(value) = self.batch_update_frequency {
            config.batch_update_frequency = value;
        }
        if let Some(value) = self.max_epoch_runtime_sec {
            config.max_epoch_runtime_sec = value;
        }
        if let Some(value) = self.per_iter_epsilon_reduction {
            config.per_iter_epsilon_reduction = value;
        }
        if let Some(value) = self.min_epsilon {
            config.min_epsilon = value;
        }
        if let Some(value) = self.batch_size {
            config.batch_size = value;
        }
        if let Some(value) = self.replay_memory_size {
            config.replay_memory_size = value;
        }
        if let Some(path) = &self.weights_path {
            config.weights_path = Some(path.clone());
        }
        if let Some(flag) = &self.train_conv_layers {
            config.train_conv_layers = parse_flag(flag)?;
        }
        if let Some(policy) = &self.staleness_scaling {
            config.staleness_scaling = match policy.trim().to_ascii_lowercase().as_str() {
                "none" => StalenessScaling::None,
                "inverse" => StalenessScaling::Inverse,
                other => anyhow::bail!("unknown staleness scaling {other:?}"),
            };
        }
        if let Some(value) = self.learning_rate {
            config.learning_rate = value;
        }
        if let Some(addr) = &self.server_addr {
            config.server_addr.clone_from(addr);
        }
        if let Some(addr) = &self.listen_addr {
            config.listen_addr.clone_from(addr);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Trainer {
            common,
            checkpoint_on_exit,
        } => commands::run_trainer(common.resolve(Role::Trainer)?, checkpoint_on_exit).await,
        Commands::Agent { common, iterations } => {
            commands::run_agent(common.resolve(Role::Agent)?, iterations).await
        }
        Commands::Local {
            common,
            agents,
            iterations,
        } => commands::run_local(common.resolve_local()?, agents, iterations).await,
        Commands::Checkpoints { common } => {
            commands::list_checkpoints(common.resolve(Role::Trainer)?).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_agent_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        let job_id = Uuid::new_v4();
        std::fs::write(
            &path,
            format!(
                "job_id = \"{job_id}\"\nexperiment_name = \"from-file\"\nbatch_size = 8\ntrain_conv_layers = \"True\"\n"
            ),
        )
        .unwrap();

        let cli = parse(&[
            "paramsync-node",
            "agent",
            "--config",
            path.to_str().unwrap(),
            "--agent-id",
            "agent-2",
            "--batch-size",
            "4",
            "--train-conv-layers",
            "false",
        ]);
        let Commands::Agent { common, .. } = cli.command else {
            panic!("expected agent subcommand");
        };

        let config = common.resolve(Role::Agent).unwrap();
        assert_eq!(config.role, Role::Agent);
        assert_eq!(config.job_id, job_id);
        assert_eq!(config.experiment_name, "from-file");
        assert_eq!(config.agent_id.as_deref(), Some("agent-2"));
        assert_eq!(config.batch_size, 4);
        assert!(!config.train_conv_layers);
    }

    #[test]
    fn test_agent_without_id_is_rejected() {
        let common = CommonArgs {
            job_id: Some(Uuid::new_v4()),
            ..CommonArgs::default()
        };
        assert!(common.resolve(Role::Agent).is_err());
        assert!(common.resolve(Role::Trainer).is_ok());
    }

    #[test]
    fn test_staleness_scaling_flag() {
        let common = CommonArgs {
            job_id: Some(Uuid::new_v4()),
            staleness_scaling: Some("Inverse".into()),
            ..CommonArgs::default()
        };
        let config = common.resolve(Role::Trainer).unwrap();
        assert_eq!(config.staleness_scaling, StalenessScaling::Inverse);

        let bad = CommonArgs {
            staleness_scaling: Some("sometimes".into()),
            ..common
        };
        assert!(bad.resolve(Role::Trainer).is_err());
    }

    #[test]
    fn test_local_subcommand() {
        let cli = parse(&["paramsync-node", "local", "--agents", "4", "--iterations", "10"]);
        let Commands::Local {
            common,
            agents,
            iterations,
        } = cli.command
        else {
            panic!("expected local subcommand");
        };
        assert_eq!((agents, iterations), (4, Some(10)));

        let config = common.resolve_local().unwrap();
        assert!(!config.job_id.is_nil());
    }
}
