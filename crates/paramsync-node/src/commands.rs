// Subcommand implementations for paramsync-node

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;

use paramsync_agent::{AgentWorker, WorkerConfig, WorkerReport};
use paramsync_core::{blob, logging, ComputeBackend, Job, NodeConfig};
use paramsync_env::{cartpole_backend, CartPoleEnv, LinearQBackend};
use paramsync_server::{
    serve, CheckpointStore, FsCheckpointStore, LocalClient, ParameterServer, ServerOptions, Sgd,
    TcpClient,
};

pub async fn run_trainer(config: NodeConfig, checkpoint_on_exit: bool) -> Result<()> {
    let log_file = logging::init(&config.log_dir(), &config.node_name())?;
    tracing::info!(job_id = %config.job_id, log = ?log_file, "starting trainer");

    let server = start_server(&config, &cartpole_backend()).await?;

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen_addr))?;
    let (shutdown, rx) = watch::channel(false);
    let serving = tokio::spawn(serve(listener, server.clone(), rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for Ctrl-C")?;
    tracing::info!("shutting down trainer");
    let _ = shutdown.send(true);
    serving.await.context("server task panicked")?;

    if checkpoint_on_exit {
        let path = server.checkpoint_now().await?;
        tracing::info!(path = ?path, "final checkpoint written");
    }

    println!("{}", serde_json::to_string_pretty(&server.counters())?);
    Ok(())
}

pub async fn run_agent(config: NodeConfig, iterations: Option<u64>) -> Result<()> {
    let log_file = logging::init(&config.log_dir(), &config.node_name())?;
    tracing::info!(job_id = %config.job_id, server = %config.server_addr, log = ?log_file, "starting agent");

    let addr = resolve_addr(&config.server_addr).await?;
    let client = TcpClient::new(addr, config.transport_timeout());

    let worker_config = WorkerConfig {
        max_iterations: iterations,
        ..WorkerConfig::from_node_config(&config)?
    };
    let worker = AgentWorker::new(
        worker_config,
        CartPoleEnv::new(),
        Arc::new(cartpole_backend()),
        client,
    );

    let (shutdown, rx) = watch::channel(false);
    let running = tokio::spawn(worker.run(rx));
    let stopper = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stopping agent after the current iteration");
            let _ = shutdown.send(true);
        }
    });

    let report = running.await.context("agent task panicked")?;
    stopper.abort();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn run_local(config: NodeConfig, agents: usize, iterations: Option<u64>) -> Result<()> {
    let log_file = logging::init(&config.log_dir(), "local")?;
    let job = Job::with_id(config.job_id, agents);
    job.validate()?;
    tracing::info!(job_id = %job.job_id, agents, log = ?log_file, "starting local job");

    let backend = Arc::new(cartpole_backend());
    let server = start_server(&config, &backend).await?;

    let (shutdown, rx) = watch::channel(false);
    let mut handles = Vec::with_capacity(agents);
    for agent_id in job.agent_ids() {
        let agent_config = NodeConfig {
            role: paramsync_core::Role::Agent,
            agent_id: Some(agent_id.to_string()),
            ..config.clone()
        };
        let worker_config = WorkerConfig {
            max_iterations: iterations,
            ..WorkerConfig::from_node_config(&agent_config)?
        };
        let client = LocalClient::new(server.clone(), config.transport_timeout());
        let worker = AgentWorker::new(worker_config, CartPoleEnv::new(), Arc::clone(&backend), client);
        handles.push(tokio::spawn(worker.run(rx.clone())));
    }

    let stopper = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stopping agents after their current iteration");
            let _ = shutdown.send(true);
        }
    });

    let mut reports: Vec<WorkerReport> = Vec::with_capacity(handles.len());
    for handle in handles {
        reports.push(handle.await.context("agent task panicked")?);
    }
    stopper.abort();

    let summary = json!({
        "job_id": job.job_id,
        "counters": server.counters(),
        "agents": server.agent_stats(),
        "workers": reports,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

pub async fn list_checkpoints(config: NodeConfig) -> Result<()> {
    let store = FsCheckpointStore::new(config.checkpoint_dir());
    let checkpoints = store.list(config.job_id).await?;
    if checkpoints.is_empty() {
        println!("No checkpoints found in {}", store.location(config.job_id).display());
        return Ok(());
    }

    let latest = store.load_latest(config.job_id).await?.map(|s| s.version);
    for checkpoint in checkpoints {
        let marker = if Some(checkpoint.version) == latest { " (latest)" } else { "" };
        println!("v{}{}  {}", checkpoint.version, marker, checkpoint.path.display());
    }
    Ok(())
}

async fn start_server(config: &NodeConfig, backend: &LinearQBackend) -> Result<ParameterServer> {
    let initial = initial_weights(config, backend).await?;
    let store = Arc::new(FsCheckpointStore::new(config.checkpoint_dir()));

    let server = ParameterServer::start(
        config.job_id,
        initial,
        Arc::new(Sgd::new(config.learning_rate)),
        store,
        ServerOptions::from(config),
    )
    .await
    .context("failed to load checkpoint")?;
    Ok(server)
}

/// Pretrained weights from `weights_path`, else fresh ones from the backend
async fn initial_weights(config: &NodeConfig, backend: &LinearQBackend) -> Result<Vec<u8>> {
    let Some(path) = &config.weights_path else {
        return Ok(backend.initial_weights());
    };

    let weights = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read weights from {}", path.display()))?;
    let params = blob::decode_f32(&weights)
        .with_context(|| format!("{} is not an f32 weight blob", path.display()))?;
    anyhow::ensure!(
        params.len() == backend.param_count(),
        "{} holds {} parameters, the model needs {}",
        path.display(),
        params.len(),
        backend.param_count()
    );
    tracing::info!(path = %path.display(), "loaded pretrained weights");
    Ok(weights)
}

async fn resolve_addr(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("failed to resolve {addr}"))?
        .next()
        .with_context(|| format!("{addr} resolved to no address"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pretrained_weights_must_fit_model() {
        let dir = tempfile::tempdir().unwrap();
        let backend = cartpole_backend();

        let good = dir.path().join("good.bin");
        tokio::fs::write(&good, blob::encode_f32(&vec![0.5; backend.param_count()]))
            .await
            .unwrap();
        let config = NodeConfig {
            weights_path: Some(good),
            ..NodeConfig::default()
        };
        let weights = initial_weights(&config, &backend).await.unwrap();
        assert_eq!(blob::param_count(&weights), backend.param_count());

        let bad = dir.path().join("bad.bin");
        tokio::fs::write(&bad, blob::encode_f32(&[0.5; 3])).await.unwrap();
        let config = NodeConfig {
            weights_path: Some(bad),
            ..NodeConfig::default()
        };
        assert!(initial_weights(&config, &backend).await.is_err());
    }

    #[tokio::test]
    async fn test_fresh_weights_without_path() {
        let backend = cartpole_backend();
        let weights = initial_weights(&NodeConfig::default(), &backend).await.unwrap();
        assert_eq!(weights, backend.initial_weights());
    }
}
