use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use paramsync_agent::{AgentWorker, EpsilonSchedule, WorkerConfig};
use paramsync_core::{ComputeBackend, GradientOptions, Job};
use paramsync_env::{cartpole_backend, CartPoleEnv, LinearQBackend};
use paramsync_server::{FsCheckpointStore, LocalClient, ParameterServer, ServerOptions, Sgd};
use tokio::sync::watch;
use uuid::Uuid;

fn worker_config(agent_id: &str, iterations: u64) -> WorkerConfig {
    WorkerConfig {
        agent_id: agent_id.to_string(),
        batch_size: 16,
        replay_memory_size: 256,
        sync_interval: 1,
        max_epoch_runtime: Duration::from_secs(30),
        pull_retry_delay: Duration::from_millis(10),
        gradient_options: GradientOptions::default(),
        schedule: EpsilonSchedule::new(1.0, 0.05, 0.1),
        max_iterations: Some(iterations),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_agents_train_one_model() {
    let dir = tempfile::tempdir().unwrap();
    let job = Job::new(3);
    job.validate().unwrap();

    let backend = Arc::new(cartpole_backend().with_seed(1));
    let store = Arc::new(FsCheckpointStore::new(dir.path()));
    let server = ParameterServer::start(
        job.job_id,
        backend.initial_weights(),
        Arc::new(Sgd::new(0.01)),
        store.clone(),
        ServerOptions {
            checkpoint_frequency: 5,
            ..ServerOptions::default()
        },
    )
    .await
    .unwrap();

    let (_shutdown, rx) = watch::channel(false);
    let mut handles = Vec::new();
    for (i, agent_id) in job.agent_ids().enumerate() {
        let client = LocalClient::new(server.clone(), Duration::from_secs(5));
        let worker = AgentWorker::new(
            worker_config(agent_id, 10),
            CartPoleEnv::new().with_seed(i as u64),
            Arc::clone(&backend),
            client,
        )
        .with_seed(100 + i as u64);
        handles.push(tokio::spawn(worker.run(rx.clone())));
    }

    let mut pushes = 0;
    for handle in handles {
        let report = handle.await.unwrap();
        assert_eq!(report.iterations, 10);
        assert_eq!(report.pushes_unknown + report.pushes_rejected, 0);
        pushes += report.pushes_applied;
    }

    // Every applied push produced exactly one version
    let counters = server.counters();
    assert_eq!(counters.update_count, pushes);
    assert_eq!(counters.current_version, pushes);
    assert_eq!(counters.checkpoints_written, pushes / 5);

    let stats = server.agent_stats();
    assert_eq!(stats.iter().map(|s| s.pushes).sum::<u64>(), pushes);

    if pushes >= 5 {
        let latest = store.list(job.job_id).await.unwrap();
        assert_eq!(latest.last().map(|c| c.version), Some(pushes - pushes % 5));
    }
}

async fn start_server(
    job_id: Uuid,
    backend: &LinearQBackend,
    dir: &Path,
    options: ServerOptions,
) -> ParameterServer {
    ParameterServer::start(
        job_id,
        backend.initial_weights(),
        Arc::new(Sgd::new(0.01)),
        Arc::new(FsCheckpointStore::new(dir)),
        options,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_agent_resumes_against_restarted_server() {
    let dir = tempfile::tempdir().unwrap();
    let job = Job::new(1);
    let backend = Arc::new(cartpole_backend());
    let options = ServerOptions {
        checkpoint_frequency: 1,
        ..ServerOptions::default()
    };

    let first = start_server(job.job_id, &backend, dir.path(), options).await;
    let (_shutdown, rx) = watch::channel(false);
    let report = AgentWorker::new(
        worker_config("agent-0", 6),
        CartPoleEnv::new().with_seed(5),
        Arc::clone(&backend),
        LocalClient::new(first.clone(), Duration::from_secs(5)),
    )
    .with_seed(5)
    .run(rx.clone())
    .await;
    let reached = first.pull().version;
    assert_eq!(reached, report.pushes_applied);
    drop(first);

    let restarted = start_server(job.job_id, &backend, dir.path(), options).await;
    assert_eq!(restarted.pull().version, reached);

    let report = AgentWorker::new(
        worker_config("agent-0", 3),
        CartPoleEnv::new().with_seed(6),
        Arc::clone(&backend),
        LocalClient::new(restarted.clone(), Duration::from_secs(5)),
    )
    .run(rx)
    .await;
    assert_eq!(report.last_synced_version.map(|v| v >= reached), Some(true));
    assert_eq!(restarted.pull().version, reached + report.pushes_applied);
}
