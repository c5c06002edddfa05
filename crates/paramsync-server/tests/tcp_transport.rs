use std::sync::Arc;
use std::time::Duration;

use paramsync_core::{blob, GradientUpdate, ParameterClient, TransportError};
use paramsync_server::{serve, FsCheckpointStore, ParameterServer, ServerOptions, Sgd, TcpClient};
use tokio::net::TcpListener;
use tokio::sync::watch;
use uuid::Uuid;

struct Running {
    server: ParameterServer,
    addr: std::net::SocketAddr,
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

async fn start(weights: &[f32]) -> Running {
    let dir = tempfile::tempdir().unwrap();
    let server = ParameterServer::start(
        Uuid::new_v4(),
        blob::encode_f32(weights),
        Arc::new(Sgd::new(1.0)),
        Arc::new(FsCheckpointStore::new(dir.path())),
        ServerOptions {
            checkpoint_frequency: 2,
            ..ServerOptions::default()
        },
    )
    .await
    .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(serve(listener, server.clone(), rx));

    Running {
        server,
        addr,
        shutdown,
        task,
        _dir: dir,
    }
}

fn update(agent: &str, base_version: u64, gradient: &[f32]) -> GradientUpdate {
    GradientUpdate {
        base_version,
        gradient: blob::encode_f32(gradient),
        agent_id: agent.into(),
        sample_count: 8,
    }
}

#[tokio::test]
async fn test_pull_push_over_tcp() {
    let running = start(&[1.0, 1.0]).await;
    let client = TcpClient::new(running.addr, Duration::from_secs(2));

    let snapshot = client.pull().await.unwrap();
    assert_eq!(snapshot.version, 0);

    let a = client.push(update("agent-a", 0, &[0.5, 0.0])).await.unwrap();
    let b = client.push(update("agent-b", 0, &[0.0, 0.5])).await.unwrap();
    assert_eq!((a.new_version, a.staleness), (1, 0));
    assert_eq!((b.new_version, b.staleness), (2, 1));

    let snapshot = client.pull().await.unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(blob::decode_f32(&snapshot.weights).unwrap(), vec![0.5, 0.5]);

    // Version 2 crossed the checkpoint threshold
    assert_eq!(running.server.counters().checkpoints_written, 1);

    running.shutdown.send(true).unwrap();
    running.task.await.unwrap();
}

#[tokio::test]
async fn test_rejected_push_over_tcp() {
    let running = start(&[1.0, 1.0]).await;
    let client = TcpClient::new(running.addr, Duration::from_secs(2));

    let err = client.push(update("agent-a", 0, &[1.0])).await.unwrap_err();
    assert!(err.is_rejection(), "unexpected error {err:?}");
    assert_eq!(client.pull().await.unwrap().version, 0);

    running.shutdown.send(true).unwrap();
    running.task.await.unwrap();
}

#[tokio::test]
async fn test_many_clients_share_one_server() {
    let running = start(&[0.0; 4]).await;

    let mut handles = Vec::new();
    for i in 0..4 {
        let addr = running.addr;
        handles.push(tokio::spawn(async move {
            let client = TcpClient::new(addr, Duration::from_secs(2));
            for _ in 0..10 {
                let base = client.pull().await.unwrap().version;
                client
                    .push(update(&format!("agent-{i}"), base, &[1.0; 4]))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(running.server.pull().version, 40);
    assert_eq!(running.server.agent_stats().len(), 4);

    running.shutdown.send(true).unwrap();
    running.task.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_server_is_a_connection_error() {
    // Bind then drop to get a port nobody listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let client = TcpClient::new(addr, Duration::from_millis(500));

    let err = client.pull().await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::Connection(_) | TransportError::Timeout { .. }
    ));
    assert!(!err.is_rejection());
}

#[tokio::test]
async fn test_client_reconnects_after_server_restart() {
    let running = start(&[0.0]).await;
    let client = TcpClient::new(running.addr, Duration::from_secs(2));
    assert_eq!(client.pull().await.unwrap().version, 0);

    running.shutdown.send(true).unwrap();
    running.task.await.unwrap();

    // Same server state behind a fresh listener on the same port
    let listener = TcpListener::bind(running.addr).await.unwrap();
    let (_shutdown, rx) = watch::channel(false);
    let server = running.server.clone();
    tokio::spawn(serve(listener, server, rx));

    // The cached connection is dead; the first call may fail, the next one reconnects
    if client.pull().await.is_err() {
        assert_eq!(client.pull().await.unwrap().version, 0);
    }
    client.push(update("agent-a", 0, &[1.0])).await.unwrap();
    assert_eq!(running.server.pull().version, 1);
}
