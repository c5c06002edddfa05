use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use paramsync_core::{GradientUpdate, ModelSnapshot, ParameterClient, PushReceipt, TransportError};

use crate::server::ParameterServer;

/// Client calling a [`ParameterServer`] in the same process
#[derive(Debug, Clone)]
pub struct LocalClient {
    server: ParameterServer,
    timeout: Duration,
}

impl LocalClient {
    /// Client with a per-call timeout
    #[must_use]
    pub fn new(server: ParameterServer, timeout: Duration) -> Self {
        Self { server, timeout }
    }
}

#[async_trait]
impl ParameterClient for LocalClient {
    async fn pull(&self) -> Result<Arc<ModelSnapshot>, TransportError> {
        Ok(self.server.pull())
    }

    async fn push(&self, update: GradientUpdate) -> Result<PushReceipt, TransportError> {
        // The push runs in its own task so a timeout never cancels it mid-way
        let server = self.server.clone();
        let task = tokio::spawn(async move { server.push(update).await });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(receipt))) => Ok(receipt),
            Ok(Ok(Err(e))) => Err(TransportError::Rejected(e.to_string())),
            Ok(Err(e)) => Err(TransportError::Connection(e.to_string())),
            Err(_) => Err(TransportError::Timeout {
                operation: "push",
                millis: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::Sgd;
    use crate::checkpoint::FsCheckpointStore;
    use crate::server::ServerOptions;
    use paramsync_core::blob;
    use uuid::Uuid;

    async fn client(dir: &std::path::Path) -> LocalClient {
        let server = ParameterServer::start(
            Uuid::new_v4(),
            blob::encode_f32(&[1.0, 1.0]),
            Arc::new(Sgd::new(1.0)),
            Arc::new(FsCheckpointStore::new(dir)),
            ServerOptions::default(),
        )
        .await
        .unwrap();
        LocalClient::new(server, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_pull_and_push() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path()).await;

        let snapshot = client.pull().await.unwrap();
        let receipt = client
            .push(GradientUpdate {
                base_version: snapshot.version,
                gradient: blob::encode_f32(&[1.0, 0.0]),
                agent_id: "agent-0".into(),
                sample_count: 2,
            })
            .await
            .unwrap();
        assert_eq!(receipt.new_version, 1);
        assert_eq!(client.pull().await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_bad_gradient_is_a_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path()).await;

        let err = client
            .push(GradientUpdate {
                base_version: 0,
                gradient: vec![0; 3],
                agent_id: "agent-0".into(),
                sample_count: 1,
            })
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(client.pull().await.unwrap().version, 0);
    }
}
