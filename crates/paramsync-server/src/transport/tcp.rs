use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};

use paramsync_core::{GradientUpdate, ModelSnapshot, ParameterClient, PushReceipt, TransportError};

use super::wire::{read_frame, write_frame, Request, Response};
use crate::server::ParameterServer;

/// Accept agent connections until `shutdown` turns true.
///
/// Every connection gets its own task and may carry any number of requests.
pub async fn serve(
    listener: TcpListener,
    server: ParameterServer,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, job_id = %server.job_id(), "parameter server listening");
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let server = server.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, server, shutdown).await {
                            tracing::warn!(%peer, error = %e, "connection closed with error");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "failed to accept connection"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("parameter server stopped accepting connections");
}

async fn handle_connection(
    mut stream: TcpStream,
    server: ParameterServer,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TransportError> {
    let _ = stream.set_nodelay(true);

    loop {
        let request = tokio::select! {
            request = read_frame::<_, Request>(&mut stream) => request?,
            _ = shutdown.changed() => return Ok(()),
        };
        let Some(request) = request else {
            return Ok(());
        };

        let response = match request {
            Request::Pull => Response::Snapshot(server.pull().as_ref().clone()),
            Request::Push(update) => match server.push(update).await {
                Ok(receipt) => Response::Pushed(receipt),
                Err(e) => Response::Rejected(e.to_string()),
            },
        };
        write_frame(&mut stream, &response).await?;
    }
}

/// Client for a remote parameter server.
///
/// Holds one connection, dropped after any error and reopened on the next
/// call.
#[derive(Debug)]
pub struct TcpClient {
    addr: SocketAddr,
    timeout: Duration,
    conn: Mutex<Option<TcpStream>>,
}

impl TcpClient {
    /// Client for the server at `addr`; connects lazily
    #[must_use]
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            addr,
            timeout,
            conn: Mutex::new(None),
        }
    }

    async fn call(&self, operation: &'static str, request: Request) -> Result<Response, TransportError> {
        let mut conn = self.conn.lock().await;

        let result = tokio::time::timeout(self.timeout, async {
            if conn.is_none() {
                let stream = TcpStream::connect(self.addr)
                    .await
                    .map_err(|e| TransportError::Connection(e.to_string()))?;
                let _ = stream.set_nodelay(true);
                *conn = Some(stream);
            }
            let stream = conn
                .as_mut()
                .ok_or_else(|| TransportError::Connection("not connected".into()))?;

            write_frame(stream, &request).await?;
            read_frame::<_, Response>(stream)
                .await?
                .ok_or_else(|| TransportError::Connection("server closed the connection".into()))
        })
        .await;

        let result = result.unwrap_or_else(|_| {
            Err(TransportError::Timeout {
                operation,
                millis: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })
        });
        if result.is_err() {
            *conn = None;
            metrics::counter!("paramsync_transport_failures_total", 1, "operation" => operation);
        }
        result
    }
}

#[async_trait]
impl ParameterClient for TcpClient {
    async fn pull(&self) -> Result<Arc<ModelSnapshot>, TransportError> {
        match self.call("pull", Request::Pull).await? {
            Response::Snapshot(snapshot) => Ok(Arc::new(snapshot)),
            Response::Rejected(reason) => Err(TransportError::Rejected(reason)),
            other => Err(TransportError::Protocol(format!("unexpected reply to pull: {other:?}"))),
        }
    }

    async fn push(&self, update: GradientUpdate) -> Result<PushReceipt, TransportError> {
        match self.call("push", Request::Push(update)).await? {
            Response::Pushed(receipt) => Ok(receipt),
            Response::Rejected(reason) => Err(TransportError::Rejected(reason)),
            Response::Snapshot(_) => {
                Err(TransportError::Protocol("unexpected snapshot reply to push".into()))
            }
        }
    }
}
