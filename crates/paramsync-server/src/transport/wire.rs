//! Wire format: a big-endian `u32` length followed by a bincode body

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use paramsync_core::{GradientUpdate, ModelSnapshot, PushReceipt, TransportError};

/// Largest accepted frame body
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Agent to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Fetch the current snapshot
    Pull,
    /// Submit a gradient
    Push(GradientUpdate),
}

/// Server to agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Current snapshot
    Snapshot(ModelSnapshot),
    /// Gradient applied
    Pushed(PushReceipt),
    /// Request refused; nothing was applied
    Rejected(String),
}

/// Write one frame holding `message`
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(message).map_err(|e| TransportError::Protocol(e.to_string()))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(TransportError::Protocol(format!(
            "frame of {} bytes exceeds limit",
            body.len()
        )));
    }
    let len = u32::try_from(body.len())
        .map_err(|_| TransportError::Protocol("frame length overflow".into()))?;

    writer.write_all(&len.to_be_bytes()).await.map_err(io_error)?;
    writer.write_all(&body).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)
}

/// Read one frame. `Ok(None)` means the peer closed the stream between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(io_error(e)),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::Protocol(format!(
            "frame of {len} bytes exceeds limit"
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(io_error)?;
    bincode::deserialize(&body)
        .map(Some)
        .map_err(|e| TransportError::Protocol(e.to_string()))
}

fn io_error(e: std::io::Error) -> TransportError {
    TransportError::Connection(e.to_string())
}
