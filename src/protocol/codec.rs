//! Length-prefixed bincode frames.

use crate::registry::types::wait_closed;

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

/// Frames above this size are treated as a protocol violation.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Largest request payload that still fits in one `Request` frame alongside its
/// enum tag, correlation id and length prefix.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - 64;

pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = bincode::serialize(msg)?;
    if encoded.len() > MAX_FRAME_LEN {
        return Err(anyhow::anyhow!(
            "Frame of {} bytes exceeds limit of {}",
            encoded.len(),
            MAX_FRAME_LEN
        ));
    }

    writer.write_u32(encoded.len() as u32).await?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;

    Ok(())
}

/// Reads one frame. Returns `Ok(None)` when the peer closed the connection
/// cleanly between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_LEN {
        return Err(anyhow::anyhow!(
            "Peer announced frame of {} bytes, limit is {}",
            len,
            MAX_FRAME_LEN
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    Ok(Some(bincode::deserialize(&buf)?))
}

/// Writes every message from `rx` to `writer` until the channel ends or `closed`
/// flips to true. Fails on the first write error.
pub async fn pump_frames<W, T>(
    writer: &mut W,
    rx: &mut mpsc::Receiver<T>,
    closed: &mut watch::Receiver<bool>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => write_frame(writer, &msg).await?,
                None => return Ok(()),
            },
            _ = wait_closed(closed) => return Ok(()),
        }
    }
}
