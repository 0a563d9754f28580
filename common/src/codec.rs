use std::io::{Read, Write};

use anyhow::{anyhow, Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Upper bound on a single encoded message
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Write one length-prefixed message
pub fn send_message<W, T>(stream: &mut W, msg: &T) -> Result<()>
where
    W: Write,
    T: Serialize,
{
    let serialized = bincode::serialize(msg).context("Failed to serialize message")?;
    if serialized.len() > MAX_FRAME_LEN {
        return Err(anyhow!("Message too large: {} bytes", serialized.len()));
    }
    let len = serialized.len() as u32;

    stream
        .write_all(&len.to_le_bytes())
        .context("Failed to send message length")?;

    stream
        .write_all(&serialized)
        .context("Failed to send message data")?;

    stream.flush().context("Failed to flush stream")?;
    Ok(())
}

/// Read one length-prefixed message
pub fn recv_message<R, T>(stream: &mut R) -> Result<T>
where
    R: Read,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .context("Failed to read message length")?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_FRAME_LEN {
        return Err(anyhow!("Message too large: {} bytes", len));
    }

    let mut msg_buf = vec![0u8; len];
    stream
        .read_exact(&mut msg_buf)
        .context("Failed to read message data")?;

    let msg = bincode::deserialize(&msg_buf).context("Failed to deserialize message")?;
    Ok(msg)
}
