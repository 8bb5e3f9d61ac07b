use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::Error;

/// Upper bound on a single frame, newline included.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Serialize `frame` as one JSON line and flush it.
///
/// # Errors
/// Returns error if serialization or the write fails.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(frame)?;
    if line.len() >= MAX_FRAME_BYTES {
        return Err(Error::FrameTooLarge {
            len: line.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next frame. Blank lines are skipped.
///
/// Returns `Ok(None)` once the peer closes the stream.
///
/// # Errors
/// Returns error on I/O failure, oversized frames, or malformed JSON.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, Error>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let limit = u64::try_from(MAX_FRAME_BYTES).unwrap_or(u64::MAX);
        let read = (&mut *reader).take(limit).read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        if !line.ends_with('\n') && line.len() >= MAX_FRAME_BYTES {
            return Err(Error::FrameTooLarge {
                len: line.len(),
                max: MAX_FRAME_BYTES,
            });
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return Ok(Some(serde_json::from_str(trimmed)?));
    }
}
