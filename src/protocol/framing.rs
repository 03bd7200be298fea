//! Newline framing for the text protocol.
//!
//! One message per line, terminated by `\n` (a preceding `\r` is dropped).
//! A final line without a terminator still counts as a line. Each write is
//! flushed before returning so request/response turns never overlap.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum accepted line length (1MB) so a runaway peer cannot exhaust memory.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One read from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A line with its terminator removed.
    Line(String),
    /// A line longer than [`MAX_LINE_BYTES`], already skipped.
    Oversized,
    /// End of stream.
    Closed,
}

/// Read the next line from the stream.
///
/// Invalid UTF-8 is replaced lossily; such a line can never match the
/// grammar, so it ends up rejected like any other malformed command.
///
/// # Errors
///
/// Returns an error only when the underlying read fails.
pub async fn read_line<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    // Room for a full-length line plus `\r\n`.
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES as u64 + 2)
        .read_until(b'\n', &mut buf)
        .await
        .context("Failed to read line")?;

    if read == 0 {
        return Ok(Frame::Closed);
    }

    let terminated = buf.last() == Some(&b'\n');
    if terminated {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }

    if buf.len() > MAX_LINE_BYTES {
        if !terminated {
            skip_rest_of_line(reader).await?;
        }
        return Ok(Frame::Oversized);
    }

    Ok(Frame::Line(String::from_utf8_lossy(&buf).into_owned()))
}

/// Discard input up to and including the next `\n`, in bounded chunks.
async fn skip_rest_of_line<R>(reader: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut scratch = Vec::new();
    loop {
        scratch.clear();
        let read = (&mut *reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut scratch)
            .await
            .context("Failed to skip oversized line")?;
        if read == 0 || scratch.last() == Some(&b'\n') {
            return Ok(());
        }
    }
}

/// Write one line and flush it.
///
/// # Errors
///
/// Returns an error if the write or flush fails.
pub async fn write_line<W>(writer: &mut W, line: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut framed = String::with_capacity(line.len() + 1);
    framed.push_str(line);
    framed.push('\n');

    writer
        .write_all(framed.as_bytes())
        .await
        .context("Failed to write line")?;

    writer.flush().await.context("Failed to flush line")?;

    Ok(())
}
