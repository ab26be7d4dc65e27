//! Stderr relay — copies a server's diagnostic stream to the console.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

/// Prefix put in front of every relayed line.
pub const STDERR_PREFIX: &str = "[server stderr]";

/// Copy `reader` to `writer` line by line, prefixing each line.
///
/// Lines are decoded lossily so a stray non-UTF-8 byte never stops the
/// relay. Returns the number of lines written once `reader` hits EOF.
pub async fn relay_lines<R, W>(reader: R, mut writer: W, prefix: &str) -> Result<usize>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut count = 0;

    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .context("reading server stderr")?;
        if n == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let out = format!("{prefix} {}\n", line.trim_end());
        writer
            .write_all(out.as_bytes())
            .await
            .context("writing relayed line")?;
        writer.flush().await.context("flushing relayed line")?;
        count += 1;
    }

    Ok(count)
}

/// Spawn [`relay_lines`] as a background task.
///
/// The handle resolves to the number of lines relayed. A failed relay is
/// logged and resolves to zero.
pub fn spawn_relay<R, W>(reader: R, writer: W, prefix: &'static str) -> JoinHandle<usize>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        match relay_lines(reader, writer, prefix).await {
            Ok(lines) => {
                tracing::debug!(lines, "server stderr closed");
                lines
            }
            Err(e) => {
                tracing::warn!("stderr relay stopped: {e:#}");
                0
            }
        }
    })
}

/// Spawn a background task relaying `stderr` to this process's stdout.
pub fn spawn_stderr_relay<R>(stderr: R) -> JoinHandle<usize>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    spawn_relay(stderr, tokio::io::stdout(), STDERR_PREFIX)
}
