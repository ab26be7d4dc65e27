//! End-of-run cleanup: stop the server, then let the stderr relay catch up.
//!
//! Runs on every exit path, including a failed session, so diagnostics the
//! server printed while dying still reach the console.

use std::time::Duration;

use cra_lsp::ServerProcess;
use tokio::task::JoinHandle;

/// How long a server gets to exit after `exit` before it is killed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How long a server gets to exit on its own when the session ended without
/// a shutdown handshake.
pub const ABORT_GRACE: Duration = Duration::from_millis(200);

/// How long to keep relaying stderr after the server has gone.
pub const RELAY_DRAIN: Duration = Duration::from_millis(500);

/// Reap `process` and wait briefly for `relay` to hit EOF.
///
/// Returns the relayed line count, or `None` when there was no relay or it
/// did not finish within [`RELAY_DRAIN`].
pub async fn finish(
    process: Option<ServerProcess>,
    relay: Option<JoinHandle<usize>>,
    graceful: bool,
) -> Option<usize> {
    if let Some(process) = process {
        let grace = if graceful { SHUTDOWN_GRACE } else { ABORT_GRACE };
        process.reap(grace).await;
    }

    let relay = relay?;
    match tokio::time::timeout(RELAY_DRAIN, relay).await {
        Ok(Ok(lines)) => Some(lines),
        Ok(Err(e)) => {
            tracing::warn!("stderr relay task failed: {e}");
            None
        }
        Err(_) => {
            tracing::debug!("stderr relay still open after {RELAY_DRAIN:?}, leaving it");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cra_lsp::{ServerCommand, ServerTarget, connect, spawn_relay};
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn no_process_and_no_relay_is_a_no_op() {
        assert_eq!(finish(None, None, false).await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn every_stderr_line_of_a_crashing_server_is_relayed() {
        let script = "i=1; while [ $i -le 50 ]; do \
                      echo \"compile error line $i\" >&2; i=$((i+1)); \
                      done; exit 1";
        let target = ServerTarget::Stdio(ServerCommand::new("sh", ["-c", script]));
        let mut connection = connect(&target).await.unwrap();

        let mut process = connection.process.take();
        let stderr = process.as_mut().and_then(ServerProcess::take_stderr).unwrap();
        let (out_tx, mut out_rx) = tokio::io::duplex(64 * 1024);
        let relay = spawn_relay(stderr, out_tx, "[server stderr]");

        // The client sees the hang-up before the relay has caught up.
        let mut stdout = Vec::new();
        connection.reader.read_to_end(&mut stdout).await.unwrap();
        assert!(stdout.is_empty());

        assert_eq!(finish(process, Some(relay), false).await, Some(50));

        let mut text = String::new();
        out_rx.read_to_string(&mut text).await.unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 50);
        assert_eq!(lines[0], "[server stderr] compile error line 1");
        assert_eq!(lines[49], "[server stderr] compile error line 50");
    }
}
