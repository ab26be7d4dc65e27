//! Transport launcher — spawn the server on stdio pipes or dial it over TCP.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStderr, Command};

/// Default host for [`ServerTarget::Tcp`].
pub const DEFAULT_TCP_HOST: &str = "127.0.0.1";
/// Default port for [`ServerTarget::Tcp`].
pub const DEFAULT_TCP_PORT: u16 = 9998;

/// The command line that starts a language server speaking LSP on stdio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
}

impl ServerCommand {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            current_dir: None,
        }
    }

    /// `crystal run -Dpreview_mt -Dexecution_context src/bin/cra.cr`
    #[must_use]
    pub fn crystal_default() -> Self {
        Self::new(
            "crystal",
            [
                "run",
                "-Dpreview_mt",
                "-Dexecution_context",
                "src/bin/cra.cr",
            ],
        )
    }

    /// Run the server from `dir` so relative source paths resolve against it.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Where the language server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerTarget {
    Stdio(ServerCommand),
    Tcp { host: String, port: u16 },
}

impl Default for ServerTarget {
    fn default() -> Self {
        Self::Stdio(ServerCommand::crystal_default())
    }
}

impl fmt::Display for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio(cmd) => write!(f, "stdio `{cmd}`"),
            Self::Tcp { host, port } => write!(f, "tcp {host}:{port}"),
        }
    }
}

pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// A spawned server process. Killed when dropped.
pub struct ServerProcess {
    child: Child,
    stderr: Option<ChildStderr>,
}

impl ServerProcess {
    /// The child's stderr pipe; `None` once taken.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Wait up to `grace` for the child to exit on its own, then kill it.
    pub async fn reap(mut self, grace: Duration) {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "language server exited"),
            Ok(Err(e)) => tracing::warn!("waiting for language server: {e}"),
            Err(_) => {
                tracing::debug!("language server didn't exit in time, killing");
                let _ = self.child.kill().await;
            }
        }
    }
}

/// A duplex byte channel to the server, plus the process when we spawned it.
pub struct Connection {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub process: Option<ServerProcess>,
}

/// Establish a connection to `target`. Nothing is retried.
pub async fn connect(target: &ServerTarget) -> Result<Connection> {
    match target {
        ServerTarget::Stdio(cmd) => spawn_stdio(cmd),
        ServerTarget::Tcp { host, port } => connect_tcp(host, *port).await,
    }
}

fn spawn_stdio(cmd: &ServerCommand) -> Result<Connection> {
    let resolved = which::which(&cmd.program)
        .with_context(|| format!("{} not found in PATH", cmd.program))?;

    let mut command = Command::new(&resolved);
    command
        .args(&cmd.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &cmd.current_dir {
        command.current_dir(dir);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning `{cmd}`"))?;
    tracing::info!(pid = ?child.id(), "spawned `{cmd}`");

    let stdin = child.stdin.take().context("no stdin from child")?;
    let stdout = child.stdout.take().context("no stdout from child")?;
    let stderr = child.stderr.take();

    Ok(Connection {
        reader: Box::new(stdout),
        writer: Box::new(stdin),
        process: Some(ServerProcess { child, stderr }),
    })
}

async fn connect_tcp(host: &str, port: u16) -> Result<Connection> {
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("connecting to {host}:{port}"))?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("set_nodelay failed: {e}");
    }
    tracing::info!("connected to {host}:{port}");

    let (read_half, write_half) = stream.into_split();
    Ok(Connection {
        reader: Box::new(read_half),
        writer: Box::new(write_half),
        process: None,
    })
}
