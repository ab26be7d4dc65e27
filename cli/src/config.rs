//! TOML config file and the merge of file values with command-line flags.
//!
//! Precedence for every setting is flag, then file, then built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use cra_lsp::lsp_types::Position;
use cra_lsp::transport::{DEFAULT_TCP_HOST, DEFAULT_TCP_PORT};
use cra_lsp::{ServerCommand, ServerTarget};
use serde::Deserialize;

use crate::args::{Cli, TransportCommand};

/// Looked up in the current directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "cra-probe.toml";

pub const DEFAULT_DOCUMENT: &str = "src/cra/types.cr";

pub const DEFAULT_PROBES: usize = 2;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub transport: Option<TransportKind>,
    pub server: Option<ServerSection>,
    pub tcp: Option<TcpSection>,
    pub workspace: Option<WorkspaceSection>,
    pub probe: Option<ProbeSection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Tcp,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpSection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceSection {
    pub root: Option<PathBuf>,
    pub document: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeSection {
    pub count: Option<usize>,
    pub line: Option<u32>,
    pub character: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub shutdown: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Load `explicit` if given, else [`DEFAULT_CONFIG_FILE`] under `cwd` if it exists.
    pub fn discover(explicit: Option<&Path>, cwd: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let fallback = cwd.join(DEFAULT_CONFIG_FILE);
        if fallback.is_file() {
            tracing::debug!(path = %fallback.display(), "using config from working directory");
            return Self::load(&fallback);
        }
        Ok(Self::default())
    }
}

/// Fully resolved run settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub target: ServerTarget,
    pub root: PathBuf,
    pub document: PathBuf,
    pub position: Position,
    pub probes: usize,
    pub timeout: Option<Duration>,
    pub shutdown: bool,
}

impl Settings {
    pub fn resolve(cli: &Cli, file: FileConfig, cwd: &Path) -> Result<Self> {
        let workspace = file.workspace.unwrap_or_default();
        let probe = file.probe.unwrap_or_default();

        let root = match cli.root.clone().or(workspace.root) {
            Some(root) => absolutize(root, cwd),
            None => cwd.to_path_buf(),
        };
        let document = absolutize(
            cli.document
                .clone()
                .or(workspace.document)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCUMENT)),
            &root,
        );

        let probes = cli.probes.or(probe.count).unwrap_or(DEFAULT_PROBES);
        if probes == 0 {
            bail!("probe count must be at least 1");
        }

        let target = resolve_target(
            cli.transport.as_ref(),
            file.transport,
            file.server,
            file.tcp.unwrap_or_default(),
            &root,
        )?;

        Ok(Self {
            target,
            position: Position::new(
                cli.line.or(probe.line).unwrap_or(0),
                cli.character.or(probe.character).unwrap_or(0),
            ),
            probes,
            timeout: cli
                .timeout
                .or(probe.timeout_secs)
                .map(Duration::from_secs),
            shutdown: cli.shutdown || probe.shutdown.unwrap_or(false),
            root,
            document,
        })
    }
}

fn resolve_target(
    flag: Option<&TransportCommand>,
    kind: Option<TransportKind>,
    server: Option<ServerSection>,
    tcp: TcpSection,
    root: &Path,
) -> Result<ServerTarget> {
    let stdio = |command: &[String]| -> Result<ServerTarget> {
        let cmd = match (command.split_first(), server) {
            (Some((program, args)), _) => {
                ServerCommand::new(program.as_str(), args.iter().cloned())
            }
            (None, Some(section)) => {
                if section.command.trim().is_empty() {
                    bail!("[server] command must not be empty");
                }
                ServerCommand::new(section.command, section.args)
            }
            (None, None) => ServerCommand::crystal_default(),
        };
        Ok(ServerTarget::Stdio(cmd.current_dir(root)))
    };
    let tcp_target = |host: Option<&String>, port: Option<u16>| ServerTarget::Tcp {
        host: host
            .cloned()
            .or_else(|| tcp.host.clone())
            .unwrap_or_else(|| DEFAULT_TCP_HOST.to_string()),
        port: port.or(tcp.port).unwrap_or(DEFAULT_TCP_PORT),
    };

    match (flag, kind) {
        (Some(TransportCommand::Stdio { command }), _) => stdio(command),
        (Some(TransportCommand::Tcp { host, port }), _) => Ok(tcp_target(host.as_ref(), *port)),
        (None, Some(TransportKind::Tcp)) => Ok(tcp_target(None, None)),
        (None, Some(TransportKind::Stdio) | None) => stdio(&[]),
    }
}

fn absolutize(path: PathBuf, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
