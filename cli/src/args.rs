//! Command-line surface.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "cra-probe",
    version,
    about = "Initialize a Crystal language server and probe textDocument/completion"
)]
pub struct Cli {
    /// TOML config file (default: ./cra-probe.toml when present).
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Workspace root sent as rootUri (default: current directory).
    #[arg(long, value_name = "PATH")]
    pub root: Option<PathBuf>,

    /// Document to complete in, relative to the root unless absolute.
    #[arg(long, value_name = "PATH")]
    pub document: Option<PathBuf>,

    /// Zero-based line of the completion position.
    #[arg(long)]
    pub line: Option<u32>,

    /// Zero-based character of the completion position.
    #[arg(long)]
    pub character: Option<u32>,

    /// Number of completion requests to send.
    #[arg(long, value_name = "N")]
    pub probes: Option<usize>,

    /// Per-request timeout in seconds (default: wait forever).
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Send shutdown/exit before quitting.
    #[arg(long)]
    pub shutdown: bool,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub transport: Option<TransportCommand>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum TransportCommand {
    /// Spawn the server and talk over stdin/stdout (default).
    Stdio {
        /// Server command line, e.g. `crystal run src/bin/cra.cr`.
        #[arg(
            value_name = "COMMAND",
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        command: Vec<String>,
    },
    /// Connect to an already-running server over TCP.
    Tcp {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_uses_defaults() {
        let cli = Cli::try_parse_from(["cra-probe"]).unwrap();
        assert!(cli.transport.is_none());
        assert!(cli.config.is_none());
        assert!(!cli.shutdown);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn stdio_takes_server_flags_verbatim() {
        let cli = Cli::try_parse_from([
            "cra-probe",
            "--probes",
            "1",
            "stdio",
            "crystal",
            "run",
            "-Dpreview_mt",
            "-Dexecution_context",
            "src/bin/cra.cr",
        ])
        .unwrap();

        assert_eq!(cli.probes, Some(1));
        assert_eq!(
            cli.transport,
            Some(TransportCommand::Stdio {
                command: vec![
                    "crystal".into(),
                    "run".into(),
                    "-Dpreview_mt".into(),
                    "-Dexecution_context".into(),
                    "src/bin/cra.cr".into(),
                ]
            })
        );
    }

    #[test]
    fn tcp_accepts_host_and_port() {
        let cli =
            Cli::try_parse_from(["cra-probe", "-vv", "tcp", "--port", "9000"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(
            cli.transport,
            Some(TransportCommand::Tcp {
                host: None,
                port: Some(9000)
            })
        );
    }

    #[test]
    fn rejects_out_of_range_port() {
        assert!(Cli::try_parse_from(["cra-probe", "tcp", "--port", "70000"]).is_err());
    }
}
