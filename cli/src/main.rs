//! cra-probe — launch a Crystal language server and exercise its LSP surface.
//!
//! ```text
//! main() -> Settings::resolve() -> connect(target) -> spawn_stderr_relay()
//!                                        |
//!                                        v
//!                               session::run(client) -> exit
//! ```
//!
//! The runtime is single-threaded: the session suspends at each request and
//! the stderr relay runs in the gaps.

mod args;
mod config;
mod session;
mod teardown;

use std::env;
use std::io::{IsTerminal, stderr, stdout};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cra_lsp::{LspClient, ServerProcess, connect, spawn_stderr_relay};

use crate::args::Cli;
use crate::config::{FileConfig, Settings};
use crate::session::SessionPlan;

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // Stdout carries probe output; logs go to stderr.
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(stderr)
                .with_ansi(stderr().is_terminal())
                .with_target(false),
        )
        .with(env_filter)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cwd = env::current_dir().context("reading current directory")?;
    let file = FileConfig::discover(cli.config.as_deref(), &cwd)?;
    let settings = Settings::resolve(&cli, file, &cwd)?;
    let plan = SessionPlan::from_settings(&settings)?;

    tracing::info!(server = %settings.target, "connecting to language server");
    let connection = connect(&settings.target)
        .await
        .with_context(|| format!("connecting to {}", settings.target))?;

    let mut process = connection.process;
    let relay = process
        .as_mut()
        .and_then(ServerProcess::take_stderr)
        .map(spawn_stderr_relay);

    let client =
        LspClient::start(connection.reader, connection.writer).with_timeout(settings.timeout);
    let outcome = session::run(client, &plan, &mut stdout()).await;

    let graceful = settings.shutdown && outcome.is_ok();
    teardown::finish(process, relay, graceful).await;

    let report = outcome?;
    tracing::info!(
        server = report.server_name.as_deref().unwrap_or("unknown"),
        counts = ?report.completion_counts,
        "probe finished"
    );
    Ok(())
}
