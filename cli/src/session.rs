//! Session driver — the scripted interaction with the server.
//!
//! ```text
//! greet -> initialize/initialized -> completion x N -> [shutdown/exit]
//! ```
//!
//! Every step awaits its response before the next one starts. Output is
//! human-readable and goes to the writer handed in by the caller.

use std::io::Write;

use anyhow::{Context, Result, anyhow};
use cra_lsp::lsp_types::{InitializeResult, Position, Uri};
use cra_lsp::{
    ClientIdentity, LspClient, completion_item_count, completion_params, initialize_params,
    path_to_file_uri,
};

use crate::config::Settings;

/// What the driver needs to know, already converted to protocol values.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub root: Uri,
    pub document: Uri,
    pub position: Position,
    pub probes: usize,
    pub shutdown: bool,
    pub client: ClientIdentity,
}

impl SessionPlan {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            root: path_to_file_uri(&settings.root).context("workspace root")?,
            document: path_to_file_uri(&settings.document).context("completion document")?,
            position: settings.position,
            probes: settings.probes,
            shutdown: settings.shutdown,
            client: ClientIdentity::default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub server_name: Option<String>,
    pub completion_counts: Vec<usize>,
}

pub async fn run<W: Write>(
    mut client: LspClient,
    plan: &SessionPlan,
    out: &mut W,
) -> Result<SessionReport> {
    writeln!(out, "Hello from {}!", plan.client.name)?;

    let init = client
        .initialize(initialize_params(&plan.root, &plan.client))
        .await
        .context("initialize")?;
    tracing::debug!(?init, "initialize result");
    writeln!(out, "{}", describe_server(&init))?;

    let mut completion_counts = Vec::with_capacity(plan.probes);
    for probe in 1..=plan.probes {
        let response = client
            .completion(completion_params(&plan.document, plan.position))
            .await
            .with_context(|| format!("completion probe {probe}"))?
            .ok_or_else(|| {
                anyhow!("server returned null for textDocument/completion (probe {probe})")
            })?;
        let count = completion_item_count(&response);
        writeln!(out, "Got {count} completion items")?;
        completion_counts.push(count);
    }

    if plan.shutdown {
        client.shutdown().await.context("shutdown")?;
        writeln!(out, "Server shut down")?;
    }
    out.flush()?;

    Ok(SessionReport {
        server_name: init.server_info.map(|info| info.name),
        completion_counts,
    })
}

fn describe_server(init: &InitializeResult) -> String {
    let name = match &init.server_info {
        Some(info) => match &info.version {
            Some(version) => format!("{} {version}", info.name),
            None => info.name.clone(),
        },
        None => String::from("unnamed server"),
    };
    let completion = if init.capabilities.completion_provider.is_some() {
        "advertises completion"
    } else {
        "does not advertise completion"
    };
    format!("Initialized {name} ({completion})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cra_lsp::codec::{FrameReader, FrameWriter};
    use serde_json::{Value, json};

    /// Answers initialize, shutdown and completion; completion returns
    /// `completion` verbatim.
    fn fake_server(completion: Value) -> (LspClient, tokio::task::JoinHandle<Vec<String>>) {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_end);
        let (server_read, server_write) = tokio::io::split(server_end);

        let handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(server_read);
            let mut writer = FrameWriter::new(server_write);
            let mut methods = Vec::new();
            while let Ok(Some(frame)) = reader.read_frame().await {
                let method = frame["method"].as_str().unwrap_or_default().to_string();
                let result = match method.as_str() {
                    "initialize" => json!({
                        "capabilities": {"completionProvider": {}},
                        "serverInfo": {"name": "cra", "version": "0.1.0"}
                    }),
                    "textDocument/completion" => completion.clone(),
                    "shutdown" => Value::Null,
                    _ => {
                        methods.push(method.clone());
                        if method == "exit" {
                            break;
                        }
                        continue;
                    }
                };
                methods.push(method);
                let reply = json!({"jsonrpc": "2.0", "id": frame["id"], "result": result});
                if writer.write_frame(&reply).await.is_err() {
                    break;
                }
            }
            methods
        });

        (LspClient::start(client_read, client_write), handle)
    }

    fn plan(probes: usize, shutdown: bool) -> SessionPlan {
        SessionPlan {
            root: cra_lsp::protocol::parse_uri("file:///home/mike/cr-analyzer").unwrap(),
            document: cra_lsp::protocol::parse_uri(
                "file:///home/mike/cr-analyzer/src/cra/types.cr",
            )
            .unwrap(),
            position: Position::new(0, 0),
            probes,
            shutdown,
            client: ClientIdentity::default(),
        }
    }

    #[tokio::test]
    async fn two_probes_report_item_counts() {
        let (client, _server) = fake_server(json!([{"label": "def"}, {"label": "end"}]));
        let mut out = Vec::new();

        let report = run(client, &plan(2, false), &mut out).await.unwrap();

        assert_eq!(report.server_name.as_deref(), Some("cra"));
        assert_eq!(report.completion_counts, [2, 2]);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Hello from cr-analyzer!\n\
             Initialized cra 0.1.0 (advertises completion)\n\
             Got 2 completion items\n\
             Got 2 completion items\n"
        );
    }

    #[tokio::test]
    async fn shutdown_runs_full_lifecycle() {
        let (client, server) = fake_server(json!({"isIncomplete": true, "items": []}));
        let mut out = Vec::new();

        let report = run(client, &plan(1, true), &mut out).await.unwrap();

        assert_eq!(report.completion_counts, [0]);
        assert!(String::from_utf8(out).unwrap().ends_with("Server shut down\n"));
        assert_eq!(
            server.await.unwrap(),
            [
                "initialize",
                "initialized",
                "textDocument/completion",
                "shutdown",
                "exit"
            ]
        );
    }

    #[tokio::test]
    async fn null_completion_aborts_the_run() {
        let (client, _server) = fake_server(Value::Null);
        let mut out = Vec::new();

        let err = run(client, &plan(2, false), &mut out).await.unwrap_err();

        assert!(err.to_string().contains("null"));
        let printed = String::from_utf8(out).unwrap();
        assert!(!printed.contains("Got"));
    }

    #[test]
    fn describes_server_without_info() {
        let init = InitializeResult::default();
        assert_eq!(
            describe_server(&init),
            "Initialized unnamed server (does not advertise completion)"
        );
    }

    #[test]
    fn plan_converts_paths_to_uris() {
        #[cfg(not(windows))]
        let root = std::path::PathBuf::from("/home/mike/cr-analyzer");
        #[cfg(windows)]
        let root = std::path::PathBuf::from(r"C:\cr-analyzer");

        let settings = Settings {
            target: cra_lsp::ServerTarget::default(),
            document: root.join("src").join("cra").join("types.cr"),
            root,
            position: Position::new(0, 0),
            probes: 2,
            timeout: None,
            shutdown: false,
        };
        let plan = SessionPlan::from_settings(&settings).unwrap();
        assert!(plan.root.as_str().starts_with("file:///"));
        assert!(plan.document.as_str().ends_with("/src/cra/types.cr"));
        assert_eq!(plan.probes, 2);
    }
}
