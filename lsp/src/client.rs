//! Client handle — typed requests over a framed duplex stream.
//!
//! A writer task owns the outgoing half and drains a channel of frames; a
//! reader task owns the incoming half and routes responses to the request
//! that is waiting on them. The handle itself only holds the channel, the
//! pending-request table, and the id counter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lsp_types::notification::{Exit, Initialized, Notification as LspNotification};
use lsp_types::request::{Completion, Initialize, Request as LspRequest, Shutdown};
use lsp_types::{
    CompletionParams, CompletionResponse, InitializeParams, InitializeResult, InitializedParams,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::protocol::{self, Incoming, Notification, Request, ResponseError};

const WRITER_CHANNEL_CAPACITY: usize = 64;

/// Failures of the request/response exchange itself.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection to language server closed")]
    ConnectionClosed,
    #[error("{method} timed out after {}s", after.as_secs_f32())]
    Timeout {
        method: &'static str,
        after: Duration,
    },
    #[error("{method} failed")]
    Server {
        method: &'static str,
        #[source]
        error: ResponseError,
    },
}

enum WriterCommand {
    Send(serde_json::Value),
    Close,
}

/// Requests awaiting a response, keyed by id.
///
/// Once `closed` is set no new entries are accepted, so a request issued
/// after the server hung up fails immediately instead of waiting forever.
#[derive(Default)]
struct PendingTable {
    senders: HashMap<u64, oneshot::Sender<serde_json::Value>>,
    closed: bool,
}

type Pending = Arc<Mutex<PendingTable>>;

pub struct LspClient {
    writer_tx: mpsc::Sender<WriterCommand>,
    pending: Pending,
    next_id: u64,
    timeout: Option<Duration>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl LspClient {
    /// Start the reader and writer tasks over an already-established stream.
    pub fn start<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: Pending = Arc::new(Mutex::new(PendingTable::default()));
        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);

        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("LSP write error: {e:#}");
                            break;
                        }
                    }
                    WriterCommand::Close => {
                        if let Err(e) = writer.close().await {
                            tracing::debug!("closing LSP writer: {e:#}");
                        }
                        break;
                    }
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_writer_tx = writer_tx.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        Self::dispatch_frame(&frame, &reader_pending, &reader_writer_tx).await;
                    }
                    Ok(None) => {
                        tracing::debug!("language server closed its output stream");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("LSP read error: {e:#}");
                        break;
                    }
                }
            }
            let mut table = reader_pending.lock().await;
            table.closed = true;
            // Dropping the senders wakes every waiter with ConnectionClosed.
            table.senders.clear();
        });

        Self {
            writer_tx,
            pending,
            next_id: 1,
            timeout: None,
            reader_handle,
            writer_handle,
        }
    }

    /// Bound every request by `timeout`. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn dispatch_frame(
        frame: &serde_json::Value,
        pending: &Mutex<PendingTable>,
        writer_tx: &mpsc::Sender<WriterCommand>,
    ) {
        let Some(incoming) = protocol::classify(frame) else {
            tracing::trace!("ignoring unrecognised JSON-RPC frame");
            return;
        };

        match incoming {
            Incoming::Response { id, body } => {
                let sender = pending.lock().await.senders.remove(&id);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(body);
                    }
                    None => tracing::debug!(id, "response for unknown request id"),
                }
            }
            Incoming::ServerRequest { id, method } => {
                // The server may block until it hears back, so refuse rather than ignore.
                tracing::debug!("server sent request {method}; replying method not found");
                let reply = protocol::method_not_found(&id, &method);
                let _ = writer_tx.send(WriterCommand::Send(reply)).await;
            }
            Incoming::Notification { method, params } => {
                Self::handle_notification(&method, params.as_ref());
            }
        }
    }

    fn handle_notification(method: &str, params: Option<&serde_json::Value>) {
        match method {
            "window/logMessage" | "window/showMessage" => {
                let message = params
                    .and_then(|p| p.get("message"))
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default();
                tracing::info!(target: "server", "{message}");
            }
            _ => tracing::trace!("ignoring notification {method}"),
        }
    }

    /// Send a typed request and wait for its typed result.
    pub async fn request<R: LspRequest>(&mut self, params: R::Params) -> Result<R::Result> {
        let id = self.next_id;
        self.next_id += 1;

        let params = protocol::params_value(params)
            .with_context(|| format!("serializing {} params", R::METHOD))?;
        let frame = serde_json::to_value(Request::new(id, R::METHOD, params))
            .context("serializing request")?;

        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.pending.lock().await;
            if table.closed {
                return Err(ClientError::ConnectionClosed.into());
            }
            table.senders.insert(id, tx);
        }

        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.senders.remove(&id);
            return Err(ClientError::ConnectionClosed.into());
        }
        tracing::debug!(id, method = R::METHOD, "request sent");

        let received = match self.timeout {
            Some(after) => match tokio::time::timeout(after, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.pending.lock().await.senders.remove(&id);
                    return Err(ClientError::Timeout {
                        method: R::METHOD,
                        after,
                    }
                    .into());
                }
            },
            None => rx.await,
        };
        let Ok(mut body) = received else {
            return Err(ClientError::ConnectionClosed.into());
        };

        if let Some(error) = body.get_mut("error").map(serde_json::Value::take) {
            let error: ResponseError = serde_json::from_value(error)
                .with_context(|| format!("decoding {} error response", R::METHOD))?;
            return Err(ClientError::Server {
                method: R::METHOD,
                error,
            }
            .into());
        }

        let result = body
            .get_mut("result")
            .map(serde_json::Value::take)
            .unwrap_or_default();
        serde_json::from_value(result).with_context(|| format!("decoding {} result", R::METHOD))
    }

    /// Send a typed notification. No reply is expected.
    pub async fn notify<N: LspNotification>(&self, params: N::Params) -> Result<()> {
        let params = protocol::params_value(params)
            .with_context(|| format!("serializing {} params", N::METHOD))?;
        let frame = serde_json::to_value(Notification::new(N::METHOD, params))
            .context("serializing notification")?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;
        Ok(())
    }

    /// `initialize` followed by the `initialized` notification.
    pub async fn initialize(&mut self, params: InitializeParams) -> Result<InitializeResult> {
        let result = self.request::<Initialize>(params).await?;
        self.notify::<Initialized>(InitializedParams {}).await?;
        Ok(result)
    }

    /// `textDocument/completion`. `None` is the server's `null` result.
    pub async fn completion(
        &mut self,
        params: CompletionParams,
    ) -> Result<Option<CompletionResponse>> {
        self.request::<Completion>(params).await
    }

    /// `shutdown` then `exit`, then close the outgoing stream.
    pub async fn shutdown(mut self) -> Result<()> {
        self.request::<Shutdown>(()).await?;
        self.notify::<Exit>(()).await?;
        let _ = self.writer_tx.send(WriterCommand::Close).await;
        let _ = (&mut self.writer_handle).await;
        self.reader_handle.abort();
        Ok(())
    }
}

impl Drop for LspClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}
