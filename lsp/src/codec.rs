//! `Content-Length` framing for JSON-RPC over a byte stream.
//!
//! Every LSP message is `Content-Length: N\r\n\r\n` followed by exactly `N`
//! bytes of UTF-8 JSON. [`FrameReader`] and [`FrameWriter`] work over any
//! tokio reader/writer, so the same code serves child pipes, TCP sockets and
//! in-memory duplex streams in tests.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body (4 MiB).
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// One parsed header line.
#[derive(Debug, PartialEq, Eq)]
enum HeaderLine {
    /// The blank separator between headers and body.
    End,
    ContentLength(usize),
    /// Any other `Content-*` header (e.g. `Content-Type`).
    Other,
    /// A line that is not a header at all.
    Noise,
}

fn parse_header_line(line: &str) -> Result<HeaderLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(HeaderLine::End);
    }
    let Some((key, value)) = trimmed.split_once(':') else {
        return Ok(HeaderLine::Noise);
    };
    let key = key.trim();
    if key.eq_ignore_ascii_case("Content-Length") {
        let len = value
            .trim()
            .parse()
            .with_context(|| format!("invalid Content-Length value {:?}", value.trim()))?;
        return Ok(HeaderLine::ContentLength(len));
    }
    if key
        .get(..8)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("Content-"))
    {
        return Ok(HeaderLine::Other);
    }
    Ok(HeaderLine::Noise)
}

/// Reads JSON-RPC frames from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::new(),
        }
    }

    /// Read the next frame and parse its body as JSON.
    ///
    /// `Ok(None)` means the stream ended cleanly between frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(len) = self.read_headers().await? else {
            return Ok(None);
        };
        if len > MAX_FRAME_BYTES {
            bail!("frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit");
        }

        let mut body = vec![0u8; len];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;

        let value = serde_json::from_slice(&body).context("parsing JSON-RPC frame body")?;
        Ok(Some(value))
    }

    /// Consume header lines up to and including the blank separator.
    ///
    /// Lines that precede the first header and do not look like headers are
    /// skipped, since some servers print build chatter on stdout before they
    /// start speaking the protocol.
    async fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut content_length = None;
        let mut in_headers = false;

        loop {
            self.line.clear();
            let n = self
                .reader
                .read_until(b'\n', &mut self.line)
                .await
                .context("reading header line")?;
            if n == 0 {
                if in_headers {
                    bail!("stream ended in the middle of a header block");
                }
                return Ok(None);
            }

            // Chatter may not be UTF-8; real headers are ASCII either way.
            let line = String::from_utf8_lossy(&self.line);
            match parse_header_line(&line)? {
                HeaderLine::End if in_headers => break,
                HeaderLine::End => {}
                HeaderLine::ContentLength(len) => {
                    content_length = Some(len);
                    in_headers = true;
                }
                HeaderLine::Other => in_headers = true,
                HeaderLine::Noise if in_headers => {
                    bail!("malformed header line {:?}", line.trim());
                }
                HeaderLine::Noise => {
                    tracing::trace!(line = %line.trim(), "skipping non-LSP output");
                }
            }
        }

        match content_length {
            Some(len) => Ok(Some(len)),
            None => bail!("header block has no Content-Length"),
        }
    }
}

/// Writes JSON-RPC frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize `msg`, prefix it with its byte length, and flush.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(msg).context("serializing JSON-RPC frame")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.writer
            .write_all(&body)
            .await
            .context("writing frame body")?;
        self.writer.flush().await.context("flushing frame")?;
        Ok(())
    }

    /// Shut down the underlying writer, signalling EOF to the peer.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await.context("closing writer")
    }
}
