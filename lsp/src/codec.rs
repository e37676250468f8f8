//! `Content-Length` framing for JSON-RPC over a byte stream.
//!
//! Each message is `Content-Length: N\r\n` (plus optional other headers),
//! a blank line, then exactly `N` bytes of UTF-8 JSON.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Largest accepted frame body. Editors send whole documents, so be generous.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

pub struct FrameReader<R> {
    reader: BufReader<R>,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_limit(reader, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_limit(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_frame_bytes,
        }
    }

    /// Next message, or `None` when the stream ends between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Value>> {
        let Some(length) = self.read_content_length().await? else {
            return Ok(None);
        };
        if length > self.max_frame_bytes {
            bail!("frame of {length} bytes exceeds limit of {}", self.max_frame_bytes);
        }

        let mut body = vec![0u8; length];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;
        let value = serde_json::from_slice(&body).context("decoding frame body")?;
        Ok(Some(value))
    }

    async fn read_content_length(&mut self) -> Result<Option<usize>> {
        let mut length = None;
        let mut line = String::new();
        let mut started = false;

        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading frame header")?;
            if read == 0 {
                if started {
                    bail!("stream ended inside frame headers");
                }
                return Ok(None);
            }
            started = true;

            let header = line.trim();
            if header.is_empty() {
                break;
            }
            let Some((name, value)) = header.split_once(':') else {
                tracing::trace!(header, "Ignoring malformed header line");
                continue;
            };
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                let parsed = value
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid Content-Length `{}`", value.trim()))?;
                length = Some(parsed);
            }
        }

        length.map(Some).context("frame has no Content-Length header")
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<()> {
        let body = serde_json::to_vec(message).context("encoding frame body")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.writer
            .write_all(&body)
            .await
            .context("writing frame body")?;
        self.writer.flush().await.context("flushing frame")
    }
}
