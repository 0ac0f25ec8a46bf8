//! JSON-RPC framing over stdio.
//!
//! Every message is `Content-Length: N\r\n\r\n` followed by N bytes of JSON.
//! The editor writes requests to our stdin; we answer on stdout.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum frame size (4 MiB). A full-sync `didChange` of a large source
/// file stays well below this.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// `Some(len)` for a `Content-Length` header (any case), `None` for any
/// other header.
fn content_length(header: &str) -> Result<Option<usize>> {
    let Some((key, value)) = header.split_once(':') else {
        return Ok(None);
    };
    if !key.trim().eq_ignore_ascii_case("Content-Length") {
        return Ok(None);
    }
    let len = value
        .trim()
        .parse()
        .with_context(|| format!("invalid Content-Length value {:?}", value.trim()))?;
    Ok(Some(len))
}

/// Reads framed JSON-RPC messages from the editor.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the raw body of the next message.
    ///
    /// `Ok(None)` means the editor closed the stream between messages. An
    /// error leaves the stream unsynchronised; a body that later fails to
    /// parse as JSON does not.
    pub async fn read_body(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(len) = self.read_headers().await? else {
            return Ok(None);
        };
        if len > MAX_FRAME_BYTES {
            bail!("Content-Length {len} exceeds maximum {MAX_FRAME_BYTES}");
        }

        let mut body = vec![0u8; len];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;
        Ok(Some(body))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut length = None;
        let mut line = String::new();
        let mut started = false;

        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading header line")?;

            if read == 0 {
                if started {
                    bail!("unexpected EOF while reading headers");
                }
                return Ok(None);
            }
            started = true;

            let header = line.trim();
            if header.is_empty() {
                break;
            }
            if let Some(len) = content_length(header)? {
                length = Some(len);
            }
        }

        match length {
            Some(len) => Ok(Some(len)),
            None => bail!("missing Content-Length header"),
        }
    }
}

/// Writes framed JSON-RPC messages to the editor.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

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
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_json<R: AsyncRead + Unpin>(
        reader: &mut FrameReader<R>,
    ) -> Result<Option<serde_json::Value>> {
        let Some(body) = reader.read_body().await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&body)?))
    }

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{body}", body.len()).into_bytes()
    }

    #[test]
    fn test_content_length_header() {
        assert_eq!(content_length("Content-Length: 42").unwrap(), Some(42));
        assert_eq!(content_length("content-length:7").unwrap(), Some(7));
        assert_eq!(
            content_length("Content-Type: application/vscode-jsonrpc; charset=utf-8").unwrap(),
            None
        );
        assert_eq!(content_length("garbage").unwrap(), None);
        assert!(content_length("Content-Length: many").is_err());
    }

    #[tokio::test]
    async fn test_publish_roundtrip() {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": { "uri": "file:///game/main.asm", "diagnostics": [] }
        });

        let mut buf = Vec::new();
        FrameWriter::new(&mut buf).write_frame(&msg).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(read_json(&mut reader).await.unwrap().unwrap(), msg);
        assert!(read_json(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_back_to_back_requests() {
        let mut buf = frame(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#);
        buf.extend(frame(r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#));

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(read_json(&mut reader).await.unwrap().unwrap()["method"], "initialize");
        assert_eq!(read_json(&mut reader).await.unwrap().unwrap()["method"], "initialized");
        assert!(read_json(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extra_headers_ignored() {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"shutdown"}"#;
        let raw = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let mut reader = FrameReader::new(raw.as_bytes());
        assert_eq!(read_json(&mut reader).await.unwrap().unwrap()["method"], "shutdown");
    }

    #[tokio::test]
    async fn test_missing_content_length() {
        let buf: &[u8] = b"Content-Type: application/json\r\n\r\n{}";
        assert!(read_json(&mut FrameReader::new(buf)).await.is_err());
    }

    #[tokio::test]
    async fn test_eof_mid_headers_is_error() {
        let buf: &[u8] = b"Content-Length: 10\r\n";
        assert!(read_json(&mut FrameReader::new(buf)).await.is_err());
    }

    #[tokio::test]
    async fn test_eof_mid_body_is_error() {
        let buf: &[u8] = b"Content-Length: 100\r\n\r\n{\"id\"";
        assert!(read_json(&mut FrameReader::new(buf)).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let raw = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        assert!(read_json(&mut FrameReader::new(raw.as_bytes())).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_json_body() {
        let raw = frame("not json at all");
        assert!(read_json(&mut FrameReader::new(raw.as_slice())).await.is_err());
    }

    #[tokio::test]
    async fn test_bad_body_keeps_stream_in_sync() {
        let mut buf = frame("{not json");
        buf.extend(frame(r#"{"jsonrpc":"2.0","method":"exit"}"#));

        let mut reader = FrameReader::new(buf.as_slice());
        let body = reader.read_body().await.unwrap().unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&body).is_err());
        assert_eq!(read_json(&mut reader).await.unwrap().unwrap()["method"], "exit");
    }

    #[tokio::test]
    async fn test_content_length_counts_bytes() {
        // Assembler messages may quote non-ASCII symbol names.
        let msg = serde_json::json!({ "message": "Unknown symbol \"é\"" });
        let mut buf = Vec::new();
        FrameWriter::new(&mut buf).write_frame(&msg).await.unwrap();

        let body = serde_json::to_vec(&msg).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with(&format!("Content-Length: {}\r\n\r\n", body.len())));

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(read_json(&mut reader).await.unwrap().unwrap(), msg);
    }
}
