use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::headers::{Headers, encode_latin1};
use crate::http::response::{Response, StatusCode};

const HTTP_VERSION: &str = "HTTP/1.1";

/// Serializes a status line and header block, including the blank line.
///
/// `reason` overrides the standard phrase for `status`, so a relayed
/// response keeps the wording the upstream chose.
pub fn serialize_head(status: StatusCode, reason: Option<&str>, headers: &Headers) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);

    // Status line
    buf.extend_from_slice(format!("{} {} ", HTTP_VERSION, status.as_u16()).as_bytes());
    encode_latin1(reason.unwrap_or(status.reason_phrase()), &mut buf);
    buf.extend_from_slice(b"\r\n");

    // Headers
    headers.write_to(&mut buf);

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    buf
}

fn serialize_response(resp: &Response) -> Vec<u8> {
    let mut buf = serialize_head(resp.status, resp.reason.as_deref(), &resp.headers);
    buf.extend_from_slice(&resp.body);
    buf
}

pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self {
            buffer: serialize_response(response),
            written: 0,
        }
    }

    /// Head and body of a response to a HEAD request: the headers describe
    /// the body that would have been sent, but no body bytes follow.
    pub fn head_only(response: &Response) -> Self {
        Self {
            buffer: serialize_head(response.status, response.reason.as_deref(), &response.headers),
            written: 0,
        }
    }

    pub async fn write_to_stream<W>(&mut self, stream: &mut W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        while self.written < self.buffer.len() {
            let n = stream.write(&self.buffer[self.written..]).await?;

            if n == 0 {
                return Err(anyhow::anyhow!("connection closed while writing"));
            }

            self.written += n;
        }

        stream.flush().await?;
        Ok(())
    }
}
