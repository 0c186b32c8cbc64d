//! Writing upstream responses back to the client.
//!
//! Both strategies send the upstream status and the filtered header set.
//! They differ in when the first byte reaches the client:
//!
//! - **Buffered** drains the whole upstream body first, so the response can
//!   be re-framed with a fresh `Content-Length` and the connection kept alive.
//! - **Streamed** writes the head right away and copies body bytes as they
//!   arrive; the end of the body is signalled by closing the connection.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::http::body::{BodyError, BodyReader};
use crate::http::headers::Headers;
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::http::writer::serialize_head;
use crate::proxy::error::ProxyError;
use crate::proxy::filter::filter_response_headers;
use crate::proxy::upstream::UpstreamResponse;

/// Content type assumed for buffered responses that do not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// An upstream response held entirely in memory.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    pub status: StatusCode,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl BufferedResponse {
    /// Reads the rest of `upstream` and prepares the client-facing header set.
    pub async fn collect(mut upstream: UpstreamResponse) -> Result<Self, ProxyError> {
        let body = upstream.read_to_end().await?;

        let mut headers = filter_response_headers(&upstream.headers);
        if !headers.contains("Content-Type") {
            headers.append("Content-Type", DEFAULT_CONTENT_TYPE);
        }

        Ok(Self {
            status: upstream.status,
            reason: upstream.reason,
            headers,
            body,
        })
    }

    /// Final response with fresh framing for a client that does or does not
    /// want the connection kept open.
    ///
    /// Answers to `HEAD` and `304 Not Modified` carry no body here, but the
    /// length of the representation is the upstream's to state, so they get
    /// no `Content-Length` at all.
    pub fn into_response(self, keep_alive: bool, is_head: bool) -> Response {
        let connection = if keep_alive { "keep-alive" } else { "close" };
        let mut builder = ResponseBuilder::new(self.status)
            .headers(self.headers)
            .header("Connection", connection)
            .body(self.body);
        if !self.reason.is_empty() {
            builder = builder.reason(self.reason);
        }
        let mut response = builder.build();

        if is_head
            || response.status == StatusCode::NO_CONTENT
            || response.status == StatusCode::NOT_MODIFIED
            || response.status.is_informational()
        {
            response.headers.remove("Content-Length");
        }

        response
    }
}

enum PumpError {
    Upstream(BodyError),
    Client,
}

/// Writes the head immediately, then copies the body through chunk by chunk.
///
/// Each client write is awaited before the next upstream read, so a slow
/// client slows the upstream down. Returns the number of body bytes relayed.
pub async fn relay_streamed<W>(client: &mut W, mut upstream: UpstreamResponse) -> Result<u64, ProxyError>
where
    W: AsyncWrite + Unpin,
{
    let mut headers = filter_response_headers(&upstream.headers);
    headers.insert("Connection", "close");

    let reason = Some(upstream.reason.as_str()).filter(|r| !r.is_empty());
    let head = serialize_head(upstream.status, reason, &headers);
    client
        .write_all(&head)
        .await
        .map_err(|_| ProxyError::ClientDisconnected)?;
    client
        .flush()
        .await
        .map_err(|_| ProxyError::ClientDisconnected)?;

    let pumped = pump(upstream.body(), client).await;
    match pumped {
        Ok(relayed) => Ok(relayed),
        Err(PumpError::Upstream(e)) => Err(upstream.body_error(e)),
        Err(PumpError::Client) => Err(ProxyError::ClientDisconnected),
    }
}

async fn pump<R, W>(mut body: BodyReader<'_, R>, client: &mut W) -> Result<u64, PumpError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut relayed = 0u64;

    while let Some(chunk) = body.next_chunk().await.map_err(PumpError::Upstream)? {
        client.write_all(&chunk).await.map_err(|_| PumpError::Client)?;
        client.flush().await.map_err(|_| PumpError::Client)?;
        relayed += chunk.len() as u64;
    }

    Ok(relayed)
}
