//! Upstream connection and request forwarding
//!
//! Every forwarded request gets its own TCP connection to the upstream.
//! Nothing is pooled: the connection is opened, used for one exchange and
//! dropped with the [`UpstreamResponse`].

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::http::body::{AggregatedBody, BodyError, BodyReader, Framing, aggregate};
use crate::http::headers::{Headers, encode_latin1};
use crate::http::parser::{ParseError, parse_response_head};
use crate::http::request::RequestHead;
use crate::http::response::StatusCode;
use crate::proxy::error::ProxyError;

/// Default buffer size for upstream reads
const BUFFER_SIZE: usize = 8192;

/// Marker sent alongside `Accept-Encoding: identity` so upstream
/// compression middleware that ignores the former can be told to skip.
pub const NO_COMPRESSION_HEADER: &str = "X-No-Compression";

/// Request headers that only describe the inbound connection.
const HOP_BY_HOP: [&str; 8] = [
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Transfer-Encoding",
    "TE",
    "Trailer",
    "Upgrade",
    "Expect",
];

/// A fixed upstream host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    host: String,
    port: u16,
}

impl Upstream {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses an `http://host[:port]` URL. Any path on the URL is ignored;
    /// requests are always sent with their own original path.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = url::Url::parse(raw).with_context(|| format!("Invalid upstream URL {raw:?}"))?;

        if url.scheme() != "http" {
            anyhow::bail!("Unsupported upstream scheme {:?}, only http is proxied", url.scheme());
        }

        let host = url.host_str().context("Upstream URL missing host")?;
        let port = url.port_or_known_default().unwrap_or(80);

        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, used both to connect and as the forwarded `Host` header.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}:{}", self.host, self.port)
    }
}

/// Sends requests to an upstream and reads back the response head.
#[derive(Debug, Clone)]
pub struct Forwarder {
    /// Connection timeout duration
    connect_timeout: Duration,

    /// Deadline for sending the request and receiving the response head
    request_timeout: Duration,

    /// Ask the upstream not to compress its response
    suppress_encoding: bool,
}

impl Forwarder {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
            suppress_encoding: true,
        }
    }

    /// Turns the `Accept-Encoding: identity` override on or off.
    pub fn with_encoding_suppression(mut self, enabled: bool) -> Self {
        self.suppress_encoding = enabled;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Forwards one request and returns once the upstream response head has
    /// arrived. The body is left on the connection for the relay.
    ///
    /// There is exactly one attempt; failures are returned as they happen.
    pub async fn forward(
        &self,
        head: &RequestHead,
        body: AggregatedBody,
        upstream: &Upstream,
    ) -> Result<UpstreamResponse, ProxyError> {
        let addr = upstream.authority();

        let stream = match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Err(_) => {
                return Err(ProxyError::UpstreamTimeout {
                    addr,
                    after: self.connect_timeout,
                });
            }
            Ok(Err(source)) => return Err(ProxyError::UpstreamUnreachable { addr, source }),
            Ok(Ok(stream)) => stream,
        };

        tracing::trace!(upstream = %addr, "Connected to upstream");

        match timeout(
            self.request_timeout,
            self.exchange(stream, head, &body, upstream),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProxyError::UpstreamTimeout {
                addr,
                after: self.request_timeout,
            }),
        }
    }

    async fn exchange(
        &self,
        mut stream: TcpStream,
        head: &RequestHead,
        body: &AggregatedBody,
        upstream: &Upstream,
    ) -> Result<UpstreamResponse, ProxyError> {
        let addr = upstream.authority();
        let unreachable = |source| ProxyError::UpstreamUnreachable {
            addr: addr.clone(),
            source,
        };

        let request_bytes = self.build_http_request(head, body, upstream);
        stream.write_all(&request_bytes).await.map_err(unreachable)?;
        stream.flush().await.map_err(unreachable)?;

        tracing::trace!(upstream = %addr, bytes = request_bytes.len(), "Request sent to upstream");

        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

        loop {
            match parse_response_head(&buffer) {
                Ok((response_head, consumed)) => {
                    buffer.advance(consumed);

                    // Interim responses are not relayed
                    if response_head.status.is_informational() {
                        continue;
                    }

                    let framing = Framing::for_response(
                        &head.method,
                        response_head.status,
                        &response_head.headers,
                    )
                    .map_err(|e| protocol(&addr, format!("{e:?}")))?;

                    return Ok(UpstreamResponse {
                        status: response_head.status,
                        reason: response_head.reason,
                        headers: response_head.headers,
                        framing,
                        stream,
                        buffer,
                        addr: addr.clone(),
                    });
                }

                Err(ParseError::Incomplete) => {}

                Err(e) => return Err(protocol(&addr, format!("{e:?}"))),
            }

            let n = stream.read_buf(&mut buffer).await.map_err(unreachable)?;
            if n == 0 {
                return Err(protocol(&addr, "connection closed before a response was received"));
            }
        }
    }

    /// Build HTTP request bytes to send upstream
    ///
    /// The request-target is written exactly as the client sent it. `Host`
    /// names the upstream, the body is framed by `Content-Length`, and the
    /// connection is closed after one exchange.
    pub fn build_http_request(
        &self,
        head: &RequestHead,
        body: &AggregatedBody,
        upstream: &Upstream,
    ) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(512 + body.len());

        encode_latin1(
            &format!("{} {} {}\r\n", head.method, head.original_url, head.version),
            &mut buffer,
        );

        let had_body_framing =
            head.headers.contains("Content-Length") || head.headers.contains("Transfer-Encoding");

        let mut headers: Headers = head.headers.clone();

        // Fields the client listed in Connection are private to its hop
        let listed: Vec<String> = head
            .headers
            .get_all("Connection")
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        for name in &listed {
            headers.remove(name);
        }

        for name in HOP_BY_HOP {
            headers.remove(name);
        }

        headers.insert("Host", upstream.authority());

        if self.suppress_encoding {
            headers.insert("Accept-Encoding", "identity");
            headers.insert(NO_COMPRESSION_HEADER, "1");
        }

        if had_body_framing || !body.is_empty() {
            headers.insert("Content-Length", body.len().to_string());
        }

        headers.insert("Connection", "close");

        headers.write_to(&mut buffer);

        // End of headers
        buffer.extend_from_slice(b"\r\n");

        buffer.extend_from_slice(body.as_bytes());

        buffer
    }
}

fn protocol(addr: &str, reason: impl Into<String>) -> ProxyError {
    ProxyError::UpstreamProtocol {
        addr: addr.to_string(),
        reason: reason.into(),
    }
}

/// An upstream response whose head has been read.
///
/// Owns the upstream connection; dropping it closes the connection, which
/// is how an abandoned relay aborts the upstream side.
pub struct UpstreamResponse {
    pub status: StatusCode,
    /// Reason phrase from the status line, possibly empty
    pub reason: String,
    pub headers: Headers,
    framing: Framing,
    stream: TcpStream,
    buffer: BytesMut,
    addr: String,
}

impl UpstreamResponse {
    /// Reader over the remaining body bytes.
    pub fn body(&mut self) -> BodyReader<'_, TcpStream> {
        BodyReader::new(self.framing, &mut self.stream, &mut self.buffer)
    }

    /// Reads the rest of the body into memory.
    pub async fn read_to_end(&mut self) -> Result<Bytes, ProxyError> {
        let body = aggregate(self.body(), usize::MAX).await;
        body.map(AggregatedBody::into_bytes)
            .map_err(|e| self.body_error(e))
    }

    /// Maps a body read failure to the upstream side of the taxonomy.
    pub fn body_error(&self, error: BodyError) -> ProxyError {
        match error {
            BodyError::Io(source) => ProxyError::UpstreamUnreachable {
                addr: self.addr.clone(),
                source,
            },
            other => protocol(&self.addr, other.to_string()),
        }
    }
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .field("framing", &self.framing)
            .field("addr", &self.addr)
            .finish()
    }
}
