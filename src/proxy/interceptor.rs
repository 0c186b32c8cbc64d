//! Request interception.
//!
//! The interceptor sees every request head before the rest of the server
//! does. If a [`ForwardRule`] matches, it takes the request over: reads the
//! body, forwards it, relays the answer. Otherwise it hands the untouched
//! head back as [`Disposition::PassThrough`] without reading or writing a
//! single byte.

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::http::body::{BodyError, BodyReader, Framing, aggregate};
use crate::http::headers::Headers;
use crate::http::parser::ParseError;
use crate::http::request::{Method, RequestHead};
use crate::http::response::StatusCode;
use crate::http::writer::{ResponseWriter, serialize_head};
use crate::proxy::error::{ProxyError, error_response};
use crate::proxy::relay::{BufferedResponse, relay_streamed};
use crate::proxy::rule::{ForwardRule, RelayStrategy, find_rule};
use crate::proxy::upstream::Forwarder;

/// Default cap on an aggregated request body.
pub const DEFAULT_MAX_BODY: usize = 16 * 1024 * 1024;

/// What happened to a request offered to the interceptor.
#[derive(Debug)]
pub enum Disposition {
    /// A rule matched and the request was answered (successfully or not).
    Forwarded { keep_alive: bool },
    /// No rule matched; the request belongs to the next handler.
    PassThrough(RequestHead),
}

/// Routes matching requests to their upstream. Built once at startup and
/// shared read-only by every connection.
#[derive(Debug)]
pub struct Interceptor {
    rules: Vec<ForwardRule>,
    forwarder: Forwarder,
    max_body: usize,
}

impl Interceptor {
    pub fn new(rules: Vec<ForwardRule>, forwarder: Forwarder) -> Self {
        Self {
            rules,
            forwarder,
            max_body: DEFAULT_MAX_BODY,
        }
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.max_body = limit;
        self
    }

    pub fn rules(&self) -> &[ForwardRule] {
        &self.rules
    }

    /// First rule whose path test accepts `path`.
    pub fn route(&self, path: &str) -> Option<&ForwardRule> {
        find_rule(&self.rules, path)
    }

    /// Handles one request whose head has just been parsed from `client`.
    ///
    /// `buffer` holds any bytes read past the head. On return the request
    /// body has been consumed from it, unless the request was passed through.
    pub async fn intercept(
        &self,
        head: RequestHead,
        client: &mut TcpStream,
        buffer: &mut BytesMut,
    ) -> Disposition {
        let Some(rule) = self.route(&head.path) else {
            return Disposition::PassThrough(head);
        };

        tracing::info!(
            method = %head.method,
            path = %head.original_url,
            upstream = %rule.upstream,
            strategy = %rule.strategy,
            "Forwarding request"
        );

        let keep_alive = head.keep_alive() && rule.strategy == RelayStrategy::Buffered;

        if head.expects_continue() {
            let interim = serialize_head(StatusCode::CONTINUE, None, &Headers::new());
            if let Err(e) = client.write_all(&interim).await {
                tracing::debug!(error = %e, "Client went away before sending body");
                return Disposition::Forwarded { keep_alive: false };
            }
        }

        let body = match Framing::for_request(&head) {
            Ok(framing) => aggregate(BodyReader::new(framing, client, buffer), self.max_body).await,
            Err(ParseError::UnsupportedTransferEncoding) => Err(BodyError::UnsupportedCoding),
            Err(_) => Err(BodyError::InvalidLength),
        };

        let body = match body {
            Ok(body) => body,
            Err(BodyError::UnexpectedEof) | Err(BodyError::Io(_)) => {
                tracing::debug!(path = %head.original_url, "Client went away mid-body");
                return Disposition::Forwarded { keep_alive: false };
            }
            Err(e) => return self.fail(client, &head, ProxyError::ClientBody(e), false).await,
        };

        // Pipelined bytes already buffered mean the client is still sending
        let watch = buffer.is_empty();

        let forwarded = tokio::select! {
            res = self.forwarder.forward(&head, body, &rule.upstream) => res,
            () = client_closed(&*client, watch) => Err(ProxyError::ClientDisconnected),
        };

        let upstream = match forwarded {
            Ok(upstream) => upstream,
            Err(e) => return self.fail(client, &head, e, keep_alive).await,
        };

        let status = upstream.status.as_u16();

        match rule.strategy {
            RelayStrategy::Buffered => {
                let deadline = self.forwarder.request_timeout();
                let collected = tokio::select! {
                    res = timeout(deadline, BufferedResponse::collect(upstream)) => {
                        res.unwrap_or_else(|_| Err(ProxyError::UpstreamTimeout {
                            addr: rule.upstream.authority(),
                            after: deadline,
                        }))
                    }
                    () = client_closed(&*client, watch) => Err(ProxyError::ClientDisconnected),
                };

                let buffered = match collected {
                    Ok(buffered) => buffered,
                    Err(e) => return self.fail(client, &head, e, keep_alive).await,
                };

                let bytes = buffered.body.len();
                let is_head = head.method == Method::HEAD;
                let response = buffered.into_response(keep_alive, is_head);
                let mut writer = if is_head {
                    ResponseWriter::head_only(&response)
                } else {
                    ResponseWriter::new(&response)
                };

                match writer.write_to_stream(client).await {
                    Ok(()) => {
                        tracing::debug!(status, bytes, path = %head.original_url, "Relayed buffered response");
                        Disposition::Forwarded { keep_alive }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Client went away before the response was written");
                        Disposition::Forwarded { keep_alive: false }
                    }
                }
            }

            RelayStrategy::Streamed => {
                match relay_streamed(client, upstream).await {
                    Ok(bytes) => {
                        tracing::debug!(status, bytes, path = %head.original_url, "Relayed streamed response");
                    }
                    Err(ProxyError::ClientDisconnected) => {
                        tracing::debug!(path = %head.original_url, "Client disconnected, upstream aborted");
                    }
                    Err(e) => {
                        // Head already sent, so all that is left is to cut the body short
                        tracing::warn!(path = %head.original_url, error = %e, "Streamed relay aborted");
                    }
                }
                Disposition::Forwarded { keep_alive: false }
            }
        }
    }

    /// Answers a request that could not be forwarded.
    async fn fail(
        &self,
        client: &mut TcpStream,
        head: &RequestHead,
        error: ProxyError,
        keep_alive: bool,
    ) -> Disposition {
        if let ProxyError::ClientDisconnected = error {
            tracing::debug!(path = %head.original_url, "Client disconnected, upstream aborted");
            return Disposition::Forwarded { keep_alive: false };
        }

        tracing::error!(
            method = %head.method,
            path = %head.original_url,
            error = %error,
            "Proxy error"
        );

        let mut response = error_response(&error, &head.original_url);
        response
            .headers
            .insert("Connection", if keep_alive { "keep-alive" } else { "close" });

        match ResponseWriter::new(&response).write_to_stream(client).await {
            Ok(()) => Disposition::Forwarded { keep_alive },
            Err(_) => Disposition::Forwarded { keep_alive: false },
        }
    }
}

/// Resolves once the client has closed its side of the connection.
///
/// With `watch` off, or once the client has sent more bytes, this never
/// resolves: those bytes belong to the next request and must stay unread.
async fn client_closed(client: &TcpStream, watch: bool) {
    if !watch {
        return std::future::pending().await;
    }

    let mut peeked = [0u8; 1];
    match client.peek(&mut peeked).await {
        Ok(0) | Err(_) => {}
        Ok(_) => std::future::pending().await,
    }
}
