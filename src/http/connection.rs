use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::http::body::{BodyError, BodyReader, Framing, aggregate};
use crate::http::handler::Handler;
use crate::http::parser::{ParseError, parse_request_head};
use crate::http::request::{Method, Request, RequestHead};
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::proxy::interceptor::{Disposition, Interceptor};

pub struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
    state: ConnectionState,
    interceptor: Arc<Interceptor>,
    next: Arc<dyn Handler>,
    max_body: usize,
}

pub enum ConnectionState {
    Reading,
    Dispatching(RequestHead),
    Closed,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        interceptor: Arc<Interceptor>,
        next: Arc<dyn Handler>,
        max_body: usize,
    ) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            state: ConnectionState::Reading,
            interceptor,
            next,
            max_body,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = match self.read_head().await? {
                        Some(head) => ConnectionState::Dispatching(head),
                        None => ConnectionState::Closed,
                    };
                }

                ConnectionState::Dispatching(head) => {
                    let keep_alive = match self
                        .interceptor
                        .intercept(head, &mut self.stream, &mut self.buffer)
                        .await
                    {
                        Disposition::Forwarded { keep_alive } => keep_alive,
                        Disposition::PassThrough(head) => self.pass_through(head).await?,
                    };

                    // go back for the next request on the same connection
                    if keep_alive {
                        self.state = ConnectionState::Reading;
                    }
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        let _ = self.stream.shutdown().await;
        Ok(())
    }

    /// Reads the next request head, or `None` if the client closed the
    /// connection or sent something unparseable.
    pub async fn read_head(&mut self) -> anyhow::Result<Option<RequestHead>> {
        loop {
            // Try parsing whatever we already have
            match parse_request_head(&self.buffer) {
                Ok((head, consumed)) => {
                    let _ = self.buffer.split_to(consumed);
                    return Ok(Some(head));
                }

                Err(ParseError::Incomplete) => {
                    // Need more data → fall through to read
                }

                Err(e) => {
                    tracing::warn!(error = ?e, "Malformed request head");
                    ResponseWriter::new(&Response::bad_request())
                        .write_to_stream(&mut self.stream)
                        .await?;
                    return Ok(None);
                }
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;

            if n == 0 {
                // Client closed connection
                return Ok(None);
            }
        }
    }

    /// Reads the body of a request no rule claimed and hands it to the next
    /// handler. Returns whether the connection stays open.
    async fn pass_through(&mut self, head: RequestHead) -> anyhow::Result<bool> {
        let framing = match Framing::for_request(&head) {
            Ok(framing) => framing,
            Err(_) => {
                ResponseWriter::new(&Response::bad_request())
                    .write_to_stream(&mut self.stream)
                    .await?;
                return Ok(false);
            }
        };

        let body = match aggregate(
            BodyReader::new(framing, &mut self.stream, &mut self.buffer),
            self.max_body,
        )
        .await
        {
            Ok(body) => body,
            Err(BodyError::UnexpectedEof) | Err(BodyError::Io(_)) => return Ok(false),
            Err(e) => {
                tracing::warn!(error = %e, path = %head.original_url, "Rejected request body");
                ResponseWriter::new(&Response::bad_request())
                    .write_to_stream(&mut self.stream)
                    .await?;
                return Ok(false);
            }
        };

        let keep_alive = head.keep_alive();
        let is_head = head.method == Method::HEAD;

        let mut response = self.next.call(Request::new(head, body.into_bytes())).await;
        if !keep_alive {
            response.headers.insert("Connection", "close");
        }

        let mut writer = if is_head {
            ResponseWriter::head_only(&response)
        } else {
            ResponseWriter::new(&response)
        };
        writer.write_to_stream(&mut self.stream).await?;

        Ok(keep_alive)
    }
}
