//! Message body framing and aggregation.
//!
//! [`BodyReader`] pulls a single message body off a connection, starting
//! with whatever bytes are already sitting in the connection's read buffer.
//! Chunked bodies are decoded as they go, so callers always see payload
//! bytes only. [`aggregate`] drains a reader into one [`AggregatedBody`].

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::http::headers::Headers;
use crate::http::parser::ParseError;
use crate::http::request::{Method, RequestHead};
use crate::http::response::StatusCode;

/// Longest chunk-size or trailer line accepted.
const MAX_LINE: usize = 4096;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("i/o error while reading body: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed before the body was complete")]
    UnexpectedEof,
    #[error("conflicting or invalid Content-Length")]
    InvalidLength,
    #[error("malformed chunked encoding")]
    InvalidChunk,
    #[error("unsupported transfer coding")]
    UnsupportedCoding,
    #[error("body exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
}

/// How the end of a message body is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body at all.
    Empty,
    /// Exactly this many bytes.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Everything until the peer closes (responses only).
    UntilClose,
}

impl Framing {
    /// Body framing of a request. Requests without a length are empty.
    ///
    /// A `Transfer-Encoding` whose final coding is not `chunked` leaves the
    /// body length unknowable, so the request is refused outright.
    pub fn for_request(head: &RequestHead) -> Result<Self, ParseError> {
        if head.headers.is_chunked() {
            return Ok(Framing::Chunked);
        }
        if head.headers.contains("Transfer-Encoding") {
            return Err(ParseError::UnsupportedTransferEncoding);
        }
        length_framing(&head.headers).map(|len| match len {
            Some(0) | None => Framing::Empty,
            Some(n) => Framing::Length(n),
        })
    }

    /// Body framing of a response to a request made with `method`.
    pub fn for_response(
        method: &Method,
        status: StatusCode,
        headers: &Headers,
    ) -> Result<Self, ParseError> {
        if *method == Method::HEAD
            || status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
        {
            return Ok(Framing::Empty);
        }
        if headers.is_chunked() {
            return Ok(Framing::Chunked);
        }
        // Any other transfer coding runs until the upstream closes
        if headers.contains("Transfer-Encoding") {
            return Ok(Framing::UntilClose);
        }
        length_framing(headers).map(|len| match len {
            Some(0) => Framing::Empty,
            Some(n) => Framing::Length(n),
            None => Framing::UntilClose,
        })
    }
}

fn length_framing(headers: &Headers) -> Result<Option<u64>, ParseError> {
    let mut values = headers.get_all("Content-Length").map(|v| v.trim().parse::<u64>());

    let Some(first) = values.next() else {
        return Ok(None);
    };
    let first = first.map_err(|_| ParseError::InvalidContentLength)?;

    // Repeated Content-Length fields must agree
    for other in values {
        if other.ok() != Some(first) {
            return Err(ParseError::InvalidContentLength);
        }
    }

    Ok(Some(first))
}

#[derive(Debug, Clone, Copy)]
enum State {
    Length(u64),
    ChunkSize,
    ChunkData(u64),
    ChunkDataEnd,
    Trailers,
    UntilClose,
    Done,
}

/// Incremental reader for one message body.
pub struct BodyReader<'a, R> {
    io: &'a mut R,
    buffer: &'a mut BytesMut,
    state: State,
}

impl<'a, R> BodyReader<'a, R>
where
    R: AsyncRead + Unpin,
{
    /// `buffer` holds bytes already read past the head; any bytes past the
    /// end of this body stay in it for the next message.
    pub fn new(framing: Framing, io: &'a mut R, buffer: &'a mut BytesMut) -> Self {
        let state = match framing {
            Framing::Empty => State::Done,
            Framing::Length(n) => State::Length(n),
            Framing::Chunked => State::ChunkSize,
            Framing::UntilClose => State::UntilClose,
        };
        Self { io, buffer, state }
    }

    async fn fill(&mut self) -> Result<usize, BodyError> {
        Ok(self.io.read_buf(&mut *self.buffer).await?)
    }

    async fn fill_or_eof(&mut self) -> Result<(), BodyError> {
        if self.fill().await? == 0 {
            return Err(BodyError::UnexpectedEof);
        }
        Ok(())
    }

    /// Returns the next run of payload bytes, or `None` at the end of the body.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, BodyError> {
        loop {
            match self.state {
                State::Done => return Ok(None),

                State::Length(0) => self.state = State::Done,

                State::Length(remaining) => {
                    if self.buffer.is_empty() {
                        self.fill_or_eof().await?;
                    }
                    let n = take_len(self.buffer.len(), remaining);
                    self.state = State::Length(remaining - n as u64);
                    return Ok(Some(self.buffer.split_to(n).freeze()));
                }

                State::UntilClose => {
                    if self.buffer.is_empty() && self.fill().await? == 0 {
                        self.state = State::Done;
                        return Ok(None);
                    }
                    return Ok(Some(self.buffer.split().freeze()));
                }

                State::ChunkSize => match find_crlf(&self.buffer[..]) {
                    Some(end) => {
                        let size = parse_chunk_size(&self.buffer[..end])?;
                        self.buffer.advance(end + 2);
                        self.state = if size == 0 {
                            State::Trailers
                        } else {
                            State::ChunkData(size)
                        };
                    }
                    None if self.buffer.len() > MAX_LINE => return Err(BodyError::InvalidChunk),
                    None => self.fill_or_eof().await?,
                },

                State::ChunkData(0) => self.state = State::ChunkDataEnd,

                State::ChunkData(remaining) => {
                    if self.buffer.is_empty() {
                        self.fill_or_eof().await?;
                    }
                    let n = take_len(self.buffer.len(), remaining);
                    self.state = State::ChunkData(remaining - n as u64);
                    return Ok(Some(self.buffer.split_to(n).freeze()));
                }

                State::ChunkDataEnd => {
                    if self.buffer.len() < 2 {
                        self.fill_or_eof().await?;
                        continue;
                    }
                    if &self.buffer[..2] != b"\r\n" {
                        return Err(BodyError::InvalidChunk);
                    }
                    self.buffer.advance(2);
                    self.state = State::ChunkSize;
                }

                // Trailer fields are read and dropped
                State::Trailers => match find_crlf(&self.buffer[..]) {
                    Some(end) => {
                        self.buffer.advance(end + 2);
                        if end == 0 {
                            self.state = State::Done;
                        }
                    }
                    None if self.buffer.len() > MAX_LINE => return Err(BodyError::InvalidChunk),
                    None => self.fill_or_eof().await?,
                },
            }
        }
    }
}

fn take_len(available: usize, remaining: u64) -> usize {
    usize::try_from(remaining).map_or(available, |r| available.min(r))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, BodyError> {
    let line = std::str::from_utf8(line).map_err(|_| BodyError::InvalidChunk)?;
    // Chunk extensions after ';' are ignored
    let size = line.split(';').next().unwrap_or_default().trim();
    if size.is_empty() {
        return Err(BodyError::InvalidChunk);
    }
    u64::from_str_radix(size, 16).map_err(|_| BodyError::InvalidChunk)
}

/// A request body collected in full before forwarding.
///
/// Built once, never mutated, consumed once by the forwarder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedBody(Bytes);

impl AggregatedBody {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for AggregatedBody {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

/// Drains `reader` into a single buffer, failing once more than `limit`
/// bytes have arrived.
pub async fn aggregate<R>(
    mut reader: BodyReader<'_, R>,
    limit: usize,
) -> Result<AggregatedBody, BodyError>
where
    R: AsyncRead + Unpin,
{
    let mut collected = BytesMut::new();

    while let Some(chunk) = reader.next_chunk().await? {
        if collected.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge { limit });
        }
        collected.extend_from_slice(&chunk);
    }

    Ok(AggregatedBody(collected.freeze()))
}
