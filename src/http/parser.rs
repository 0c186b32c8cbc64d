use crate::http::headers::{Headers, decode_latin1};
use crate::http::request::{Method, RequestHead, target_path};
use crate::http::response::StatusCode;

/// Largest request or response head accepted before giving up.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    UnsupportedTransferEncoding,
    InvalidStatus,
    HeadTooLarge,
    Incomplete,
}

/// The status line and header block of an upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: StatusCode,
    /// Reason phrase as the upstream sent it, possibly empty
    pub reason: String,
    pub version: String,
    pub headers: Headers,
}

/// Parses a request line and header block from the front of `buf`.
///
/// Returns the head and the number of bytes it occupied. The body, if any,
/// is left in the buffer for the body reader. The request-target is kept
/// byte-for-byte; nothing here decodes or normalizes it. Bytes above 0x7F
/// in the target or in field values are read as ISO-8859-1.
pub fn parse_request_head(buf: &[u8]) -> Result<(RequestHead, usize), ParseError> {
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > MAX_HEAD_SIZE => return Err(ParseError::HeadTooLarge),
        None => return Err(ParseError::Incomplete),
    };

    let head_str = decode_latin1(&buf[..headers_end]);

    let mut lines = head_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split(' ');

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let target = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    if parts.next().is_some() || target.is_empty() || !version.starts_with("HTTP/1.") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;
    let headers = parse_header_lines(lines)?;

    if let Some(cl) = headers.get("Content-Length") {
        cl.trim()
            .parse::<u64>()
            .map_err(|_| ParseError::InvalidContentLength)?;
    }

    let head = RequestHead {
        method,
        path: target_path(target),
        original_url: target.to_string(),
        version: version.to_string(),
        headers,
    };

    Ok((head, headers_end + 4))
}

/// Parses a status line and header block from the front of `buf`.
pub fn parse_response_head(buf: &[u8]) -> Result<(ResponseHead, usize), ParseError> {
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > MAX_HEAD_SIZE => return Err(ParseError::HeadTooLarge),
        None => return Err(ParseError::Incomplete),
    };

    let head_str = decode_latin1(&buf[..headers_end]);

    let mut lines = head_str.split("\r\n");

    // Status line: the reason phrase is optional and may contain spaces
    let status_line = lines.next().ok_or(ParseError::InvalidStatus)?;
    let mut parts = status_line.splitn(3, ' ');

    let version = parts.next().ok_or(ParseError::InvalidStatus)?;
    if !version.starts_with("HTTP/1.") {
        return Err(ParseError::InvalidStatus);
    }

    let status = parts
        .next()
        .filter(|code| code.len() == 3)
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(StatusCode::from_u16)
        .ok_or(ParseError::InvalidStatus)?;

    let reason = parts.next().unwrap_or_default().to_string();
    let headers = parse_header_lines(lines)?;

    Ok((
        ResponseHead {
            status,
            reason,
            version: version.to_string(),
            headers,
        },
        headers_end + 4,
    ))
}

fn parse_header_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;

        // No whitespace is allowed between the field name and the colon
        if key.is_empty() || key.ends_with([' ', '\t']) {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    Ok(headers)
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
