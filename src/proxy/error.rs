//! Forwarding failures and the error response the proxy originates.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::http::body::BodyError;
use crate::http::response::{Response, StatusCode};

/// Why a forwarded request did not produce a relayed response.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Connection refused, reset, or the host did not resolve.
    #[error("upstream {addr} is unreachable: {source}")]
    UpstreamUnreachable {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream {addr} did not respond within {after:?}")]
    UpstreamTimeout { addr: String, after: Duration },

    #[error("upstream {addr} sent an invalid response: {reason}")]
    UpstreamProtocol { addr: String, reason: String },

    #[error("client disconnected before the upstream response completed")]
    ClientDisconnected,

    #[error("could not read request body: {0}")]
    ClientBody(#[from] BodyError),
}

impl ProxyError {
    /// Status code of the synthetic response for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ClientBody(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Body of the only response the proxy writes on its own behalf.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody<'a> {
    pub error: &'static str,
    pub message: String,
    pub original_url: &'a str,
}

/// Builds the JSON error response for a failed forward of `original_url`.
///
/// ```
/// # use devproxy::proxy::error::{error_response, ProxyError};
/// let resp = error_response(&ProxyError::ClientDisconnected, "/api/x");
/// assert_eq!(resp.status.as_u16(), 500);
/// ```
pub fn error_response(error: &ProxyError, original_url: &str) -> Response {
    let body = ErrorBody {
        error: "Proxy error",
        message: error.to_string(),
        original_url,
    };

    // Serializing a struct of strings cannot fail; fall back to an empty object anyway
    let json = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());

    Response::json(error.status(), json)
}
