//! HTTP protocol implementation.
//!
//! A small HTTP/1.1 server with keep-alive, written directly against tokio
//! sockets so that request-targets and bodies reach the proxy exactly as
//! they were sent.
//!
//! # Architecture
//!
//! - **`connection`**: Per-client state machine; offers every request to the proxy first
//! - **`parser`**: Parses request and response heads from byte buffers
//! - **`body`**: Body framing, chunked decoding and aggregation
//! - **`headers`**: Ordered, case-insensitive header multimap
//! - **`request`**: Request head representation
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes and writes HTTP responses to the client
//! - **`handler`**: The next handler for requests the proxy does not claim
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for the next request head
//!        └──────┬──────┘
//!               │ Head parsed
//!               ▼
//!        ┌──────────────────┐
//!        │   Dispatching    │ ← Interceptor forwards it, or the
//!        └──────┬───────────┘   next handler answers it
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```

pub mod body;
pub mod connection;
pub mod handler;
pub mod headers;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
