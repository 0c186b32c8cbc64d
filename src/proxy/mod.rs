//! Forwarding proxy
//!
//! This module holds the part of the server that relays requests to the
//! backend: rule matching, the upstream forwarder, response header
//! filtering and the two relay strategies.

pub mod error;
pub mod filter;
pub mod interceptor;
pub mod relay;
pub mod rule;
pub mod upstream;

pub use error::ProxyError;
pub use interceptor::{Disposition, Interceptor};
pub use rule::{ForwardRule, PathMatch, RelayStrategy};
pub use upstream::{Forwarder, Upstream};
