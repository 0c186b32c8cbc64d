//! devproxy - development forwarding proxy
//!
//! Serves the frontend dev server's HTTP interface and relays API requests
//! to a backend with the request path left exactly as the client sent it.

pub mod config;
pub mod http;
pub mod proxy;
pub mod server;
