//! Shared fixtures: a scriptable upstream, a running proxy and a raw client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use devproxy::http::body::{BodyReader, Framing, aggregate};
use devproxy::http::handler::{Handler, NotFound};
use devproxy::http::headers::Headers;
use devproxy::http::parser::{ParseError, parse_request_head, parse_response_head};
use devproxy::http::request::{Method, RequestHead};
use devproxy::proxy::rule::default_rules;
use devproxy::proxy::{Forwarder, Interceptor, Upstream};
use devproxy::server::listener::{App, serve};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// A request as the upstream received it.
#[derive(Debug, Clone)]
pub struct Captured {
    pub head: RequestHead,
    pub body: Vec<u8>,
}

/// What the upstream sends back, after an optional delay.
pub struct Reply {
    pub delay: Duration,
    pub raw: Vec<u8>,
}

impl Reply {
    pub fn now(raw: impl Into<Vec<u8>>) -> Self {
        Self {
            delay: Duration::ZERO,
            raw: raw.into(),
        }
    }

    pub fn after(delay: Duration, raw: impl Into<Vec<u8>>) -> Self {
        Self {
            delay,
            raw: raw.into(),
        }
    }
}

/// A plain `200` with a JSON body and Content-Length framing.
pub fn json_reply(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

async fn read_request(stream: &mut TcpStream) -> Option<Captured> {
    let mut buffer = BytesMut::new();
    loop {
        match parse_request_head(&buffer) {
            Ok((head, consumed)) => {
                buffer.advance(consumed);
                let framing = Framing::for_request(&head).ok()?;
                let body = aggregate(BodyReader::new(framing, stream, &mut buffer), usize::MAX)
                    .await
                    .ok()?;
                return Some(Captured {
                    head,
                    body: body.as_bytes().to_vec(),
                });
            }
            Err(ParseError::Incomplete) => {}
            Err(_) => return None,
        }
        if stream.read_buf(&mut buffer).await.ok()? == 0 {
            return None;
        }
    }
}

/// Starts an upstream that answers every request with `respond(request)`
/// and reports each request it received on the returned channel.
pub async fn spawn_upstream<F>(respond: F) -> (SocketAddr, mpsc::UnboundedReceiver<Captured>)
where
    F: Fn(&Captured) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            let respond = Arc::clone(&respond);
            tokio::spawn(async move {
                let Some(captured) = read_request(&mut stream).await else {
                    return;
                };
                let reply = respond(&captured);
                let _ = tx.send(captured);
                tokio::time::sleep(reply.delay).await;
                let _ = stream.write_all(&reply.raw).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// An address nothing is listening on.
pub async fn dead_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn upstream_at(addr: SocketAddr) -> Upstream {
    Upstream::new("127.0.0.1", addr.port())
}

pub fn forwarder() -> Forwarder {
    Forwarder::new(Duration::from_secs(2), Duration::from_secs(5))
}

/// Starts a proxy with the stock rules and the given next handler.
pub async fn spawn_proxy_with(
    upstream: SocketAddr,
    forwarder: Forwarder,
    next: impl Handler,
) -> SocketAddr {
    let interceptor = Interceptor::new(default_rules(&upstream_at(upstream)), forwarder);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, App::new(interceptor, next)));
    addr
}

pub async fn spawn_proxy(upstream: SocketAddr) -> SocketAddr {
    spawn_proxy_with(upstream, forwarder(), NotFound).await
}

#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response body is not JSON")
    }
}

/// Reads one response from `stream`, using `buffer` for leftovers.
pub async fn read_response(stream: &mut TcpStream, buffer: &mut BytesMut) -> RawResponse {
    loop {
        match parse_response_head(&buffer[..]) {
            Ok((head, consumed)) => {
                buffer.advance(consumed);
                let framing = Framing::for_response(&Method::GET, head.status, &head.headers).unwrap();
                let body = aggregate(BodyReader::new(framing, stream, buffer), usize::MAX)
                    .await
                    .unwrap();
                return RawResponse {
                    status: head.status.as_u16(),
                    reason: head.reason,
                    headers: head.headers,
                    body: body.as_bytes().to_vec(),
                };
            }
            Err(ParseError::Incomplete) => {}
            Err(e) => panic!("bad response head: {e:?}"),
        }
        let n = stream.read_buf(buffer).await.unwrap();
        assert!(n > 0, "connection closed before a response head arrived");
    }
}

/// Sends `raw` on a fresh connection and reads one response.
pub async fn exchange(proxy: SocketAddr, raw: &[u8]) -> RawResponse {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut buffer = BytesMut::new();
    tokio::time::timeout(Duration::from_secs(10), read_response(&mut stream, &mut buffer))
        .await
        .expect("proxy did not answer in time")
}

/// Sends `raw` on a fresh connection and returns every byte the proxy
/// wrote until it closed the connection.
pub async fn exchange_bytes(proxy: SocketAddr, raw: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut received))
        .await
        .expect("proxy did not close in time")
        .unwrap();
    received
}
