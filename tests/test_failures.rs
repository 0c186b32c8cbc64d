//! Failure surfacing, timeouts and client disconnects.

mod common;

use std::time::{Duration, Instant};

use common::*;
use devproxy::http::handler::NotFound;
use devproxy::proxy::Forwarder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

#[tokio::test]
async fn test_unreachable_upstream_returns_synthetic_error() {
    let upstream = dead_upstream().await;
    let proxy = spawn_proxy(upstream).await;

    let body = r#"{"email":"a@b.com","password":"x"}"#;
    let raw = format!(
        "POST /api/auth/login HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );

    let started = Instant::now();
    let response = exchange(proxy, raw.as_bytes()).await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(response.status, 500);
    assert_eq!(response.headers.get("Content-Type"), Some("application/json"));

    let json = response.json();
    assert_eq!(json["error"], "Proxy error");
    assert_eq!(json["originalUrl"], "/api/auth/login");
    assert!(json["message"].as_str().unwrap().contains("unreachable"));
}

#[tokio::test]
async fn test_synthetic_error_keeps_query_string() {
    let upstream = dead_upstream().await;
    let proxy = spawn_proxy(upstream).await;

    let response = exchange(proxy, b"GET /api/products?page=3 HTTP/1.1\r\nConnection: close\r\n\r\n").await;

    assert_eq!(response.json()["originalUrl"], "/api/products?page=3");
}

#[tokio::test]
async fn test_streamed_route_failure_is_also_reported() {
    let upstream = dead_upstream().await;
    let proxy = spawn_proxy(upstream).await;

    let response = exchange(proxy, b"GET /test HTTP/1.1\r\n\r\n").await;

    assert_eq!(response.status, 500);
    assert_eq!(response.json()["originalUrl"], "/test");
}

#[tokio::test]
async fn test_upstream_is_tried_exactly_once() {
    // Accepts and immediately hangs up, counting connections
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    let (count_tx, mut count_rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let _ = count_tx.send(());
            drop(stream);
        }
    });

    let proxy = spawn_proxy(upstream).await;
    let response = exchange(proxy, b"GET /api/flaky HTTP/1.1\r\nConnection: close\r\n\r\n").await;

    assert_eq!(response.status, 500);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut connections = 0;
    while count_rx.try_recv().is_ok() {
        connections += 1;
    }
    assert_eq!(connections, 1);
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let (upstream, _seen) =
        spawn_upstream(|_| Reply::after(Duration::from_secs(3), json_reply("{}"))).await;
    let forwarder = Forwarder::new(Duration::from_secs(1), Duration::from_millis(200));
    let proxy = spawn_proxy_with(upstream, forwarder, NotFound).await;

    let started = Instant::now();
    let response = exchange(proxy, b"GET /api/slow HTTP/1.1\r\nConnection: close\r\n\r\n").await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(response.status, 500);
    let json = response.json();
    assert_eq!(json["originalUrl"], "/api/slow");
    assert!(json["message"].as_str().unwrap().contains("did not respond"));
}

#[tokio::test]
async fn test_malformed_upstream_response() {
    let (upstream, _seen) = spawn_upstream(|_| Reply::now(&b"SPDY/3 200 OK\r\n\r\n"[..])).await;
    let proxy = spawn_proxy(upstream).await;

    let response = exchange(proxy, b"GET /api/x HTTP/1.1\r\nConnection: close\r\n\r\n").await;

    assert_eq!(response.status, 500);
    assert!(response.json()["message"].as_str().unwrap().contains("invalid response"));
}

#[tokio::test]
async fn test_malformed_chunked_body_is_rejected_before_forwarding() {
    let (upstream, mut seen) = spawn_upstream(|_| Reply::now(json_reply("{}"))).await;
    let proxy = spawn_proxy(upstream).await;

    let raw = b"POST /api/products HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\nabc\r\n0\r\n\r\n";
    let response = exchange(proxy, raw).await;

    assert_eq!(response.status, 400);
    assert_eq!(response.json()["originalUrl"], "/api/products");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(seen.try_recv().is_err());
}

#[tokio::test]
async fn test_malformed_request_head_gets_bad_request() {
    let (upstream, _seen) = spawn_upstream(|_| Reply::now(json_reply("{}"))).await;
    let proxy = spawn_proxy(upstream).await;

    let response = exchange(proxy, b"GE(T /api/pot HTTP/1.1\r\n\r\n").await;

    assert_eq!(response.status, 400);
}

#[tokio::test]
async fn test_unknown_transfer_coding_is_rejected_before_forwarding() {
    let (upstream, mut seen) = spawn_upstream(|_| Reply::now(json_reply("{}"))).await;
    let proxy = spawn_proxy(upstream).await;

    // A body the proxy cannot delimit must not be guessed at, or the bytes
    // after it would be read as a second request
    let smuggled = b"GET /api/smuggled HTTP/1.1\r\nHost: x\r\n\r\n";
    let mut raw = format!(
        "POST /api/a HTTP/1.1\r\nTransfer-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
        smuggled.len()
    )
    .into_bytes();
    raw.extend_from_slice(smuggled);

    let received = exchange_bytes(proxy, &raw).await;
    let text = String::from_utf8_lossy(&received);

    assert!(text.starts_with("HTTP/1.1 400"), "got {text:?}");
    assert_eq!(text.matches("HTTP/1.1 ").count(), 1, "got {text:?}");
    let body_start = received.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    let json: serde_json::Value = serde_json::from_slice(&received[body_start..]).unwrap();
    assert_eq!(json["error"], "Proxy error");
    assert_eq!(json["originalUrl"], "/api/a");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(seen.try_recv().is_err());
}

/// Client disconnects propagate: the proxy drops its upstream connection
/// instead of waiting for a response nobody will read.
#[tokio::test]
async fn test_client_disconnect_aborts_upstream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut scratch = [0u8; 1024];
        let _ = stream.read(&mut scratch).await.unwrap();

        // Never answer; wait to see whether the proxy hangs up
        let mut rest = Vec::new();
        let closed = tokio::time::timeout(Duration::from_secs(3), stream.read_to_end(&mut rest))
            .await
            .is_ok();
        let _ = closed_tx.send(closed);
    });

    let proxy = spawn_proxy(upstream).await;
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(b"GET /api/hang HTTP/1.1\r\n\r\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(client);

    assert!(closed_rx.await.unwrap(), "upstream connection stayed open");
}

#[tokio::test]
async fn test_client_disconnect_during_stream_aborts_upstream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut scratch = [0u8; 1024];
        let _ = stream.read(&mut scratch).await.unwrap();
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n")
            .await
            .unwrap();

        // Keep streaming until writes start failing
        let chunk = vec![b'x'; 16 * 1024];
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut aborted = false;
        while Instant::now() < deadline {
            if stream.write_all(&chunk).await.is_err() {
                aborted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = closed_tx.send(aborted);
    });

    let proxy = spawn_proxy(upstream).await;
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(b"GET /test HTTP/1.1\r\n\r\n").await.unwrap();

    let mut first = [0u8; 64];
    let n = client.read(&mut first).await.unwrap();
    assert!(n > 0);
    drop(client);

    assert!(closed_rx.await.unwrap(), "upstream kept streaming to a closed client");
}
