use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

use crate::config::Config;
use crate::http::connection::Connection;
use crate::http::handler::{Handler, NotFound, StaticFiles};
use crate::proxy::interceptor::Interceptor;

/// Everything a connection needs, built once from the configuration.
#[derive(Clone)]
pub struct App {
    pub interceptor: Arc<Interceptor>,
    pub next: Arc<dyn Handler>,
    pub max_body: usize,
}

impl App {
    pub fn new(interceptor: Interceptor, next: impl Handler) -> Self {
        Self {
            interceptor: Arc::new(interceptor),
            next: Arc::new(next),
            max_body: crate::proxy::interceptor::DEFAULT_MAX_BODY,
        }
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let interceptor = Interceptor::new(cfg.forward_rules()?, cfg.forwarder())
            .with_body_limit(cfg.max_body_bytes);

        let next: Arc<dyn Handler> = match &cfg.static_dir {
            Some(dir) => Arc::new(StaticFiles::new(dir)),
            None => Arc::new(NotFound),
        };

        Ok(Self {
            interceptor: Arc::new(interceptor),
            next,
            max_body: cfg.max_body_bytes,
        })
    }
}

pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let app = App::from_config(cfg)?;

    let listener = TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.listen_addr))?;
    info!("Listening on {}", cfg.listen_addr);

    for rule in app.interceptor.rules() {
        info!(
            path = %rule.matcher,
            upstream = %rule.upstream,
            strategy = %rule.strategy,
            "Forward rule"
        );
    }

    serve(listener, app).await
}

/// Pause after a failed accept, so a full descriptor table is not spun on.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts connections forever, one task per connection.
pub async fn serve(listener: TcpListener, app: App) -> anyhow::Result<()> {
    let listener = &listener;
    accept_loop(move || listener.accept(), app).await
}

/// A failed accept affects only the connection being accepted; the loop
/// logs it and keeps going.
async fn accept_loop<F, Fut>(mut accept: F, app: App) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<(TcpStream, SocketAddr)>>,
{
    loop {
        let (socket, peer) = match accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        tracing::debug!("Accepted connection from {}", peer);

        let app = app.clone();
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, app.interceptor, app.next, app.max_body);
            if let Err(e) = conn.run().await {
                tracing::warn!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
