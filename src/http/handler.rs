//! The next stage after the proxy.
//!
//! Requests the interceptor does not claim are handed, fully read, to a
//! [`Handler`]. The server holds exactly one, chosen at startup.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use crate::http::mime;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};

/// A boxed future resolving to a [`Response`].
pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = Response> + Send + 'a>>;

/// Serves requests that no forward rule matched.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, req: Request) -> BoxFuture<'_>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'_> {
        Box::pin((self)(req))
    }
}

/// Answers everything with 404.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

impl Handler for NotFound {
    fn call(&self, _req: Request) -> BoxFuture<'_> {
        Box::pin(async { Response::not_found() })
    }
}

/// Serves files below a root directory.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a request path onto the root, rejecting anything that would
    /// climb out of it.
    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let relative = Path::new(request_path.trim_start_matches('/'));
        let mut resolved = self.root.clone();

        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }

        Some(resolved)
    }

    async fn serve(&self, req: Request) -> Response {
        if !matches!(req.method(), Method::GET | Method::HEAD) {
            return Response::method_not_allowed();
        }

        let Some(mut path) = self.resolve(req.path()) else {
            tracing::warn!(path = req.path(), "Rejected path outside static root");
            return ResponseBuilder::new(StatusCode::FORBIDDEN)
                .body(&b"403 Forbidden"[..])
                .build();
        };

        if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            path.push("index.html");
        }

        match tokio::fs::read(&path).await {
            Ok(contents) => ResponseBuilder::new(StatusCode::OK)
                .header("Content-Type", mime::from_path(&path))
                .body(contents)
                .build(),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Static file not served");
                Response::not_found()
            }
        }
    }
}

impl Handler for StaticFiles {
    fn call(&self, req: Request) -> BoxFuture<'_> {
        Box::pin(self.serve(req))
    }
}
