//! HTTPS content server started after the integrity gate.
//!
//! Three routes, all read from a single content directory:
//!
//! | Route                  | File                          | Content-Type               |
//! |------------------------|-------------------------------|----------------------------|
//! | `GET /hello`           | `<root>/hello.html`           | `text/html`                |
//! | `GET /favicon.ico`     | `<root>/favicon.ico`          | `image/x-icon`             |
//! | `GET /static/<path>`   | `<root>/<path>`               | `application/octet-stream` |
//!
//! Anything else, missing files, and static paths resolving outside the
//! content root answer 404.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path as UrlPath, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tracing::{debug, info, warn};

use crate::error::GateError;

#[derive(Debug)]
struct ContentRoot {
    root: PathBuf,
}

/// Router serving files from `content_root`.
pub fn router(content_root: impl Into<PathBuf>) -> Router {
    let state = Arc::new(ContentRoot {
        root: content_root.into(),
    });

    Router::new()
        .route("/hello", get(hello))
        .route("/favicon.ico", get(favicon))
        .route("/static/{*path}", get(static_file))
        .fallback(not_found)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Serve `app` over TLS on `addr` until Ctrl-C.
///
/// In-flight requests get `grace` to complete after the signal.
pub async fn serve(
    addr: SocketAddr,
    app: Router,
    tls: Arc<rustls::ServerConfig>,
    grace: Duration,
) -> Result<(), GateError> {
    let handle = Handle::new();
    tokio::spawn(shutdown_on_ctrl_c(handle.clone(), grace));

    info!(addr = %addr, "starting HTTPS server on https://{}", addr);
    axum_server::bind_rustls(addr, RustlsConfig::from_config(tls))
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .map_err(|e| GateError::server(format!("HTTPS listener on {} failed: {}", addr, e)))?;

    info!("HTTPS server stopped");
    Ok(())
}

async fn shutdown_on_ctrl_c(handle: Handle, grace: Duration) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C; shutdown only by termination");
        return;
    }
    info!(grace_secs = grace.as_secs(), "server shutdown requested by user");
    handle.graceful_shutdown(Some(grace));
}

async fn hello(State(content): State<Arc<ContentRoot>>) -> Response {
    serve_file(&content.root.join("hello.html"), "text/html").await
}

async fn favicon(State(content): State<Arc<ContentRoot>>) -> Response {
    serve_file(&content.root.join("favicon.ico"), "image/x-icon").await
}

async fn static_file(
    State(content): State<Arc<ContentRoot>>,
    UrlPath(rel_path): UrlPath<String>,
) -> Response {
    match resolve_static(&content.root, &rel_path).await {
        Some(path) => serve_file(&path, "application/octet-stream").await,
        None => {
            warn!(path = %rel_path, "static file not found or outside content directory");
            not_found().await
        },
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

/// Resolve `rel_path` below `root`, refusing anything that leaves it.
///
/// Lexical `..`/absolute components are rejected outright; symlinks are
/// caught by comparing canonical paths.
async fn resolve_static(root: &Path, rel_path: &str) -> Option<PathBuf> {
    let rel = Path::new(rel_path.trim_start_matches('/'));
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }

    let root = tokio::fs::canonicalize(root).await.ok()?;
    let candidate = tokio::fs::canonicalize(root.join(rel)).await.ok()?;
    candidate.starts_with(&root).then_some(candidate)
}

async fn serve_file(path: &Path, content_type: &'static str) -> Response {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {},
        _ => {
            warn!(path = %path.display(), "file not found");
            return (StatusCode::NOT_FOUND, "File Not Found").into_response();
        },
    }

    match tokio::fs::read(path).await {
        Ok(content) => {
            debug!(path = %path.display(), bytes = content.len(), "served file");
            ([(header::CONTENT_TYPE, content_type)], content).into_response()
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read file");
            (StatusCode::NOT_FOUND, "File Not Found").into_response()
        },
    }
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}
