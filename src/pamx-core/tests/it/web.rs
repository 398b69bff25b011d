//! Router behaviour, exercised without TLS via `tower::ServiceExt::oneshot`.

use std::fs;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use pamx_core::web;

fn content_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("hello.html"), b"<h1>Hello</h1>").unwrap();
    fs::write(dir.path().join("favicon.ico"), [0u8, 0, 1, 0]).unwrap();
    fs::create_dir_all(dir.path().join("css")).unwrap();
    fs::write(dir.path().join("css/site.css"), b"body{}").unwrap();
    dir
}

async fn get(dir: &tempfile::TempDir, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
    let app = web::router(dir.path());
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    (status, content_type, body)
}

#[tokio::test]
async fn test_hello() {
    let dir = content_dir();
    let (status, content_type, body) = get(&dir, "/hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/html"));
    assert_eq!(body, b"<h1>Hello</h1>");
}

#[tokio::test]
async fn test_favicon() {
    let dir = content_dir();
    let (status, content_type, body) = get(&dir, "/favicon.ico").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/x-icon"));
    assert_eq!(body, vec![0u8, 0, 1, 0]);
}

#[tokio::test]
async fn test_static_file() {
    let dir = content_dir();
    let (status, content_type, body) = get(&dir, "/static/css/site.css").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/octet-stream"));
    assert_eq!(body, b"body{}");
}

#[tokio::test]
async fn test_static_traversal_is_not_found() {
    let outer = tempfile::tempdir().unwrap();
    let content = outer.path().join("content");
    fs::create_dir_all(&content).unwrap();
    fs::write(outer.path().join("secret.txt"), b"secret").unwrap();

    let app = web::router(&content);
    for uri in ["/static/../secret.txt", "/static/%2e%2e/secret.txt", "/static/css/../../secret.txt"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }
}

#[tokio::test]
async fn test_missing_and_unknown_paths() {
    let dir = content_dir();
    for uri in ["/static/missing.css", "/static/css", "/", "/index.html", "/hello/again"] {
        let (status, _, _) = get(&dir, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
    }
}

#[tokio::test]
async fn test_hello_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let (status, _, _) = get(&dir, "/hello").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
