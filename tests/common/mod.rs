//! Shared fixtures for the HTTP-level tests

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use roxy::api::{create_router, AppState};
use roxy::config::{ServerConfig, UpstreamConfig};
use roxy::upstream::HttpUpstream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const PROXY_HOST: &str = "proxy.test";

/// A router over a fresh cache directory
pub struct TestApp {
    pub dir: TempDir,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let upstream = HttpUpstream::new(&UpstreamConfig {
            timeout_seconds: 5,
            ..UpstreamConfig::default()
        })
        .unwrap();
        let state = Arc::new(AppState::new(dir.path(), Arc::new(upstream)));
        let server = ServerConfig {
            request_timeout_seconds: 10,
            read_timeout_seconds: 5,
            ..ServerConfig::default()
        };
        let router = create_router(state, &server);
        Self { dir, router }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub async fn request(&self, method: Method, uri: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("host", PROXY_HOST)
            .body(Body::empty())
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.request(Method::GET, uri).await
    }
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

/// Every regular file below `root`
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

/// A JPEG-signed payload of `len` bytes
pub fn jpeg_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];
    data.extend((0..len.saturating_sub(data.len())).map(|i| (i % 251) as u8));
    data
}
