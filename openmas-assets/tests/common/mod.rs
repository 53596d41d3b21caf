//! Shared fixtures for the integration tests: a loopback HTTP server and a
//! log capture.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;

pub const CHUNK: usize = 1024;

#[derive(Clone, Default)]
struct ServerState {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    hits: Arc<AtomicUsize>,
}

/// HTTP server on a random localhost port.
///
/// `/files/{name}` streams a registered file in 1 KiB chunks,
/// `/broken/{name}` sends half of it and then aborts the body,
/// `/slow/{name}` pauses between chunks.
pub struct TestServer {
    addr: SocketAddr,
    state: ServerState,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let state = ServerState::default();
        let router = Router::new()
            .route("/files/{name}", get(serve_file))
            .route("/broken/{name}", get(serve_broken))
            .route("/slow/{name}", get(serve_slow))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });
        tokio::spawn(async move {
            server.await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn add_file(&self, name: &str, contents: Vec<u8>) {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(name.to_string(), contents);
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    /// Number of file requests served so far (including failed ones).
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

fn chunked(data: Vec<u8>) -> Vec<Result<Bytes, std::io::Error>> {
    data.chunks(CHUNK)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect()
}

async fn serve_file(State(state): State<ServerState>, Path(name): Path<String>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let Some(data) = state.files.lock().unwrap().get(&name).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let len = data.len();
    Response::builder()
        .status(StatusCode::OK)
        .header("content-length", len)
        .body(Body::from_stream(futures_util::stream::iter(chunked(data))))
        .unwrap()
}

async fn serve_broken(State(state): State<ServerState>, Path(name): Path<String>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let Some(data) = state.files.lock().unwrap().get(&name).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let half = data.len() / 2;
    let mut chunks = chunked(data[..half].to_vec());
    chunks.push(Err(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection dropped",
    )));

    Response::builder()
        .status(StatusCode::OK)
        .body(Body::from_stream(futures_util::stream::iter(chunks)))
        .unwrap()
}

async fn serve_slow(State(state): State<ServerState>, Path(name): Path<String>) -> Response {
    use futures_util::StreamExt;

    state.hits.fetch_add(1, Ordering::SeqCst);
    let Some(data) = state.files.lock().unwrap().get(&name).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let stream = futures_util::stream::iter(chunked(data)).then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        chunk
    });
    Response::builder()
        .status(StatusCode::OK)
        .body(Body::from_stream(stream))
        .unwrap()
}

/// Deterministic, non-repeating-looking payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Collects every log line emitted by the crate under test.
#[derive(Default)]
pub struct CaptureLogger {
    lines: Mutex<Vec<String>>,
}

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("{}", record.args()));
    }

    fn flush(&self) {}
}

impl CaptureLogger {
    /// Lines containing `needle`. Tests run concurrently, so filter by
    /// something unique to the test (a temp dir path, a URL).
    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.contains(needle))
            .cloned()
            .collect()
    }
}

/// Install the capturing logger once per test binary.
pub fn logs() -> &'static CaptureLogger {
    static LOGGER: OnceLock<&'static CaptureLogger> = OnceLock::new();
    LOGGER.get_or_init(|| {
        let logger: &'static CaptureLogger = Box::leak(Box::new(CaptureLogger::default()));
        log::set_logger(logger).unwrap();
        log::set_max_level(log::LevelFilter::Debug);
        logger
    })
}
