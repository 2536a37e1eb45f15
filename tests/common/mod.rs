#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::extract::{Multipart, Path as AxumPath, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use mp3_transfer::{Storage, Transport, TransportConfig, TransferClient, WriteSink};
use serde_json::json;
use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::task::JoinHandle;
use url::Url;

pub fn client_for(base_url: &str) -> TransferClient {
    let transport = Transport::new(&TransportConfig {
        connect_timeout: Duration::from_secs(5),
        read_timeout: Duration::from_secs(5),
        system_proxy: false,
    })
    .unwrap();
    TransferClient::new(transport, Url::parse(base_url).unwrap()).unwrap()
}

/// A base URL nothing is listening on.
pub fn dead_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

//
// Upload sources
//

/// Reader that counts how often it was closed (dropped). Optionally fails
/// after handing out `fail_after` bytes.
pub struct CountingSource {
    inner: Cursor<Vec<u8>>,
    fail_after: Option<usize>,
    closes: Arc<AtomicUsize>,
}

impl CountingSource {
    pub fn new(content: &[u8]) -> (Self, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = Self {
            inner: Cursor::new(content.to_vec()),
            fail_after: None,
            closes: closes.clone(),
        };
        (source, closes)
    }

    pub fn failing_after(content: &[u8], fail_after: usize) -> (Self, Arc<AtomicUsize>) {
        let (mut source, closes) = Self::new(content);
        source.fail_after = Some(fail_after);
        (source, closes)
    }
}

impl AsyncRead for CountingSource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if let Some(limit) = self.fail_after
            && self.inner.position() as usize >= limit
        {
            return Poll::Ready(Err(std::io::Error::other("source unreadable")));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for CountingSource {
    fn drop(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

//
// Download storage
//

/// What happened to the sinks of a `RecordingStorage`.
#[derive(Default)]
pub struct SinkLog {
    pub opened: AtomicUsize,
    pub commits: AtomicUsize,
    pub aborts: AtomicUsize,
    /// Sinks dropped without commit or abort.
    pub leaked: AtomicUsize,
    pub stored: Mutex<HashMap<String, Vec<u8>>>,
}

impl SinkLog {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn leaked(&self) -> usize {
        self.leaked.load(Ordering::SeqCst)
    }

    /// Every opened sink was closed once, and only once.
    pub fn assert_all_closed_once(&self) {
        assert_eq!(self.opened(), self.commits() + self.aborts());
        assert_eq!(self.leaked(), 0);
    }

    pub fn stored(&self, name: &str) -> Option<Vec<u8>> {
        self.stored.lock().unwrap().get(name).cloned()
    }
}

/// In-memory storage that records every sink's fate.
#[derive(Clone, Default)]
pub struct RecordingStorage {
    pub log: Arc<SinkLog>,
    fail_open: bool,
    fail_write_after: Option<usize>,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub fn failing_write_after(bytes: usize) -> Self {
        Self {
            fail_write_after: Some(bytes),
            ..Self::default()
        }
    }
}

impl Storage for RecordingStorage {
    type Sink = RecordingSink;

    async fn open_sink(&self, name: &str) -> std::io::Result<RecordingSink> {
        if self.fail_open {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "storage is read-only",
            ));
        }
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(RecordingSink {
            name: name.to_string(),
            buf: Vec::new(),
            fail_write_after: self.fail_write_after,
            log: self.log.clone(),
            closed: false,
        })
    }
}

pub struct RecordingSink {
    name: String,
    buf: Vec<u8>,
    fail_write_after: Option<usize>,
    log: Arc<SinkLog>,
    closed: bool,
}

impl AsyncWrite for RecordingSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        assert!(!self.closed, "write after close");
        if let Some(limit) = self.fail_write_after
            && self.buf.len() + data.len() > limit
        {
            return Poll::Ready(Err(std::io::Error::other("no space left on device")));
        }
        self.buf.extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl WriteSink for RecordingSink {
    async fn commit(mut self) -> std::io::Result<String> {
        self.closed = true;
        self.log.commits.fetch_add(1, Ordering::SeqCst);
        let data = std::mem::take(&mut self.buf);
        self.log
            .stored
            .lock()
            .unwrap()
            .insert(self.name.clone(), data);
        Ok(format!("memory://{}", self.name))
    }

    async fn abort(mut self) {
        self.closed = true;
        self.log.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        if !self.closed {
            self.log.leaked.fetch_add(1, Ordering::SeqCst);
        }
    }
}

//
// Test server
//

#[derive(Clone, Debug)]
pub struct StoredFile {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

#[derive(Clone, Default)]
struct ServerState {
    files: Arc<Mutex<HashMap<String, StoredFile>>>,
}

/// In-process stand-in for the tagging server: accepts uploads on
/// `/api/upload` and serves them back from `/api/download/{name}`.
pub struct TestServer {
    handle: JoinHandle<()>,
    addr: SocketAddr,
    state: ServerState,
}

impl TestServer {
    pub async fn start() -> Self {
        let state = ServerState::default();
        let app = Router::new()
            .route("/api/upload", post(upload))
            .route("/api/download/{name}", get(download))
            .route("/api/broken/{len}", get(broken))
            .route("/api/slow", get(slow))
            .route("/api/endless-error", get(endless_error))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            handle,
            addr,
            state,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn stored(&self, name: &str) -> Option<StoredFile> {
        self.state.files.lock().unwrap().get(name).cloned()
    }

    pub fn insert(&self, name: &str, bytes: &[u8]) {
        self.state.files.lock().unwrap().insert(
            name.to_string(),
            StoredFile {
                bytes: Bytes::copy_from_slice(bytes),
                content_type: Some("audio/mpeg".to_string()),
            },
        );
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn upload(State(state): State<ServerState>, mut multipart: Multipart) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_string) else {
            return error(StatusCode::BAD_REQUEST, "No selected file");
        };
        let content_type = field.content_type().map(str::to_string);
        let Ok(bytes) = field.bytes().await else {
            return error(StatusCode::BAD_REQUEST, "Broken upload");
        };

        state.files.lock().unwrap().insert(
            file_name.clone(),
            StoredFile {
                bytes,
                content_type,
            },
        );
        return (
            StatusCode::OK,
            Json(json!({
                "message": format!("Metadata processed for '{file_name}'."),
                "download_url": format!("/api/download/{file_name}"),
            })),
        )
            .into_response();
    }
    error(StatusCode::BAD_REQUEST, "No file part")
}

async fn download(State(state): State<ServerState>, AxumPath(name): AxumPath<String>) -> Response {
    let Some(file) = state.files.lock().unwrap().get(&name).cloned() else {
        return error(StatusCode::NOT_FOUND, "File not found");
    };
    ([(header::CONTENT_TYPE, "audio/mpeg")], file.bytes).into_response()
}

/// Sends `len` bytes, then drops the connection mid-body.
async fn broken(AxumPath(len): AxumPath<usize>) -> Response {
    let chunks = vec![
        Ok(Bytes::from(vec![7u8; len])),
        Err(std::io::Error::other("server crashed")),
    ];
    Body::from_stream(futures::stream::iter(chunks)).into_response()
}

/// Sends one chunk, then never finishes.
async fn slow() -> Response {
    let first = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"ID3"))]);
    let stream = futures::StreamExt::chain(first, futures::stream::pending());
    Body::from_stream(stream).into_response()
}

/// A 500 whose body never ends.
async fn endless_error() -> Response {
    let stream = futures::stream::repeat_with(|| {
        Ok::<_, std::io::Error>(Bytes::from_static(&[b'x'; 1024]))
    });
    (StatusCode::INTERNAL_SERVER_ERROR, Body::from_stream(stream)).into_response()
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
