use std::collections::{BTreeMap, VecDeque};
use std::future::pending;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::{sleep, Instant};
use url::Url;

use crate::api::ApiError;
use crate::channel::{ChannelConnection, ChannelError, ChannelFrame, ChannelTransport};
use crate::media::{
    DegradedTransport, MediaSession, NegotiationError, RenderSink, RenderTarget,
    SessionNegotiator, TransportError,
};
use crate::poller::PollSource;

#[derive(Debug, Clone, Copy)]
pub enum Script {
    SucceedAfter(Duration),
    FailAfter(Duration),
    Never,
}

/// Flags a negotiation future that was dropped before it finished.
struct CancelProbe {
    finished: bool,
    cancelled: Arc<AtomicBool>,
}

impl Drop for CancelProbe {
    fn drop(&mut self) {
        if !self.finished {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }
}

#[derive(Clone, Default)]
pub struct Probes {
    pub attempts: Arc<AtomicUsize>,
    pub cancelled: Arc<AtomicBool>,
    pub session_closed: Arc<AtomicBool>,
    pub fallback_pulls: Arc<AtomicUsize>,
    pub fallback_started_at: Arc<Mutex<Option<Instant>>>,
}

pub struct MockNegotiator {
    pub script: Script,
    pub probes: Probes,
    pub lose_session_after: Option<Duration>,
}

impl MockNegotiator {
    pub fn new(script: Script, probes: Probes) -> Self {
        Self {
            script,
            probes,
            lose_session_after: None,
        }
    }
}

pub struct MockSession {
    closed: Arc<AtomicBool>,
    lose_after: Option<Duration>,
}

#[async_trait]
impl MediaSession for MockSession {
    async fn closed(&mut self) {
        match self.lose_after {
            Some(after) => sleep(after).await,
            None => pending::<()>().await,
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionNegotiator for MockNegotiator {
    type Session = MockSession;

    async fn negotiate(&mut self, render: RenderSink) -> Result<MockSession, NegotiationError> {
        self.probes.attempts.fetch_add(1, Ordering::SeqCst);
        let mut probe = CancelProbe {
            finished: false,
            cancelled: self.probes.cancelled.clone(),
        };

        let result = match self.script {
            Script::SucceedAfter(after) => {
                sleep(after).await;
                render.send_replace(RenderTarget::RemoteTrack {
                    kind: "video".to_string(),
                    id: "cam".to_string(),
                });
                Ok(MockSession {
                    closed: self.probes.session_closed.clone(),
                    lose_after: self.lose_session_after,
                })
            }
            Script::FailAfter(after) => {
                sleep(after).await;
                Err(NegotiationError::Rejected { status: 404 })
            }
            Script::Never => pending().await,
        };
        probe.finished = true;
        result
    }
}

pub struct MockFallback {
    pub probes: Probes,
    pub end_after: Option<Duration>,
}

#[async_trait]
impl DegradedTransport for MockFallback {
    async fn pull(&mut self, render: RenderSink) -> Result<(), TransportError> {
        self.probes.fallback_pulls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut started) = self.probes.fallback_started_at.lock() {
            *started = Some(Instant::now());
        }
        render.send_replace(RenderTarget::MjpegFrame {
            sequence: 1,
            jpeg: bytes::Bytes::from_static(b"\xff\xd8\xff\xd9"),
        });
        match self.end_after {
            Some(after) => {
                sleep(after).await;
                Err(TransportError::Ended)
            }
            None => pending().await,
        }
    }
}

/// Channel transport whose connections replay scripted frames, then stay
/// open until closed.
#[derive(Clone, Default)]
pub struct ScriptedChannel {
    pub scripts: Arc<Mutex<VecDeque<Result<Vec<ChannelFrame>, String>>>>,
    pub connects: Arc<Mutex<Vec<Instant>>>,
    pub closes: Arc<AtomicUsize>,
}

impl ScriptedChannel {
    pub fn new(scripts: Vec<Result<Vec<ChannelFrame>, String>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into_iter().collect())),
            ..Self::default()
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().map(|c| c.len()).unwrap_or_default()
    }
}

pub struct ScriptedConnection {
    frames: VecDeque<ChannelFrame>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ChannelTransport for ScriptedChannel {
    type Connection = ScriptedConnection;

    async fn connect(&mut self, url: &Url) -> Result<ScriptedConnection, ChannelError> {
        self.connects.lock().expect("connects lock").push(Instant::now());
        let next = self.scripts.lock().expect("scripts lock").pop_front();
        match next {
            Some(Ok(frames)) => Ok(ScriptedConnection {
                frames: frames.into_iter().collect(),
                closes: self.closes.clone(),
            }),
            Some(Err(reason)) => Err(ChannelError::Connect {
                url: url.to_string(),
                reason,
            }),
            // Out of script: accept and idle.
            None => Ok(ScriptedConnection {
                frames: VecDeque::new(),
                closes: self.closes.clone(),
            }),
        }
    }
}

#[async_trait]
impl ChannelConnection for ScriptedConnection {
    async fn next_frame(&mut self) -> Option<ChannelFrame> {
        match self.frames.pop_front() {
            Some(frame) => Some(frame),
            None => pending().await,
        }
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

type Responder<T> = Box<dyn Fn(usize) -> Result<T, ApiError> + Send + Sync>;

/// Poll source answering from a closure keyed by call index, recording when
/// each call happened.
pub struct ScriptedSource<T> {
    pub name: &'static str,
    pub calls: Arc<Mutex<Vec<Instant>>>,
    responder: Responder<T>,
}

impl<T> ScriptedSource<T> {
    pub fn new(
        name: &'static str,
        responder: impl Fn(usize) -> Result<T, ApiError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            calls: Arc::new(Mutex::new(Vec::new())),
            responder: Box::new(responder),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> PollSource for ScriptedSource<T> {
    type Output = T;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self) -> Result<T, ApiError> {
        let index = {
            let mut calls = self.calls.lock().expect("calls lock");
            calls.push(Instant::now());
            calls.len() - 1
        };
        (self.responder)(index)
    }
}

pub fn offsets_ms(calls: &Arc<Mutex<Vec<Instant>>>, start: Instant) -> Vec<u128> {
    calls
        .lock()
        .expect("calls lock")
        .iter()
        .map(|at| at.duration_since(start).as_millis())
        .collect()
}

pub fn stream_status_json(fps: f64) -> serde_json::Value {
    json!({
        "connected": true,
        "fps": fps,
        "width": 1920,
        "height": 1080,
        "reconnect_attempts": 0,
        "last_frame_at": "2026-02-15T10:00:00+00:00",
        "rtsp_url": "rtsp://localhost:8554/cam",
        "error": null
    })
}

pub fn health_json() -> serde_json::Value {
    json!({
        "cpu_percent": 12.5,
        "ram_percent": 40.0,
        "ram_used_gb": 6.3,
        "ram_total_gb": 15.6,
        "gpu_name": null,
        "gpu_percent": null,
        "gpu_memory_percent": null,
        "gpu_temp_c": null,
        "disk_percent": 55.0,
        "disk_used_gb": 120.0,
        "disk_total_gb": 256.0
    })
}

pub const JPEG_A: &[u8] = b"\xff\xd8AAAA\xff\xd9";
pub const JPEG_B: &[u8] = b"\xff\xd8BBBBBB\xff\xd9";

pub fn mjpeg_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = format!(
        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    )
    .into_bytes();
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

type ConfigStore = Arc<Mutex<BTreeMap<String, String>>>;

async fn read_config(State(store): State<ConfigStore>) -> Response {
    let config = store.lock().expect("store lock").clone();
    Json(json!({ "config": config })).into_response()
}

async fn read_config_value(State(store): State<ConfigStore>, Path(key): Path<String>) -> Response {
    match store.lock().expect("store lock").get(&key) {
        Some(value) => Json(json!({ "key": key, "value": value })).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "detail": "not found" }))).into_response(),
    }
}

async fn write_config_value(
    State(store): State<ConfigStore>,
    Path(key): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let value = body
        .get("value")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    store
        .lock()
        .expect("store lock")
        .insert(key.clone(), value.clone());
    Json(json!({ "key": key, "value": value, "updated": true })).into_response()
}

async fn mjpeg() -> Response {
    let mut body = mjpeg_part(JPEG_A);
    body.extend_from_slice(&mjpeg_part(JPEG_B));
    (
        [(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )],
        Body::from(body),
    )
        .into_response()
}

/// In-process stand-in for the appliance backend.
pub async fn spawn_backend() -> SocketAddr {
    let store: ConfigStore = Arc::new(Mutex::new(BTreeMap::from([
        ("rtsp_url".to_string(), "rtsp://localhost:8554/cam".to_string()),
        ("armed".to_string(), "false".to_string()),
    ])));

    let app = Router::new()
        .route("/api/stream/status", get(|| async { Json(stream_status_json(15.0)) }))
        .route("/api/system/health", get(|| async { Json(health_json()) }))
        .route(
            "/api/system/status",
            get(|| async {
                Json(json!({
                    "armed": false,
                    "uptime_seconds": 42.5,
                    "stream": stream_status_json(15.0),
                    "health": health_json()
                }))
            }),
        )
        .route(
            "/api/stream/snapshot",
            get(|| async {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "error": "No frame available" })),
                )
            }),
        )
        .route("/api/stream/mjpeg", get(mjpeg))
        .route("/api/config", get(read_config))
        .route(
            "/api/config/:key",
            get(read_config_value).put(write_config_value),
        )
        .route(
            "/cam/whep",
            axum::routing::post(|| async { StatusCode::NOT_FOUND }),
        )
        .with_state(store);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake backend");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}
