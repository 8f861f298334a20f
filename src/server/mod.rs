//! HTTP surface: viewer page, MJPEG stream, recording control and status

use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::bus::FrameBus;
use crate::capture::CaptureHandle;
use crate::errors::CctvError;
use crate::recording::{Recorder, RecorderStatus};
use crate::stream::{StreamSession, STREAM_CONTENT_TYPE};

const INDEX_HTML: &str = include_str!("index.html");

/// Everything a request handler may touch, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub bus: FrameBus,
    pub recorder: Recorder,
    pub capture: Option<Arc<CaptureHandle>>,
    pub jpeg_quality: u8,
}

impl AppState {
    pub fn new(bus: FrameBus, recorder: Recorder, jpeg_quality: u8) -> Self {
        Self {
            bus,
            recorder,
            capture: None,
            jpeg_quality,
        }
    }

    pub fn with_capture(mut self, capture: Arc<CaptureHandle>) -> Self {
        self.capture = Some(capture);
        self
    }
}

/// Body of `GET /status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub recorder: RecorderStatus,
    pub subscribers: usize,
    pub subscribers_evicted: u64,
    pub frames_captured: u64,
    pub capture_running: bool,
}

#[derive(Debug, Deserialize)]
pub struct RecordParams {
    pub action: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/stream.mjpg", get(stream_mjpeg))
        .route("/record", get(record_control))
        .route("/status", get(status))
        .with_state(state)
}

/// Serve until `shutdown` resolves and every open response has finished.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<(), CctvError>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        log::info!("Serving on http://{}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| CctvError::ServerError(format!("HTTP server failed: {}", e)))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn stream_mjpeg(State(state): State<AppState>) -> Response {
    let session = StreamSession::open(&state.bus, state.jpeg_quality);
    (
        [
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-store, must-revalidate"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(session.into_stream()),
    )
        .into_response()
}

async fn record_control(
    State(state): State<AppState>,
    Query(params): Query<RecordParams>,
) -> Response {
    let recorder = state.recorder.clone();
    match params.action.as_deref() {
        Some("start") => {
            match tokio::task::spawn_blocking(move || recorder.start()).await {
                Ok(Ok(())) => (StatusCode::OK, "Recording started").into_response(),
                Ok(Err(e)) => {
                    log::error!("Could not start recording: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Could not start recording: {}", e),
                    )
                        .into_response()
                }
                Err(e) => internal_error(e),
            }
        }
        Some("stop") => {
            // stop drains the queue and finalizes the chunk; keep it off the runtime
            match tokio::task::spawn_blocking(move || recorder.stop()).await {
                Ok(Ok(chunks)) => (
                    StatusCode::OK,
                    format!("Recording stopped ({} chunks written)", chunks.len()),
                )
                    .into_response(),
                Ok(Err(e)) => {
                    log::error!("Could not stop recording: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Could not stop recording: {}", e),
                    )
                        .into_response()
                }
                Err(e) => internal_error(e),
            }
        }
        other => {
            log::debug!("Rejected record action {:?}", other);
            (
                StatusCode::BAD_REQUEST,
                "Invalid action: expected action=start or action=stop",
            )
                .into_response()
        }
    }
}

async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    let (frames_captured, capture_running) = match &state.capture {
        Some(capture) => (capture.frames_captured(), capture.is_running()),
        None => (state.bus.published(), false),
    };
    Json(StatusReport {
        recorder: state.recorder.status(),
        subscribers: state.bus.subscriber_count(),
        subscribers_evicted: state.bus.evicted(),
        frames_captured,
        capture_running,
    })
}

fn internal_error(e: tokio::task::JoinError) -> Response {
    log::error!("Recorder task failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, "Recorder task failed").into_response()
}
