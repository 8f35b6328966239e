//! Route handler functions for all control endpoints.
//!
//! Each handler extracts parameters via axum extractors, talks to the
//! services in AppState, and returns JSON (or an image/stream for the
//! frame endpoints).

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use axum::Json;
use bytes::Bytes;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use vigil_core::error::VigilError;
use vigil_core::types::{Frame, GateState, IntentReport, KillSwitchState, WatchdogState};
use vigil_guard::GateView;

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Query parameter types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub fps: Option<f64>,
    pub q: Option<u8>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub uptime_secs: u64,
    pub capture: CaptureHealth,
    pub executor_busy: bool,
    pub kill_switch: KillSwitchState,
    pub pending_gates: usize,
}

#[derive(Debug, Serialize)]
pub struct CaptureHealth {
    pub state: WatchdogState,
    pub heartbeat_age_ms: u64,
    pub has_frame: bool,
    pub restarts: u32,
}

#[derive(Debug, Serialize)]
pub struct IntentListResponse {
    pub intents: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct GatesResponse {
    pub gates: Vec<GateView>,
}

#[derive(Debug, Serialize)]
pub struct GateActionResponse {
    pub id: Uuid,
    pub state: GateState,
}

#[derive(Debug, Serialize)]
pub struct BatchGateResponse {
    pub approved: usize,
}

#[derive(Debug, Serialize)]
pub struct KillResponse {
    pub state: KillSwitchState,
}

// =============================================================================
// Health
// =============================================================================

/// GET /health - liveness of the capture service and executor.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let watchdog_state = state.watchdog.state();
    Json(HealthResponse {
        ok: watchdog_state != WatchdogState::Failed,
        uptime_secs: state.start_time.elapsed().as_secs(),
        capture: CaptureHealth {
            state: watchdog_state,
            heartbeat_age_ms: state.heartbeat.age().as_millis() as u64,
            has_frame: state.hub.snapshot().is_some(),
            restarts: state.watchdog.restart_count(),
        },
        executor_busy: state.executor.is_busy(),
        kill_switch: state.kill.state(),
        pending_gates: state.gates.pending_count(),
    })
}

// =============================================================================
// Frames
// =============================================================================

/// GET /snapshot - the most recent frame as a JPEG.
pub async fn snapshot(State(state): State<AppState>) -> Result<Response, ApiError> {
    let frame = state
        .hub
        .snapshot()
        .ok_or_else(|| ApiError::ServiceUnavailable("No frame captured yet".into()))?;

    let jpeg = encode_jpeg(&frame, state.config.capture.jpeg_quality)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut resp = Response::new(Body::from(jpeg));
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    Ok(resp)
}

/// GET /stream?fps=&q= - continuous MJPEG stream of the locked region.
///
/// Rate and quality are clamped to the configured maxima. Each client
/// gets its own hub subscription with a bounded buffer; a slow client
/// loses the oldest frames rather than stalling the producer.
pub async fn stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Response {
    let fps = clamp(
        params.fps.unwrap_or(state.config.capture.fps),
        1.0,
        state.config.capture.max_fps,
    );
    let quality = clamp(params.q.unwrap_or(state.config.capture.jpeg_quality), 30, 85);
    let interval = Duration::from_secs_f64(1.0 / fps);

    let rx = state.hub.subscribe();
    let boundary = "frame";

    let body_stream = stream::unfold(
        (rx, None::<tokio::time::Instant>),
        move |(mut rx, last_emit)| async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => {
                        // Throttle to the client's requested rate.
                        if let Some(last) = last_emit {
                            if last.elapsed() < interval {
                                continue;
                            }
                        }
                        let jpeg = match encode_jpeg(&frame, quality) {
                            Ok(jpeg) => jpeg,
                            Err(_) => continue,
                        };
                        let chunk = mjpeg_chunk(boundary, &jpeg);
                        return Some((
                            Ok::<Bytes, Infallible>(chunk),
                            (rx, Some(tokio::time::Instant::now())),
                        ));
                    }
                    // Lagged behind: the oldest frames were dropped for
                    // us, keep going from the newest.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
                }
            }
        },
    );

    let mut resp = Response::new(Body::from_stream(body_stream));
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("multipart/x-mixed-replace; boundary=frame"),
    );
    resp.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    resp
}

// =============================================================================
// Intents
// =============================================================================

/// GET /intents - names of the registered intents.
pub async fn list_intents(State(state): State<AppState>) -> Json<IntentListResponse> {
    Json(IntentListResponse {
        intents: state.executor.registry().names(),
    })
}

/// POST /intent/{name} - execute an intent with a JSON parameter payload.
///
/// Returns 404 for unknown intents and 409 while another intent is in
/// flight; every execution outcome is a 200 with the full report.
pub async fn post_intent(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<serde_json::Value>>,
) -> Result<Json<IntentReport>, ApiError> {
    let params = body.map(|Json(v)| v).unwrap_or_else(|| serde_json::json!({}));
    let report = state.executor.execute(&name, &params).await?;
    Ok(Json(report))
}

// =============================================================================
// Confirmation gates
// =============================================================================

/// GET /gates - pending confirmation gates.
pub async fn list_gates(State(state): State<AppState>) -> Json<GatesResponse> {
    Json(GatesResponse {
        gates: state.gates.pending(),
    })
}

/// POST /gates/{id}/approve
pub async fn approve_gate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GateActionResponse>, ApiError> {
    if state.gates.state(id).is_none() {
        return Err(ApiError::NotFound(format!("Unknown gate: {}", id)));
    }
    state.gates.approve(id)?;
    Ok(Json(GateActionResponse {
        id,
        state: GateState::Approved,
    }))
}

/// POST /gates/{id}/deny
pub async fn deny_gate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GateActionResponse>, ApiError> {
    if state.gates.state(id).is_none() {
        return Err(ApiError::NotFound(format!("Unknown gate: {}", id)));
    }
    state.gates.deny(id)?;
    Ok(Json(GateActionResponse {
        id,
        state: GateState::Denied,
    }))
}

/// POST /gates/approve_all - batch approval of all pending gates.
pub async fn approve_all_gates(State(state): State<AppState>) -> Json<BatchGateResponse> {
    Json(BatchGateResponse {
        approved: state.gates.approve_all(),
    })
}

// =============================================================================
// Kill switch
// =============================================================================

/// GET /kill
pub async fn kill_state(State(state): State<AppState>) -> Json<KillResponse> {
    Json(KillResponse {
        state: state.kill.state(),
    })
}

/// POST /kill/trigger
pub async fn kill_trigger(State(state): State<AppState>) -> Json<KillResponse> {
    state.kill.trigger();
    Json(KillResponse {
        state: state.kill.state(),
    })
}

/// POST /kill/reset
pub async fn kill_reset(State(state): State<AppState>) -> Json<KillResponse> {
    state.kill.reset();
    Json(KillResponse {
        state: state.kill.state(),
    })
}

// =============================================================================
// Events
// =============================================================================

/// GET /events - SSE feed of domain events.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => serde_json::to_string(&event)
            .ok()
            .map(|json| Ok(Event::default().data(json))),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// =============================================================================
// Helpers
// =============================================================================

fn clamp<T: PartialOrd>(v: T, lo: T, hi: T) -> T {
    if v < lo {
        lo
    } else if v > hi {
        hi
    } else {
        v
    }
}

/// Encode a BGRA frame as JPEG at the given quality.
fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, VigilError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let expected = w * h * 4;
    if frame.pixels.len() < expected {
        return Err(VigilError::Capture(format!(
            "Frame buffer holds {} bytes, expected {}",
            frame.pixels.len(),
            expected
        )));
    }

    // BGRA -> RGB
    let mut rgb = vec![0u8; w * h * 3];
    for i in 0..(w * h) {
        rgb[i * 3] = frame.pixels[i * 4 + 2];
        rgb[i * 3 + 1] = frame.pixels[i * 4 + 1];
        rgb[i * 3 + 2] = frame.pixels[i * 4];
    }

    let img = image::RgbImage::from_raw(frame.width, frame.height, rgb)
        .ok_or_else(|| VigilError::Capture("Invalid RGB buffer".into()))?;

    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode_image(&image::DynamicImage::ImageRgb8(img))
        .map_err(|e| VigilError::Capture(format!("JPEG encode failed: {}", e)))?;

    Ok(out)
}

fn mjpeg_chunk(boundary: &str, jpeg: &[u8]) -> Bytes {
    let mut chunk = Vec::with_capacity(jpeg.len() + 128);
    chunk.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    chunk.extend_from_slice(b"Content-Type: image/jpeg\r\n");
    chunk.extend_from_slice(format!("Content-Length: {}\r\n\r\n", jpeg.len()).as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    Bytes::from(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::types::Rect;

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(5.0, 1.0, 15.0), 5.0);
        assert_eq!(clamp(0.5, 1.0, 15.0), 1.0);
        assert_eq!(clamp(99.0, 1.0, 15.0), 15.0);
        assert_eq!(clamp(20u8, 30, 85), 30);
        assert_eq!(clamp(100u8, 30, 85), 85);
    }

    #[test]
    fn test_encode_jpeg_produces_jpeg_magic() {
        let frame = Frame::new(Rect::new(0, 0, 4, 4), 4, 4, vec![128; 64]);
        let jpeg = encode_jpeg(&frame, 60).unwrap();
        assert!(jpeg.len() > 4);
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]); // SOI marker
    }

    #[test]
    fn test_encode_jpeg_rejects_short_buffer() {
        let frame = Frame::new(Rect::new(0, 0, 100, 100), 100, 100, vec![0; 16]);
        assert!(encode_jpeg(&frame, 60).is_err());
    }

    #[test]
    fn test_mjpeg_chunk_framing() {
        let chunk = mjpeg_chunk("frame", &[1, 2, 3]);
        let text = String::from_utf8_lossy(&chunk);
        assert!(text.starts_with("--frame\r\n"));
        assert!(text.contains("Content-Type: image/jpeg\r\n"));
        assert!(text.contains("Content-Length: 3\r\n\r\n"));
        assert!(chunk.ends_with(b"\r\n"));
    }
}
