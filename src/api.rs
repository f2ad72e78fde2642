// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP API — a thin `axum` surface calling one-to-one into the internal
//! operations named by §6: no auth, no persistence, no asset upload (all
//! external collaborators per §1). It exists so the CORE is exercisable
//! end-to-end the same way the teacher's own `api.rs` exercises its
//! `RecordingManager`.
//!
//! Endpoints:
//!   POST   /api/router/preview/{timeline_id}         → start_preview
//!   POST   /api/router/live                          → go_live (body: [destination_id])
//!   POST   /api/router/stop                          → stop
//!   GET    /api/router/status                        → status
//!   GET    /api/executor/{timeline_id}/position       → playback position
//!   GET    /api/relay/{camera_id}                     → ensure_relay + health
//!   DELETE /api/relay/{camera_id}                     → teardown
//!   GET    /api/supervisor/status/{stream_id}          → process status
//!   POST   /api/supervisor/kill_all                    → kill_all
//!   GET    /api/watchdog/status                        → per-destination snapshot
//!   POST   /api/watchdog/{destination_id}/start|stop|restart
//!   POST   /api/ptz/{camera_id}/goto                   → go_to
//!   POST   /api/ptz/{camera_id}/capture                → capture_preset
//!   POST   /api/timelines                              → register a Timeline
//!   GET    /api/timelines                               → list registered Timelines
//!   POST   /api/assets                                  → register an Asset
//!
//! Timeline/Camera/Destination/Asset CRUD proper lives in the external
//! persistence layer (§1); the routes above exist only so the in-memory
//! registries the CORE resolves cue references against (§3) are reachable
//! without one, the same "input contract, not a store" role the compositor
//! plays toward asset metadata.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::app::Application;
use crate::model::{Asset, CameraId, DestinationId, Timeline, TimelineId};

pub struct AppState {
    pub app: Application,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = match &state.app.config.api.cors_allow_origins {
        Some(_origins) => CorsLayer::permissive(), // parsing specific origins is an HTTP-layer concern
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/api/router/preview/{timeline_id}", post(handle_start_preview))
        .route("/api/router/live", post(handle_go_live))
        .route("/api/router/stop", post(handle_stop))
        .route("/api/router/status", get(handle_router_status))
        .route("/api/executor/{timeline_id}/position", get(handle_position))
        .route("/api/relay/{camera_id}", get(handle_relay_health).delete(handle_relay_teardown))
        .route("/api/supervisor/status/{stream_id}", get(handle_supervisor_status))
        .route("/api/supervisor/kill_all", post(handle_kill_all))
        .route("/api/watchdog/status", get(handle_watchdog_status))
        .route("/api/watchdog/{destination_id}/start", post(handle_watchdog_start))
        .route("/api/watchdog/{destination_id}/stop", post(handle_watchdog_stop))
        .route("/api/watchdog/{destination_id}/restart", post(handle_watchdog_restart))
        .route("/api/ptz/{camera_id}/goto", post(handle_ptz_goto))
        .route("/api/ptz/{camera_id}/capture", post(handle_ptz_capture))
        .route("/api/timelines", post(handle_register_timeline).get(handle_list_timelines))
        .route("/api/assets", post(handle_register_asset))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(state: Arc<AppState>, port: u16) {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    info!(port, "HTTP API listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind HTTP server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "HTTP server error");
    }
}

// ──────────────── response types ───────────────────────────────────────

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn err_response(status: StatusCode, e: impl std::fmt::Display) -> axum::response::Response {
    (status, Json(ErrorResponse { error: e.to_string() })).into_response()
}

#[derive(Serialize)]
struct RouterStatusResponse {
    mode: String,
    timeline_id: Option<String>,
    preview_playback_url: Option<String>,
}

#[derive(Deserialize)]
struct GoLiveRequest {
    destination_ids: Vec<String>,
}

#[derive(Serialize)]
struct PositionResponse {
    position_s: f64,
    loop_count: u64,
}

#[derive(Serialize)]
struct RelayResponse {
    local_url: String,
    healthy: bool,
}

#[derive(Deserialize)]
struct GoToRequest {
    pan: f64,
    tilt: f64,
    zoom: f64,
}

#[derive(Deserialize)]
struct CapturePresetRequest {
    name: String,
}

// ──────────────── router handlers (C6) ─────────────────────────────────

async fn handle_start_preview(
    State(state): State<Arc<AppState>>,
    Path(timeline_id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = uuid::Uuid::parse_str(&timeline_id) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid timeline id");
    };
    match state.app.router.start_preview(TimelineId(id)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err_response(StatusCode::CONFLICT, e),
    }
}

async fn handle_go_live(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GoLiveRequest>,
) -> impl IntoResponse {
    let mut ids = Vec::with_capacity(req.destination_ids.len());
    for raw in &req.destination_ids {
        match uuid::Uuid::parse_str(raw) {
            Ok(u) => ids.push(DestinationId(u)),
            Err(_) => return err_response(StatusCode::BAD_REQUEST, "invalid destination id"),
        }
    }
    match state.app.router.go_live(ids).await {
        Ok(timeline_id) => Json(serde_json::json!({ "timeline_id": timeline_id.to_string() })).into_response(),
        Err(e) => err_response(StatusCode::CONFLICT, e),
    }
}

async fn handle_stop(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.app.router.stop().await;
    StatusCode::OK
}

async fn handle_router_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.app.router.status();
    Json(RouterStatusResponse {
        mode: format!("{:?}", snapshot.mode).to_uppercase(),
        timeline_id: snapshot.timeline_id.map(|id| id.to_string()),
        preview_playback_url: snapshot.preview_playback_url.map(|u| u.to_string()),
    })
}

// ──────────────── executor (C5) ────────────────────────────────────────

async fn handle_position(
    State(state): State<Arc<AppState>>,
    Path(timeline_id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = uuid::Uuid::parse_str(&timeline_id) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid timeline id");
    };
    match state.app.positions.get(&TimelineId(id)) {
        Some(p) => Json(PositionResponse {
            position_s: p.position.as_secs_f64(),
            loop_count: p.loop_count,
        })
        .into_response(),
        None => err_response(StatusCode::NOT_FOUND, "no running execution for this timeline"),
    }
}

// ──────────────── camera relay (C2) ────────────────────────────────────

async fn handle_relay_health(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = uuid::Uuid::parse_str(&camera_id) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid camera id");
    };
    let camera_id = CameraId(id);
    let Some(camera) = state.app.cameras.get(&camera_id) else {
        return err_response(StatusCode::NOT_FOUND, "unknown camera");
    };

    match state.app.relay.health(camera_id) {
        Some(relay) => Json(RelayResponse { local_url: relay.local_url.to_string(), healthy: relay.healthy }).into_response(),
        None => match state.app.relay.ensure_relay(&camera) {
            Ok(relay) => Json(RelayResponse { local_url: relay.local_url.to_string(), healthy: relay.healthy }).into_response(),
            Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e),
        },
    }
}

async fn handle_relay_teardown(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = uuid::Uuid::parse_str(&camera_id) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid camera id");
    };
    match state.app.relay.teardown(CameraId(id)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

// ──────────────── process supervisor (C1) ──────────────────────────────

async fn handle_supervisor_status(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
) -> impl IntoResponse {
    match state.app.supervisor.status(&stream_id) {
        Some(status) => Json(serde_json::json!({
            "stream_id": status.stream_id,
            "state": format!("{:?}", status.state),
            "pid": status.pid,
            "restart_count": status.restart_count,
        }))
        .into_response(),
        None => err_response(StatusCode::NOT_FOUND, "no process tracked for this stream id"),
    }
}

async fn handle_kill_all(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.app.supervisor.kill_all().await;
    StatusCode::OK
}

// ──────────────── watchdog (C8) ────────────────────────────────────────

async fn handle_watchdog_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot: Vec<_> = state
        .app
        .watchdog
        .status()
        .into_iter()
        .map(|(id, health, failures)| {
            serde_json::json!({
                "destination_id": id.to_string(),
                "health": format!("{health:?}"),
                "consecutive_failures": failures,
            })
        })
        .collect();
    Json(snapshot)
}

async fn handle_watchdog_start(State(state): State<Arc<AppState>>, Path(destination_id): Path<String>) -> impl IntoResponse {
    let Ok(id) = uuid::Uuid::parse_str(&destination_id) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid destination id");
    };
    state.app.watchdog.start(DestinationId(id)).await;
    StatusCode::OK.into_response()
}

async fn handle_watchdog_stop(State(state): State<Arc<AppState>>, Path(destination_id): Path<String>) -> impl IntoResponse {
    let Ok(id) = uuid::Uuid::parse_str(&destination_id) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid destination id");
    };
    state.app.watchdog.stop(DestinationId(id)).await;
    StatusCode::OK.into_response()
}

async fn handle_watchdog_restart(State(state): State<Arc<AppState>>, Path(destination_id): Path<String>) -> impl IntoResponse {
    let Ok(id) = uuid::Uuid::parse_str(&destination_id) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid destination id");
    };
    state.app.watchdog.restart(DestinationId(id)).await;
    StatusCode::OK.into_response()
}

// ──────────────── PTZ (C3) ──────────────────────────────────────────────

async fn handle_ptz_goto(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
    Json(req): Json<GoToRequest>,
) -> impl IntoResponse {
    let Ok(id) = uuid::Uuid::parse_str(&camera_id) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid camera id");
    };
    let Some(camera) = state.app.cameras.get(&CameraId(id)) else {
        return err_response(StatusCode::NOT_FOUND, "unknown camera");
    };
    match state.app.ptz.go_to(&camera, req.pan, req.tilt, req.zoom).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err_response(StatusCode::BAD_GATEWAY, e),
    }
}

async fn handle_ptz_capture(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
    Json(req): Json<CapturePresetRequest>,
) -> impl IntoResponse {
    let Ok(id) = uuid::Uuid::parse_str(&camera_id) else {
        return err_response(StatusCode::BAD_REQUEST, "invalid camera id");
    };
    let Some(camera) = state.app.cameras.get(&CameraId(id)) else {
        return err_response(StatusCode::NOT_FOUND, "unknown camera");
    };
    match state.app.ptz.capture_preset(&camera, req.name).await {
        Ok(preset) => {
            state.app.router.presets().insert(preset.id, preset.clone());
            Json(serde_json::json!({
                "id": preset.id.to_string(),
                "pan": preset.pan,
                "tilt": preset.tilt,
                "zoom": preset.zoom,
            }))
            .into_response()
        }
        Err(e) => err_response(StatusCode::BAD_GATEWAY, e),
    }
}

// ──────────────── timelines / assets (referenced by cues, §3) ─────────

async fn handle_register_timeline(
    State(state): State<Arc<AppState>>,
    Json(timeline): Json<Timeline>,
) -> impl IntoResponse {
    let id = timeline.id;
    state.app.router.timelines().insert(id, timeline);
    Json(serde_json::json!({ "id": id.to_string() })).into_response()
}

async fn handle_list_timelines(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ids: Vec<String> = state
        .app
        .router
        .timelines()
        .all()
        .into_iter()
        .map(|t| t.id.to_string())
        .collect();
    Json(ids)
}

async fn handle_register_asset(
    State(state): State<Arc<AppState>>,
    Json(asset): Json<Asset>,
) -> impl IntoResponse {
    let id = asset.id;
    state.app.router.assets().insert(id, asset);
    Json(serde_json::json!({ "id": id.to_string() })).into_response()
}
