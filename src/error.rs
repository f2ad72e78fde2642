// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

/// Crate-wide error type. One variant per failure kind the CORE can surface;
/// most are non-fatal at the call site (execution continues, the failure is
/// only reported through status/events) — see each component's docs for
/// which operations treat which variants as fatal.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("camera '{id}' not found")]
    CameraNotFound { id: String },

    #[error("destination '{id}' not found")]
    DestinationNotFound { id: String },

    #[error("timeline '{id}' not found")]
    TimelineNotFound { id: String },

    #[error("execution '{id}' not found")]
    ExecutionNotFound { id: String },

    #[error("relay for camera '{camera_id}' unavailable: {reason}")]
    RelayUnavailable { camera_id: String, reason: String },

    #[error("stream process spawn failed: {0}")]
    SpawnFailed(String),

    #[error("stream process '{stream_id}' exited with status {status}")]
    ExitedNonzero { stream_id: String, status: String },

    #[error("stream process '{stream_id}' unresponsive")]
    Unresponsive { stream_id: String },

    #[error("restart budget exhausted for '{stream_id}'")]
    RestartBudgetExhausted { stream_id: String },

    #[error("camera '{camera_id}' unreachable: {reason}")]
    CameraUnreachable { camera_id: String, reason: String },

    #[error("PTZ preset '{preset_id}' unreachable on camera '{camera_id}': {reason}")]
    PresetUnreachable {
        camera_id: String,
        preset_id: String,
        reason: String,
    },

    #[error("encoder fatal error for execution '{execution_id}': {reason}")]
    EncoderFatal { execution_id: String, reason: String },

    #[error("router already in mode {0}")]
    InvalidModeTransition(String),

    #[error("preview server unhealthy: {0}")]
    PreviewUnhealthy(String),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
