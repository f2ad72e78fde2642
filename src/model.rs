// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Data model (§3): plain, persistence-agnostic value types shared across
//! the CORE components. Nothing here talks to disk, a database, or the
//! network — that's the job of external collaborators this crate only
//! hands data to.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

newtype_id!(CameraId);
newtype_id!(PresetId);
newtype_id!(DestinationId);
newtype_id!(TimelineId);
newtype_id!(TrackId);
newtype_id!(CueId);
newtype_id!(AssetId);
newtype_id!(ExecutionId);

/// An IP camera the appliance can relay and, if PTZ-capable, steer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub id: CameraId,
    pub name: String,
    /// RTSP (or other ffmpeg-ingestible) source URL.
    pub stream_url: Url,
    /// ONVIF device service endpoint, if this camera supports PTZ.
    pub onvif_url: Option<Url>,
    pub onvif_username: Option<String>,
    pub onvif_password: Option<String>,
}

impl Camera {
    pub fn is_ptz(&self) -> bool {
        self.onvif_url.is_some()
    }
}

/// A captured PTZ position, addressable by cue actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preset {
    pub id: PresetId,
    pub camera_id: CameraId,
    pub name: String,
    pub pan: f64,
    pub tilt: f64,
    pub zoom: f64,
}

/// An outbound RTMP(S) publishing target (a streaming platform ingest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub id: DestinationId,
    pub name: String,
    pub rtmp_url: Url,
    pub profile: EncodingProfile,
    pub watchdog: WatchdogConfig,
}

/// Fixed, enumerated encoding profiles (§4.4) — never a free-form bitrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncodingProfile {
    Res1080p30,
    Res720p30,
    Res480p30,
    Res1080p60,
}

impl EncodingProfile {
    pub fn video_kbps(self) -> u32 {
        match self {
            EncodingProfile::Res1080p30 => 4500,
            EncodingProfile::Res720p30 => 2500,
            EncodingProfile::Res480p30 => 1200,
            EncodingProfile::Res1080p60 => 6000,
        }
    }

    pub fn resolution(self) -> (u32, u32) {
        match self {
            EncodingProfile::Res1080p30 | EncodingProfile::Res1080p60 => (1920, 1080),
            EncodingProfile::Res720p30 => (1280, 720),
            EncodingProfile::Res480p30 => (854, 480),
        }
    }

    pub fn fps(self) -> u32 {
        match self {
            EncodingProfile::Res1080p60 => 60,
            _ => 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_watchdog_enabled")]
    pub enabled: bool,
    #[serde(default = "default_check_interval_s")]
    pub check_interval_s: u64,
    #[serde(default = "default_failure_threshold")]
    pub consecutive_failure_threshold: u32,
    /// Optional remote "is this destination actually receiving video"
    /// check, e.g. the platform's public viewer/status URL.
    pub live_verification_url: Option<Url>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: default_watchdog_enabled(),
            check_interval_s: default_check_interval_s(),
            consecutive_failure_threshold: default_failure_threshold(),
            live_verification_url: None,
        }
    }
}

fn default_watchdog_enabled() -> bool {
    true
}
fn default_check_interval_s() -> u64 {
    30
}
fn default_failure_threshold() -> u32 {
    3
}

/// A visual asset (image or video clip) an overlay cue can reference.
/// `asset_id` is the stable logical identifier cues reference; `path` is
/// where it currently lives on disk, resolved by an external asset store —
/// the two are kept distinct so a cue never embeds a filesystem path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub kind: AssetKind,
    pub path: std::path::PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetKind {
    Image,
    Video,
}

/// Normalized [0,1] overlay geometry; one dimension is derived to preserve
/// the asset's native aspect ratio.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Geometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: Option<f64>,
}

/// A tagged cue action — never a dynamic/free-form action map (§9). Per
/// §3's data model, a video-track cue is always `show_camera`, optionally
/// carrying a preset to pre-position to before the camera becomes visible —
/// there is no separate "move" action, since a preset with nothing to show
/// afterward would be meaningless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CueAction {
    ShowCamera {
        camera_id: CameraId,
        #[serde(default)]
        preset_id: Option<PresetId>,
    },
    ShowOverlay {
        asset_id: AssetId,
        geometry: Geometry,
    },
    HideOverlay {
        asset_id: AssetId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cue {
    pub id: CueId,
    pub track_id: TrackId,
    pub start_offset: Duration,
    pub duration: Duration,
    pub action: CueAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    Video,
    Overlay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub kind: TrackKind,
    /// Stacking order for simultaneous overlay entry tie-breaks; ignored
    /// for the (singular) video track.
    pub layer: u32,
    pub cues: Vec<Cue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    pub id: TimelineId,
    pub name: String,
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub looped: bool,
    pub destinations: Vec<DestinationId>,
}

impl Timeline {
    /// Total duration spanned by the furthest cue across every track.
    pub fn duration(&self) -> Duration {
        self.tracks
            .iter()
            .flat_map(|t| t.cues.iter())
            .map(|c| c.start_offset + c.duration)
            .max()
            .unwrap_or_default()
    }

    /// Enforces §3's per-track cue invariant: cues are ordered by
    /// `start_time_s`, `[start, start+duration)` never overlaps another
    /// cue on the same track, and every cue lies within `[0, duration]`
    /// (§8 testable property 2). A zero-duration timeline is also
    /// rejected here (`config_invalid`, §7/§8).
    pub fn validate(&self) -> std::result::Result<(), String> {
        let total = self.duration();
        if total.is_zero() {
            return Err("timeline has zero duration".into());
        }

        for track in &self.tracks {
            let mut sorted: Vec<&Cue> = track.cues.iter().collect();
            sorted.sort_by_key(|c| c.start_offset);

            let mut cursor = Duration::ZERO;
            for cue in sorted {
                if cue.duration.is_zero() {
                    return Err(format!("cue '{}' has zero duration", cue.id));
                }
                let end = cue.start_offset + cue.duration;
                if end > total {
                    return Err(format!("cue '{}' extends past timeline duration", cue.id));
                }
                if cue.start_offset < cursor {
                    return Err(format!(
                        "cue '{}' on track '{}' overlaps the previous cue",
                        cue.id, track.id
                    ));
                }
                cursor = end;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub timeline_id: TimelineId,
    pub state: ExecutionState,
    pub loop_count: u64,
    pub started_at: Option<DateTime<Utc>>,
}

/// Published at ≥2Hz by the owning [`crate::executor`] task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlaybackPosition {
    pub execution_id: ExecutionId,
    pub position: Duration,
    pub loop_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamProcessState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// A single supervised ffmpeg invocation, owned by [`crate::supervisor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamProcess {
    pub stream_id: String,
    pub state: StreamProcessState,
    pub restart_count: u32,
    pub pid: Option<u32>,
}

/// A camera's always-on (or on-demand) local RTMP relay, owned by
/// [`crate::relay`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraRelay {
    pub camera_id: CameraId,
    pub local_url: Url,
    pub healthy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RouterMode {
    #[default]
    Idle,
    Preview,
    Live,
}
