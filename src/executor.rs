// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Timeline Executor (C5): one supervised worker task per active timeline,
//! driving cue entry/exit, publishing playback position, and rebuilding
//! the encoder invocation at every cue boundary.
//!
//! Shaped like the teacher's `CameraWorker` (`src/ingestion.rs`): an owning
//! task with an inbox (`mpsc::Sender<ExecutorCommand>`) rather than fields
//! mutated from other tasks, a `tokio::select!` between "next thing to do"
//! and "deadline", and idempotent stop.

use std::collections::BinaryHeap;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::compositor::{ExecutionPlan, OverlayCompositorBuilder, VisibleOverlay};
use crate::events::{CoreEvent, EventBus, PositionStore};
use crate::model::{
    Asset, AssetId, Camera, CueAction, EncodingProfile, Execution, ExecutionId, ExecutionState,
    PlaybackPosition, Preset, PresetId, Timeline, TimelineId, TrackKind,
};
use crate::ptz::PtzController;
use crate::registry::Registry;
use crate::relay::CameraRelayManager;
use crate::supervisor::ProcessSupervisor;

pub type AssetRegistry = Registry<AssetId, Asset>;
pub type PresetRegistry = Registry<PresetId, Preset>;

/// How often to re-check relay health while a cue waits for it to become
/// healthy at cue entry (§4.2/§7), independent of the probe loop's own
/// 3s cadence — short enough not to blow past `cue_prepare_timeout_ms`.
const RELAY_WAIT_POLL: Duration = Duration::from_millis(200);

pub enum ExecutorCommand {
    Stop { reason: String },
}

/// Minimum gap observed between the end of one video cue and the start of
/// the next is expected to fall in this range (§4.5) — not enforced, just
/// documented, since it falls out naturally from sequential cue playback.
pub const VISIBLE_BOUNDARY_GAP: (Duration, Duration) =
    (Duration::from_secs(2), Duration::from_secs(5));

const POSITION_PUBLISH_INTERVAL: Duration = Duration::from_millis(500); // >= 2Hz

/// Grace period for the encoder stop half of a cue-boundary transition
/// (§4.5 step 4: "stops the current process (grace 3 s)").
const CUE_TRANSITION_STOP_GRACE_MS: u64 = 3000;

struct ScheduledEntry {
    fire_at: Duration,
    track_layer: u32,
    track_index: usize,
    cue_index: usize,
    is_entry: bool,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at
    }
}
impl Eq for ScheduledEntry {}
impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest fire_at pops
        // first, tie-broken by (layer, track_index) ascending (§4.5).
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.track_layer.cmp(&self.track_layer))
            .then_with(|| other.track_index.cmp(&self.track_index))
    }
}

pub struct TimelineExecutor {
    pub execution_id: ExecutionId,
    pub timeline_id: TimelineId,
    inbox: mpsc::Sender<ExecutorCommand>,
    state: Arc<RwLock<Execution>>,
    pub handle: JoinHandle<()>,
}

impl TimelineExecutor {
    /// Spawn the executor for `timeline`, publishing to `output_urls` at
    /// `profile`, driving `cameras` through `relay`/`ptz`/`supervisor`.
    /// Returns immediately; the execution transitions
    /// `idle -> starting -> running` inside the spawned task. This is
    /// `start(timeline_id, output_urls[])` (§4.5) — callers (the router)
    /// resolve destinations/preview URL to `output_urls` before calling.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        timeline: Timeline,
        cameras: Vec<Camera>,
        assets: AssetRegistry,
        presets: PresetRegistry,
        output_urls: Vec<url::Url>,
        profile: EncodingProfile,
        relay: CameraRelayManager,
        ptz: PtzController,
        supervisor: ProcessSupervisor,
        events: EventBus,
        positions: PositionStore,
    ) -> Self {
        let execution_id = ExecutionId::new();
        let timeline_id = timeline.id;
        let (inbox_tx, inbox_rx) = mpsc::channel(16);
        let state = Arc::new(RwLock::new(Execution {
            id: execution_id,
            timeline_id,
            state: ExecutionState::Starting,
            loop_count: 0,
            started_at: None,
        }));

        let handle = tokio::spawn(run(
            execution_id,
            timeline,
            cameras,
            assets,
            presets,
            output_urls,
            profile,
            relay,
            ptz,
            supervisor,
            events,
            positions,
            inbox_rx,
            state.clone(),
        ));

        Self { execution_id, timeline_id, inbox: inbox_tx, state, handle }
    }

    /// Idempotent: stopping an executor that has already stopped (or is in
    /// the middle of stopping) is a no-op rather than an error.
    pub async fn stop(&self, reason: impl Into<String>) {
        let _ = self.inbox.send(ExecutorCommand::Stop { reason: reason.into() }).await;
    }

    pub fn status(&self) -> Execution {
        self.state.read().clone()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    execution_id: ExecutionId,
    timeline: Timeline,
    cameras: Vec<Camera>,
    assets: AssetRegistry,
    presets: PresetRegistry,
    output_urls: Vec<url::Url>,
    profile: EncodingProfile,
    relay: CameraRelayManager,
    ptz: PtzController,
    supervisor: ProcessSupervisor,
    events: EventBus,
    positions: PositionStore,
    mut inbox: mpsc::Receiver<ExecutorCommand>,
    state: Arc<RwLock<Execution>>,
) {
    state.write().started_at = Some(chrono::Utc::now());

    events.publish(CoreEvent::ExecutionStarted { execution_id, timeline_id: timeline.id });
    info!(execution = %execution_id, timeline = %timeline.id, "execution starting");

    // At most one video cue may be active at a time (§8). The video track
    // is expected to be the first track; overlay tracks run in parallel
    // but are each internally sequential.
    let total_duration = timeline.duration();
    if total_duration.is_zero() {
        warn!(execution = %execution_id, "timeline has no cues, completing immediately");
        state.write().state = ExecutionState::Completed;
        events.publish(CoreEvent::ExecutionStopped { execution_id, reason: "empty timeline".into() });
        return;
    }

    let stream_id = format!("exec-{execution_id}");

    state.write().state = ExecutionState::Running;
    // Loop-relative wall clock: reset at every loop boundary so published
    // position resets to 0 and loop-local schedule entries fire against the
    // right origin (§8: "on loop boundary it resets to 0").
    let mut loop_start = Instant::now();
    let mut loop_count: u64 = 0;
    let mut active_camera: Option<Camera> = None;
    let mut visible_overlays: Vec<VisibleOverlay> = Vec::new();
    let mut last_publish = Instant::now();
    let mut encoder_started = false;

    let mut schedule = build_schedule(&timeline);

    loop {
        let elapsed = loop_start.elapsed();

        tokio::select! {
            cmd = inbox.recv() => {
                let reason = match cmd {
                    Some(ExecutorCommand::Stop { reason }) => reason,
                    None => "inbox closed".to_string(),
                };
                state.write().state = ExecutionState::Stopping;
                stop_execution(&supervisor, &events, execution_id, &stream_id, &positions, timeline.id, &reason).await;
                state.write().state = ExecutionState::Stopped;
                break;
            }
            _ = tokio::time::sleep(POSITION_PUBLISH_INTERVAL) => {
                if last_publish.elapsed() >= POSITION_PUBLISH_INTERVAL {
                    positions.publish(timeline.id, PlaybackPosition {
                        execution_id,
                        position: elapsed,
                        loop_count,
                    });
                    last_publish = Instant::now();
                }

                // Fire any schedule entries whose time has come. Real-clock
                // backpressure: if we're behind, we resume at the current
                // real time rather than replaying skipped entries (§4.5) —
                // entries strictly in the past relative to `elapsed` but
                // not yet fired are fired once, immediately, in order. Any
                // entry firing is a cue boundary, so it forces an encoder
                // transition below.
                let mut boundary_crossed = false;
                while let Some(top) = schedule.peek() {
                    if top.fire_at > elapsed {
                        break;
                    }
                    let entry = schedule.pop().unwrap();
                    apply_schedule_entry(
                        &timeline, &entry, &cameras, &assets, &presets, &ptz, &relay,
                        &mut active_camera, &mut visible_overlays, &events, execution_id,
                    ).await;
                    boundary_crossed = true;
                }

                if elapsed >= total_duration {
                    if timeline.looped {
                        loop_count += 1;
                        state.write().loop_count = loop_count;
                        schedule = build_schedule(&timeline);
                        loop_start = Instant::now();
                        active_camera = None;
                        visible_overlays.clear();
                        boundary_crossed = true;
                    } else {
                        stop_execution(&supervisor, &events, execution_id, &stream_id, &positions, timeline.id, "completed").await;
                        state.write().state = ExecutionState::Completed;
                        break;
                    }
                }

                let relay_url = match &active_camera {
                    Some(cam) => relay.health(cam.id).filter(|h| h.healthy).map(|h| h.local_url),
                    None => None,
                };
                let plan = ExecutionPlan {
                    stream_id: stream_id.clone(),
                    active_camera_relay_url: relay_url,
                    overlays: visible_overlays.clone(),
                    profile,
                    destination_urls: output_urls.clone(),
                };
                let invocation = OverlayCompositorBuilder::build(&plan);

                // §4.5 step 4: a cue boundary transitions the encoder —
                // stop the running process (grace 3s) and start the one
                // reflecting the new camera/overlay set. Off a boundary,
                // `start` is a no-op if the stream is already running, but
                // re-creates it if the watchdog (§4.8) or C1's own restart
                // policy tore it down underneath us.
                if boundary_crossed && encoder_started {
                    let _ = supervisor.stop_with_grace(&stream_id, CUE_TRANSITION_STOP_GRACE_MS).await;
                }
                if let Err(e) = supervisor.start(invocation) {
                    warn!(execution = %execution_id, error = %e, "failed to (re)start encoder invocation");
                } else {
                    encoder_started = true;
                }
            }
        }
    }
}

async fn stop_execution(
    supervisor: &ProcessSupervisor,
    events: &EventBus,
    execution_id: ExecutionId,
    stream_id: &str,
    positions: &PositionStore,
    timeline_id: TimelineId,
    reason: &str,
) {
    let _ = supervisor.stop(stream_id).await;
    positions.clear(&timeline_id);
    events.publish(CoreEvent::ExecutionStopped { execution_id, reason: reason.to_string() });
    info!(execution = %execution_id, reason, "execution stopped");
}


fn build_schedule(timeline: &Timeline) -> BinaryHeap<ScheduledEntry> {
    let mut heap = BinaryHeap::new();
    for (track_index, track) in timeline.tracks.iter().enumerate() {
        for (cue_index, cue) in track.cues.iter().enumerate() {
            heap.push(ScheduledEntry {
                fire_at: cue.start_offset,
                track_layer: track.layer,
                track_index,
                cue_index,
                is_entry: true,
            });
            heap.push(ScheduledEntry {
                fire_at: cue.start_offset + cue.duration,
                track_layer: track.layer,
                track_index,
                cue_index,
                is_entry: false,
            });
        }
    }
    heap
}

#[allow(clippy::too_many_arguments)]
async fn apply_schedule_entry(
    timeline: &Timeline,
    entry: &ScheduledEntry,
    cameras: &[Camera],
    assets: &AssetRegistry,
    presets: &PresetRegistry,
    ptz: &PtzController,
    relay: &CameraRelayManager,
    active_camera: &mut Option<Camera>,
    visible_overlays: &mut Vec<VisibleOverlay>,
    events: &EventBus,
    execution_id: ExecutionId,
) {
    let track = &timeline.tracks[entry.track_index];
    let cue = &track.cues[entry.cue_index];

    if entry.is_entry {
        events.publish(CoreEvent::CueEntered { execution_id, track_id: track.id, cue_id: cue.id });
    }

    match (&cue.action, track.kind, entry.is_entry) {
        (CueAction::ShowCamera { camera_id, preset_id }, TrackKind::Video, true) => {
            let Some(cam) = cameras.iter().find(|c| &c.id == camera_id).cloned() else {
                warn!(camera = %camera_id, "cue references unknown camera");
                *active_camera = None;
                return;
            };

            // Step 1 (§4.5): pre-position PTZ, if named, and wait to settle.
            // Failure here never fails the cue — it's logged and surfaced
            // on the event bus, and the cue proceeds with whatever position
            // the camera currently has (§4.3, §7 `preset_unreachable`).
            if let Some(preset_id) = preset_id {
                match presets.get(preset_id) {
                    Some(preset) => {
                        if let Err(e) = ptz.move_to_preset(&cam, &preset).await {
                            warn!(camera = %camera_id, preset = %preset_id, error = %e, "preset unreachable");
                            events.publish(CoreEvent::PresetUnreachable {
                                execution_id,
                                camera_id: cam.id,
                                preset_id: *preset_id,
                            });
                        }
                    }
                    None => {
                        warn!(camera = %camera_id, preset = %preset_id, "cue references unknown preset");
                        events.publish(CoreEvent::PresetUnreachable {
                            execution_id,
                            camera_id: cam.id,
                            preset_id: *preset_id,
                        });
                    }
                }
            }

            // Step 2 (§4.2/§7): wait up to `cue_prepare_timeout_ms` for the
            // relay to be healthy before entering; `camera_unreachable`
            // otherwise (the compositor falls back to a black fill, but the
            // video cue still "enters" — overlays stay live).
            let deadline = Instant::now() + relay.cue_prepare_timeout();
            loop {
                if relay.health(cam.id).map(|r| r.healthy).unwrap_or(false) {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(camera = %camera_id, "camera unreachable at cue entry");
                    events.publish(CoreEvent::CameraUnreachable { execution_id, camera_id: cam.id });
                    break;
                }
                tokio::time::sleep(RELAY_WAIT_POLL).await;
            }

            *active_camera = Some(cam);
        }
        // Entering the cue makes the overlay visible; it stays up until
        // either this same cue exits or an explicit HideOverlay cue names
        // the same asset (§3: Asset).
        (CueAction::ShowOverlay { asset_id, geometry }, TrackKind::Overlay, true) => {
            if let Some(asset) = assets.get(asset_id) {
                visible_overlays.push(VisibleOverlay {
                    asset_id: *asset_id,
                    asset_path: asset.path.clone(),
                    asset_kind: asset.kind,
                    geometry: *geometry,
                });
            } else {
                warn!(asset = %asset_id, "overlay cue references unknown asset, skipping");
            }
        }
        (CueAction::ShowOverlay { asset_id, .. }, TrackKind::Overlay, false) => {
            visible_overlays.retain(|o| &o.asset_id != asset_id);
        }
        (CueAction::HideOverlay { asset_id }, TrackKind::Overlay, true) => {
            visible_overlays.retain(|o| &o.asset_id != asset_id);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::time::Duration as StdDuration;

    fn sample_timeline() -> Timeline {
        let cam_id = CameraId::new();
        Timeline {
            id: TimelineId::new(),
            name: "t".into(),
            looped: false,
            destinations: vec![],
            tracks: vec![Track {
                id: TrackId::new(),
                kind: TrackKind::Video,
                layer: 0,
                cues: vec![Cue {
                    id: CueId::new(),
                    track_id: TrackId::new(),
                    start_offset: StdDuration::from_secs(0),
                    duration: StdDuration::from_secs(2),
                    action: CueAction::ShowCamera { camera_id: cam_id, preset_id: None },
                }],
            }],
        }
    }

    #[test]
    fn total_duration_is_max_cue_end() {
        let t = sample_timeline();
        assert_eq!(t.duration(), StdDuration::from_secs(2));
    }

    #[test]
    fn validate_rejects_overlapping_cues() {
        let mut t = sample_timeline();
        let extra = Cue {
            id: CueId::new(),
            track_id: t.tracks[0].id,
            start_offset: StdDuration::from_millis(500),
            duration: StdDuration::from_secs(1),
            action: CueAction::ShowCamera { camera_id: CameraId::new(), preset_id: None },
        };
        t.tracks[0].cues.push(extra);
        assert!(t.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_duration_timeline() {
        let mut t = sample_timeline();
        t.tracks[0].cues.clear();
        assert!(t.validate().is_err());
    }

    #[test]
    fn schedule_has_entry_and_exit_per_cue() {
        let t = sample_timeline();
        let schedule = build_schedule(&t);
        assert_eq!(schedule.len(), 2);
    }
}
