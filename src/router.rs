// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Stream Router (C6): the single IDLE/PREVIEW/LIVE mode switch the rest
//! of the appliance observes, and — per §4.6's literal operations — the
//! thing that actually starts/stops/restarts the [`crate::executor`] for
//! whichever mode is active. One instance per appliance, grounded in the
//! teacher's `RecordingManager`, the single top-level owner the rest of
//! the process defers to for "what's currently running".

use parking_lot::RwLock;
use tracing::info;

use crate::error::{CoreError, Result};
use crate::events::{EventBus, PositionStore};
use crate::executor::{AssetRegistry, PresetRegistry, TimelineExecutor};
use crate::model::{Camera, CameraId, CueAction, Destination, DestinationId, RouterMode, Timeline, TimelineId};
use crate::preview::PreviewServerAdapter;
use crate::ptz::PtzController;
use crate::registry::Registry;
use crate::relay::CameraRelayManager;
use crate::supervisor::ProcessSupervisor;
use crate::watchdog::WatchdogManager;

pub type CameraRegistry = Registry<CameraId, Camera>;
pub type DestinationRegistry = Registry<DestinationId, Destination>;
pub type TimelineRegistry = Registry<TimelineId, Timeline>;

#[derive(Default)]
struct State {
    mode: RouterMode,
    active_timeline: Option<TimelineId>,
    executor: Option<TimelineExecutor>,
    /// The encoder `stream_id` the current executor publishes under, so
    /// `stop()` can tell the watchdog which stream to forget.
    stream_id: Option<String>,
}

pub struct StatusSnapshot {
    pub mode: RouterMode,
    pub timeline_id: Option<TimelineId>,
    pub preview_playback_url: Option<url::Url>,
}

pub struct StreamRouter {
    preview: PreviewServerAdapter,
    cameras: CameraRegistry,
    destinations: DestinationRegistry,
    timelines: TimelineRegistry,
    assets: AssetRegistry,
    presets: PresetRegistry,
    relay: CameraRelayManager,
    ptz: PtzController,
    supervisor: ProcessSupervisor,
    events: EventBus,
    positions: PositionStore,
    watchdog: WatchdogManager,
    state: RwLock<State>,
}

impl StreamRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        preview: PreviewServerAdapter,
        cameras: CameraRegistry,
        destinations: DestinationRegistry,
        timelines: TimelineRegistry,
        assets: AssetRegistry,
        presets: PresetRegistry,
        relay: CameraRelayManager,
        ptz: PtzController,
        supervisor: ProcessSupervisor,
        events: EventBus,
        positions: PositionStore,
        watchdog: WatchdogManager,
    ) -> Self {
        Self {
            preview,
            cameras,
            destinations,
            timelines,
            assets,
            presets,
            relay,
            ptz,
            supervisor,
            events,
            positions,
            watchdog,
            state: RwLock::new(State::default()),
        }
    }

    pub fn timelines(&self) -> &TimelineRegistry {
        &self.timelines
    }

    pub fn destinations(&self) -> &DestinationRegistry {
        &self.destinations
    }

    pub fn cameras(&self) -> &CameraRegistry {
        &self.cameras
    }

    pub fn assets(&self) -> &AssetRegistry {
        &self.assets
    }

    pub fn presets(&self) -> &PresetRegistry {
        &self.presets
    }

    /// Enter PREVIEW for `timeline_id`: requires IDLE and a healthy
    /// preview server, starts the executor publishing only to the local
    /// HLS muxer.
    pub async fn start_preview(&self, timeline_id: TimelineId) -> Result<()> {
        {
            let state = self.state.read();
            if state.mode != RouterMode::Idle {
                return Err(CoreError::InvalidModeTransition(format!("{:?}", state.mode)));
            }
        }

        if !self.preview.health().await.unwrap_or(false) {
            return Err(CoreError::PreviewUnhealthy("preview server health check failed".into()));
        }

        let timeline = self
            .timelines
            .get(&timeline_id)
            .ok_or_else(|| CoreError::TimelineNotFound { id: timeline_id.to_string() })?;
        timeline.validate().map_err(CoreError::Config)?;

        let cameras = self.cameras_referenced_by(&timeline);
        let preview_url = self.preview.publish_url()?;

        let executor = TimelineExecutor::spawn(
            timeline,
            cameras,
            self.assets.clone(),
            self.presets.clone(),
            vec![preview_url],
            crate::model::EncodingProfile::Res720p30,
            self.relay.clone(),
            self.ptz.clone(),
            self.supervisor.clone(),
            self.events.clone(),
            self.positions.clone(),
        );
        let stream_id = format!("exec-{}", executor.execution_id);

        let mut state = self.state.write();
        state.mode = RouterMode::Preview;
        state.active_timeline = Some(timeline_id);
        state.stream_id = Some(stream_id);
        state.executor = Some(executor);
        info!(timeline = %timeline_id, "router entered PREVIEW");
        Ok(())
    }

    /// Transition PREVIEW → LIVE. Per §4.6 this restarts the encode from
    /// time 0 — a documented limitation, not a seamless switch: the
    /// executor is stopped and a fresh one spawned with the live output
    /// set.
    pub async fn go_live(&self, destination_ids: Vec<DestinationId>) -> Result<TimelineId> {
        {
            let state = self.state.read();
            if state.mode != RouterMode::Preview {
                return Err(CoreError::InvalidModeTransition(format!("{:?}", state.mode)));
            }
        }

        let destinations: Vec<Destination> = destination_ids
            .iter()
            .map(|id| {
                self.destinations
                    .get(id)
                    .ok_or_else(|| CoreError::DestinationNotFound { id: id.to_string() })
            })
            .collect::<Result<_>>()?;

        let (timeline_id, old_executor) = {
            let mut state = self.state.write();
            let timeline_id = state
                .active_timeline
                .expect("active_timeline set entering PREVIEW");
            (timeline_id, state.executor.take())
        };

        if let Some(old) = old_executor {
            old.stop("go_live: restarting from time 0").await;
        }

        let timeline = self
            .timelines
            .get(&timeline_id)
            .ok_or(CoreError::TimelineNotFound { id: timeline_id.to_string() })?;
        let cameras = self.cameras_referenced_by(&timeline);
        let output_urls: Vec<url::Url> = destinations.iter().map(|d| d.rtmp_url.clone()).collect();
        let profile = destinations
            .first()
            .map(|d| d.profile)
            .unwrap_or(crate::model::EncodingProfile::Res1080p30);

        let executor = TimelineExecutor::spawn(
            timeline,
            cameras,
            self.assets.clone(),
            self.presets.clone(),
            output_urls,
            profile,
            self.relay.clone(),
            self.ptz.clone(),
            self.supervisor.clone(),
            self.events.clone(),
            self.positions.clone(),
        );
        let stream_id = format!("exec-{}", executor.execution_id);

        self.watchdog
            .notify_stream_started(destinations, stream_id.clone());

        let mut state = self.state.write();
        state.mode = RouterMode::Live;
        state.stream_id = Some(stream_id);
        state.executor = Some(executor);
        info!(timeline = %timeline_id, "router entered LIVE (restarting from 0)");
        Ok(timeline_id)
    }

    /// Idempotent: a `stop()` while already IDLE is a no-op success (§8).
    pub async fn stop(&self) {
        let (executor, stream_id, previous_mode) = {
            let mut state = self.state.write();
            let previous_mode = state.mode;
            (state.executor.take(), state.stream_id.take(), previous_mode)
        };

        if previous_mode == RouterMode::Idle {
            return;
        }

        if let Some(executor) = executor {
            executor.stop("router stop").await;
        }
        if let Some(stream_id) = &stream_id {
            self.watchdog.notify_stream_stopped(stream_id);
        }

        let mut state = self.state.write();
        info!(previous_mode = ?previous_mode, "router returning to IDLE");
        state.mode = RouterMode::Idle;
        state.active_timeline = None;
    }

    pub fn status(&self) -> StatusSnapshot {
        let state = self.state.read();
        StatusSnapshot {
            mode: state.mode,
            timeline_id: state.active_timeline,
            preview_playback_url: if state.mode == RouterMode::Preview {
                self.preview.playback_url().ok()
            } else {
                None
            },
        }
    }

    fn cameras_referenced_by(&self, timeline: &Timeline) -> Vec<Camera> {
        let mut ids = Vec::new();
        for track in &timeline.tracks {
            for cue in &track.cues {
                match &cue.action {
                    CueAction::ShowCamera { camera_id, .. } => ids.push(*camera_id),
                    _ => {}
                }
            }
        }
        ids.into_iter().filter_map(|id| self.cameras.get(&id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RelayConfig, SupervisorConfig};
    use crate::model::{Track, TrackKind};
    use std::sync::Arc;
    use std::time::Duration;

    fn router_with_preview(healthy: bool) -> StreamRouter {
        let events = EventBus::new();
        let supervisor = ProcessSupervisor::new(SupervisorConfig::default(), events.clone());
        StreamRouter::new(
            PreviewServerAdapter::new_for_test(healthy),
            Registry::new(),
            Registry::new(),
            Registry::new(),
            Registry::new(),
            Registry::new(),
            CameraRelayManager::new(RelayConfig::default(), supervisor.clone(), events.clone()),
            PtzController::new(),
            supervisor,
            events.clone(),
            PositionStore::new(),
            WatchdogManager::new(
                ProcessSupervisor::new(SupervisorConfig::default(), events.clone()),
                events,
                Arc::new(crate::watchdog::LocalOnlyVerifier),
            ),
        )
    }

    fn single_cue_timeline() -> Timeline {
        let cam_id = CameraId::new();
        Timeline {
            id: TimelineId::new(),
            name: "t".into(),
            looped: true,
            destinations: vec![],
            tracks: vec![Track {
                id: crate::model::TrackId::new(),
                kind: TrackKind::Video,
                layer: 0,
                cues: vec![crate::model::Cue {
                    id: crate::model::CueId::new(),
                    track_id: crate::model::TrackId::new(),
                    start_offset: Duration::from_secs(0),
                    duration: Duration::from_secs(5),
                    action: CueAction::ShowCamera { camera_id: cam_id, preset_id: None },
                }],
            }],
        }
    }

    #[tokio::test]
    async fn start_preview_requires_healthy_server() {
        let router = router_with_preview(false);
        let tl = single_cue_timeline();
        router.timelines().insert(tl.id, tl.clone());
        assert!(router.start_preview(tl.id).await.is_err());
    }

    #[tokio::test]
    async fn start_preview_requires_known_timeline() {
        let router = router_with_preview(true);
        assert!(router.start_preview(TimelineId::new()).await.is_err());
    }

    #[tokio::test]
    async fn go_live_requires_preview_first() {
        let router = router_with_preview(true);
        let tl = single_cue_timeline();
        router.timelines().insert(tl.id, tl.clone());

        assert!(router.go_live(vec![]).await.is_err());
        router.start_preview(tl.id).await.unwrap();
        assert_eq!(router.status().mode, RouterMode::Preview);

        let result = router.go_live(vec![]).await;
        assert!(result.is_ok());
        assert_eq!(router.status().mode, RouterMode::Live);

        router.stop().await;
        assert_eq!(router.status().mode, RouterMode::Idle);
    }

    #[tokio::test]
    async fn stop_in_idle_is_a_noop() {
        let router = router_with_preview(true);
        router.stop().await;
        assert_eq!(router.status().mode, RouterMode::Idle);
    }
}
