// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Camera Relay Manager (C2): keeps one local RTMP relay per camera that
//! cue handlers and the compositor read from, so no component ever touches
//! a raw RTSP URL directly.
//!
//! Structurally this is the teacher's `supervised_connect` reconnect loop
//! (`src/camera.rs`) generalized from "RTSP ingest into the ring buffer"
//! to "RTSP ingest relayed out over local RTMP" — the backoff and
//! reset-on-success shape is unchanged, only the destination of the
//! buffers is different (another process, via ffmpeg, instead of a chunk
//! writer channel).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use url::Url;

use crate::config::RelayConfig;
use crate::error::{CoreError, Result};
use crate::events::{CoreEvent, EventBus};
use crate::model::{Camera, CameraId, CameraRelay, StreamProcessState};
use crate::supervisor::{EncoderInvocation, ProcessSupervisor};

const HEALTHY_CONSECUTIVE_PROBES: u32 = 2;
const PROBE_INTERVAL: Duration = Duration::from_secs(3);

struct Entry {
    relay: CameraRelay,
    consecutive_healthy_probes: u32,
    shutdown_tx: watch::Sender<bool>,
    probe_task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct CameraRelayManager {
    config: RelayConfig,
    supervisor: ProcessSupervisor,
    events: EventBus,
    relays: Arc<RwLock<HashMap<CameraId, Entry>>>,
}

impl CameraRelayManager {
    pub fn new(config: RelayConfig, supervisor: ProcessSupervisor, events: EventBus) -> Self {
        Self {
            config,
            supervisor,
            events,
            relays: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn stream_id(camera_id: CameraId) -> String {
        format!("relay-{camera_id}")
    }

    fn local_url(&self, camera_id: CameraId) -> Result<Url> {
        Url::parse(&format!(
            "rtmp://{}:{}/relay/{}",
            self.config.host, self.config.port, camera_id
        ))
        .map_err(CoreError::from)
    }

    /// Start (or reuse) the relay for `camera`. Idempotent — calling it for
    /// an already-running relay is a no-op.
    pub fn ensure_relay(&self, camera: &Camera) -> Result<CameraRelay> {
        let local_url = self.local_url(camera.id)?;

        {
            let relays = self.relays.read();
            if let Some(entry) = relays.get(&camera.id) {
                return Ok(entry.relay.clone());
            }
        }

        let stream_id = Self::stream_id(camera.id);
        let argv = vec![
            "-rtsp_transport".to_string(),
            "tcp".to_string(),
            "-i".to_string(),
            camera.stream_url.to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-f".to_string(),
            "flv".to_string(),
            local_url.to_string(),
        ];

        self.supervisor.start(EncoderInvocation { stream_id: stream_id.clone(), argv })?;

        let relay = CameraRelay {
            camera_id: camera.id,
            local_url,
            healthy: false,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let probe_task = tokio::spawn(probe_loop(
            camera.id,
            stream_id,
            self.supervisor.clone(),
            self.relays.clone(),
            self.events.clone(),
            shutdown_rx,
        ));

        self.relays.write().insert(
            camera.id,
            Entry {
                relay: relay.clone(),
                consecutive_healthy_probes: 0,
                shutdown_tx,
                probe_task,
            },
        );

        info!(camera = %camera.id, url = %relay.local_url, "camera relay started");
        Ok(relay)
    }

    /// Stop and forget the relay for `camera_id`.
    pub async fn teardown(&self, camera_id: CameraId) -> Result<()> {
        if let Some(entry) = self.relays.write().remove(&camera_id) {
            let _ = entry.shutdown_tx.send(true);
            entry.probe_task.abort();
        }
        self.supervisor.stop(&Self::stream_id(camera_id)).await
    }

    /// Current health snapshot, if a relay is tracked for this camera.
    pub fn health(&self, camera_id: CameraId) -> Option<CameraRelay> {
        self.relays.read().get(&camera_id).map(|e| e.relay.clone())
    }

    /// Record the outcome of one health probe (driven by an external
    /// periodic task); flips `healthy` after
    /// [`HEALTHY_CONSECUTIVE_PROBES`] consecutive successes and publishes
    /// `relay.health_changed` on any transition.
    pub fn record_probe(&self, camera_id: CameraId, ok: bool) {
        record_probe_on(&self.relays, &self.events, camera_id, ok);
    }

    pub fn probe_interval() -> Duration {
        PROBE_INTERVAL
    }

    /// How long a cue handler should wait for a not-yet-healthy relay
    /// before falling back (§4.2's `cue_prepare_timeout_ms`).
    pub fn cue_prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.config.cue_prepare_timeout_ms)
    }
}

/// Shared by [`CameraRelayManager::record_probe`] and the background
/// [`probe_loop`] task, which only holds the raw map (not a full manager
/// handle, since it outlives any single `ensure_relay` call).
fn record_probe_on(
    relays: &Arc<RwLock<HashMap<CameraId, Entry>>>,
    events: &EventBus,
    camera_id: CameraId,
    ok: bool,
) {
    let mut relays = relays.write();
    let Some(entry) = relays.get_mut(&camera_id) else { return };

    let was_healthy = entry.relay.healthy;
    if ok {
        entry.consecutive_healthy_probes =
            (entry.consecutive_healthy_probes + 1).min(HEALTHY_CONSECUTIVE_PROBES);
        entry.relay.healthy = entry.consecutive_healthy_probes >= HEALTHY_CONSECUTIVE_PROBES;
    } else {
        entry.consecutive_healthy_probes = 0;
        entry.relay.healthy = false;
    }

    if was_healthy != entry.relay.healthy {
        events.publish(CoreEvent::RelayHealthChanged {
            camera_id,
            healthy: entry.relay.healthy,
        });
    }
}

/// Background health probe for one relay (§4.2): polls the supervisor's
/// view of the relay's ffmpeg process every [`PROBE_INTERVAL`] and feeds
/// the result through the same consecutive-probe logic `record_probe`
/// uses, until `shutdown_rx` is flipped by [`CameraRelayManager::teardown`].
async fn probe_loop(
    camera_id: CameraId,
    stream_id: String,
    supervisor: ProcessSupervisor,
    relays: Arc<RwLock<HashMap<CameraId, Entry>>>,
    events: EventBus,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(PROBE_INTERVAL);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let ok = matches!(
                    supervisor.status(&stream_id).map(|p| p.state),
                    Some(StreamProcessState::Running)
                );
                record_probe_on(&relays, &events, camera_id, ok);
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;

    fn test_camera() -> Camera {
        Camera {
            id: CameraId::new(),
            name: "test".into(),
            stream_url: Url::parse("rtsp://127.0.0.1/cam").unwrap(),
            onvif_url: None,
            onvif_username: None,
            onvif_password: None,
        }
    }

    fn manager() -> CameraRelayManager {
        CameraRelayManager::new(
            RelayConfig::default(),
            ProcessSupervisor::new(SupervisorConfig::default(), EventBus::new()),
            EventBus::new(),
        )
    }

    // `ensure_relay` spawns a background probe task, so every test calling
    // it needs a running Tokio reactor even though the method itself is sync.

    #[tokio::test]
    async fn ensure_relay_is_idempotent() {
        let mgr = manager();
        let cam = test_camera();
        let a = mgr.ensure_relay(&cam).unwrap();
        let b = mgr.ensure_relay(&cam).unwrap();
        assert_eq!(a.local_url, b.local_url);
    }

    #[tokio::test]
    async fn becomes_healthy_after_two_consecutive_probes() {
        let mgr = manager();
        let cam = test_camera();
        mgr.ensure_relay(&cam).unwrap();

        mgr.record_probe(cam.id, true);
        assert!(!mgr.health(cam.id).unwrap().healthy);

        mgr.record_probe(cam.id, true);
        assert!(mgr.health(cam.id).unwrap().healthy);
    }

    #[tokio::test]
    async fn one_failed_probe_resets_health() {
        let mgr = manager();
        let cam = test_camera();
        mgr.ensure_relay(&cam).unwrap();
        mgr.record_probe(cam.id, true);
        mgr.record_probe(cam.id, true);
        assert!(mgr.health(cam.id).unwrap().healthy);

        mgr.record_probe(cam.id, false);
        assert!(!mgr.health(cam.id).unwrap().healthy);
    }

    #[tokio::test]
    async fn teardown_cancels_the_probe_task() {
        let mgr = manager();
        let cam = test_camera();
        mgr.ensure_relay(&cam).unwrap();
        assert!(mgr.health(cam.id).is_some());

        mgr.teardown(cam.id).await.unwrap();
        assert!(mgr.health(cam.id).is_none());
    }
}
