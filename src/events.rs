// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Shared state & event bus (C9): best-effort in-process pub/sub plus the
//! playback position store. Delivery is ordered per topic and best-effort —
//! only `EncoderStats` is dropped on subscriber overflow, everything else is
//! expected to be drained promptly by the handful of in-process subscribers
//! (the HTTP layer, the watchdog, the router).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::model::{ExecutionId, PlaybackPosition, TimelineId};

const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum CoreEvent {
    ExecutionStarted { execution_id: ExecutionId, timeline_id: TimelineId },
    ExecutionStopped { execution_id: ExecutionId, reason: String },
    ExecutionErrored { execution_id: ExecutionId, reason: String },
    CueEntered { execution_id: ExecutionId, track_id: crate::model::TrackId, cue_id: crate::model::CueId },
    EncoderStats { stream_id: String, fps: f64, bitrate_kbps: f64, dropped_frames: u64, speed: f64 },
    RelayHealthChanged { camera_id: crate::model::CameraId, healthy: bool },
    WatchdogUnhealthy { destination_id: crate::model::DestinationId, consecutive_failures: u32 },
    WatchdogRecovered { destination_id: crate::model::DestinationId },
    /// A video cue's camera relay was not healthy by `cue_prepare_timeout_ms`
    /// (§7 `camera_unreachable`); the cue proceeds on a black fill.
    CameraUnreachable { execution_id: ExecutionId, camera_id: crate::model::CameraId },
    /// A cue's PTZ pre-position failed or timed out (§7 `preset_unreachable`);
    /// the cue proceeds with whatever position the camera currently has.
    PresetUnreachable {
        execution_id: ExecutionId,
        camera_id: crate::model::CameraId,
        preset_id: crate::model::PresetId,
    },
}

/// One broadcast channel shared by every CORE component. Cloning an
/// [`EventBus`] is cheap — it just clones the underlying sender handle.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Never blocks; if there are no subscribers the
    /// event is simply dropped.
    pub fn publish(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Concurrent map of the latest published position per timeline. The owning
/// [`crate::executor`] task is the sole writer for its timeline; readers
/// (HTTP status handlers) never block a writer.
#[derive(Clone, Default)]
pub struct PositionStore {
    inner: Arc<RwLock<HashMap<TimelineId, PlaybackPosition>>>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, timeline_id: TimelineId, position: PlaybackPosition) {
        self.inner.write().insert(timeline_id, position);
    }

    pub fn get(&self, timeline_id: &TimelineId) -> Option<PlaybackPosition> {
        self.inner.read().get(timeline_id).copied()
    }

    pub fn clear(&self, timeline_id: &TimelineId) {
        self.inner.write().remove(timeline_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionId;
    use std::time::Duration;

    #[tokio::test]
    async fn publishes_to_multiple_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(CoreEvent::ExecutionStarted {
            execution_id: ExecutionId::new(),
            timeline_id: TimelineId::new(),
        });

        assert!(matches!(a.recv().await.unwrap(), CoreEvent::ExecutionStarted { .. }));
        assert!(matches!(b.recv().await.unwrap(), CoreEvent::ExecutionStarted { .. }));
    }

    #[test]
    fn position_store_last_write_wins() {
        let store = PositionStore::new();
        let tid = TimelineId::new();
        let eid = ExecutionId::new();

        store.publish(tid, PlaybackPosition { execution_id: eid, position: Duration::from_secs(1), loop_count: 0 });
        store.publish(tid, PlaybackPosition { execution_id: eid, position: Duration::from_secs(2), loop_count: 0 });

        assert_eq!(store.get(&tid).unwrap().position, Duration::from_secs(2));
    }
}
