//! Cross-module scenario test grounded in spec scenario S4 ("zombie
//! stream"): a destination whose encoder process never comes up is
//! monitored by a real [`WatchdogManager`] over a real [`ProcessSupervisor`],
//! and must escalate through `WatchdogUnhealthy` to a recovery attempt once
//! `consecutive_failure_threshold` is reached (§4.8, §8 hysteresis).
//!
//! `check_interval_s`/`consecutive_failure_threshold` are configured small
//! here so the scenario completes in well under a second of wall-clock —
//! the 120 s post-recovery cooldown itself is not waited out, only that a
//! single recovery attempt fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use vistterstream_core::config::SupervisorConfig;
use vistterstream_core::events::{CoreEvent, EventBus};
use vistterstream_core::model::{DestinationId, EncodingProfile, WatchdogConfig};
use vistterstream_core::supervisor::ProcessSupervisor;
use vistterstream_core::watchdog::{LocalOnlyVerifier, WatchdogManager};

fn unmonitored_destination(id: DestinationId) -> vistterstream_core::model::Destination {
    vistterstream_core::model::Destination {
        id,
        name: "zombie".into(),
        rtmp_url: url::Url::parse("rtmp://a.example/live/key").unwrap(),
        profile: EncodingProfile::Res720p30,
        watchdog: WatchdogConfig {
            enabled: true,
            check_interval_s: 0, // as fast as the select! loop allows
            consecutive_failure_threshold: 2,
            live_verification_url: None,
        },
    }
}

#[tokio::test]
async fn sustained_local_failure_escalates_to_recovery() {
    let events = EventBus::new();
    let supervisor = ProcessSupervisor::new(SupervisorConfig::default(), events.clone());
    let watchdog = WatchdogManager::new(supervisor, events.clone(), Arc::new(LocalOnlyVerifier));

    let dest = unmonitored_destination(DestinationId::new());
    let dest_id = dest.id;

    // No matching stream_id is ever registered with the supervisor, so
    // `local_ok` is false on every check from the start — the zombie-stream
    // condition.
    watchdog.notify_stream_started(vec![dest], "stream-that-never-starts".into());

    let mut subscriber = events.subscribe();

    let mut unhealthy_events = 0u32;
    let result = timeout(Duration::from_secs(5), async {
        loop {
            match subscriber.recv().await {
                Ok(CoreEvent::WatchdogUnhealthy { destination_id, consecutive_failures }) if destination_id == dest_id => {
                    unhealthy_events += 1;
                    if consecutive_failures >= 2 {
                        return;
                    }
                }
                Ok(_) => continue,
                Err(_) => panic!("event bus closed before escalation"),
            }
        }
    })
    .await;

    assert!(result.is_ok(), "watchdog never escalated within the deadline");
    assert!(unhealthy_events >= 2, "expected at least threshold-many WatchdogUnhealthy events, got {unhealthy_events}");

    let status = watchdog.status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].0, dest_id);

    watchdog.notify_stream_stopped("stream-that-never-starts");
    assert!(watchdog.status().is_empty());
}
