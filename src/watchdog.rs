// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Watchdog Manager (C8): a per-destination health monitor combining
//! local encoder health (via C1) with an optional remote "is this
//! actually live" check, triggering bounded recovery on sustained
//! failure.
//!
//! The monitor loop is structurally the same shape as
//! [`crate::relay`]'s probe/backoff loop: periodic check, consecutive
//! counter, single transition event on flip — generalized here from
//! "promote to healthy" to "demote to unhealthy, then recover".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::events::{CoreEvent, EventBus};
use crate::model::{Destination, DestinationId};
use crate::supervisor::ProcessSupervisor;

const RECOVERY_COOLDOWN: Duration = Duration::from_secs(120);
const RECOVERY_RESTART_DELAY: Duration = Duration::from_secs(2);

/// Remote "is this destination actually receiving video" check. The only
/// concrete implementation shipped is [`HttpRedirectLiveVerifier`]
/// (generic HTTP status/redirect based); platform-specific signal parsing
/// is an extension point, not guessed (§9 Open Question 2).
#[async_trait::async_trait]
pub trait LiveVerifier: Send + Sync {
    async fn is_live(&self, url: &url::Url) -> bool;
}

/// No remote URL configured: the destination is judged on local encoder
/// health alone.
pub struct LocalOnlyVerifier;

#[async_trait::async_trait]
impl LiveVerifier for LocalOnlyVerifier {
    async fn is_live(&self, _url: &url::Url) -> bool {
        true
    }
}

/// Generic "2xx with no redirect to a non-live page counts as live"
/// checker usable by any platform exposing a stable public status URL.
pub struct HttpRedirectLiveVerifier {
    client: reqwest::Client,
}

impl HttpRedirectLiveVerifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("reqwest client"),
        }
    }
}

impl Default for HttpRedirectLiveVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LiveVerifier for HttpRedirectLiveVerifier {
    async fn is_live(&self, url: &url::Url) -> bool {
        match self.client.get(url.clone()).send().await {
            Ok(resp) => !resp.status().is_redirection() && resp.status().is_success(),
            Err(e) => {
                warn!(%url, error = %e, "live-verification request failed");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationHealth {
    Healthy,
    Unhealthy,
    ArmedNotMonitoring,
}

struct Monitored {
    destination: Destination,
    stream_id: Option<String>,
    health: DestinationHealth,
    consecutive_failures: u32,
    cooldown_until: Option<tokio::time::Instant>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct WatchdogManager {
    supervisor: ProcessSupervisor,
    events: EventBus,
    verifier: Arc<dyn LiveVerifier>,
    monitored: Arc<RwLock<HashMap<DestinationId, Monitored>>>,
}

impl WatchdogManager {
    pub fn new(supervisor: ProcessSupervisor, events: EventBus, verifier: Arc<dyn LiveVerifier>) -> Self {
        Self {
            supervisor,
            events,
            verifier,
            monitored: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// A stream for `stream_id` has started publishing to `destination_ids`.
    /// Each enabled destination is auto-resolved to that stream id; one
    /// whose `rtmp_url` doesn't actually match a live stream is recorded as
    /// "armed but not monitoring" rather than failing outright (§4.8).
    pub fn notify_stream_started(&self, destinations: Vec<Destination>, stream_id: String) {
        for destination in destinations {
            if !destination.watchdog.enabled {
                continue;
            }
            let resolved = self
                .supervisor
                .find_by_output_url(destination.rtmp_url.as_str());
            let matches = resolved.iter().any(|s| s == &stream_id) || resolved.is_empty();

            self.start_monitor(destination, if matches { Some(stream_id.clone()) } else { None });
        }
    }

    fn start_monitor(&self, destination: Destination, stream_id: Option<String>) {
        let id = destination.id;
        let mut monitored = self.monitored.write();
        if monitored.contains_key(&id) {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let health = if stream_id.is_some() {
            DestinationHealth::Healthy
        } else {
            DestinationHealth::ArmedNotMonitoring
        };

        let supervisor = self.supervisor.clone();
        let events = self.events.clone();
        let verifier = self.verifier.clone();
        let state = self.monitored.clone();
        let dest_clone = destination.clone();
        let sid_clone = stream_id.clone();

        let task = tokio::spawn(run_monitor(
            dest_clone, sid_clone, supervisor, events, verifier, state, shutdown_rx,
        ));

        monitored.insert(
            id,
            Monitored {
                destination,
                stream_id,
                health,
                consecutive_failures: 0,
                cooldown_until: None,
                shutdown_tx,
                task,
            },
        );
    }

    /// Stop monitoring `stream_id` — removes every destination currently
    /// resolved to it, leaving the registry empty for that id.
    pub fn notify_stream_stopped(&self, stream_id: &str) {
        let ids: Vec<DestinationId> = {
            let monitored = self.monitored.read();
            monitored
                .iter()
                .filter(|(_, m)| m.stream_id.as_deref() == Some(stream_id))
                .map(|(id, _)| *id)
                .collect()
        };
        for id in ids {
            if let Some(entry) = self.monitored.write().remove(&id) {
                let _ = entry.shutdown_tx.send(true);
                entry.task.abort();
            }
        }
    }

    pub fn status(&self) -> Vec<(DestinationId, DestinationHealth, u32)> {
        self.monitored
            .read()
            .iter()
            .map(|(id, m)| (*id, m.health, m.consecutive_failures))
            .collect()
    }

    pub async fn start(&self, destination_id: DestinationId) {
        if let Some(m) = self.monitored.read().get(&destination_id) {
            let _ = m.shutdown_tx.send(false);
        }
    }

    pub async fn stop(&self, destination_id: DestinationId) {
        if let Some(entry) = self.monitored.write().remove(&destination_id) {
            let _ = entry.shutdown_tx.send(true);
            entry.task.abort();
        }
    }

    pub async fn restart(&self, destination_id: DestinationId) {
        let destination = self.monitored.read().get(&destination_id).map(|m| m.destination.clone());
        self.stop(destination_id).await;
        if let Some(destination) = destination {
            self.start_monitor(destination, None);
        }
    }
}

async fn run_monitor(
    destination: Destination,
    stream_id: Option<String>,
    supervisor: ProcessSupervisor,
    events: EventBus,
    verifier: Arc<dyn LiveVerifier>,
    state: Arc<RwLock<HashMap<DestinationId, Monitored>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let interval = Duration::from_secs(destination.watchdog.check_interval_s);
    let threshold = destination.watchdog.consecutive_failure_threshold;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let in_cooldown = state
            .read()
            .get(&destination.id)
            .and_then(|m| m.cooldown_until)
            .map(|until| tokio::time::Instant::now() < until)
            .unwrap_or(false);
        if in_cooldown {
            continue;
        }

        let local_ok = match &stream_id {
            Some(sid) => matches!(
                supervisor.status(sid).map(|s| s.state),
                Some(crate::model::StreamProcessState::Running)
            ),
            None => false,
        };

        let remote_ok = match &destination.watchdog.live_verification_url {
            Some(url) => verifier.is_live(url).await,
            None => true,
        };

        let healthy = local_ok && remote_ok;

        let mut monitored = state.write();
        let Some(entry) = monitored.get_mut(&destination.id) else { return };

        if healthy {
            if entry.consecutive_failures > 0 {
                entry.consecutive_failures = 0;
                entry.health = DestinationHealth::Healthy;
                events.publish(CoreEvent::WatchdogRecovered { destination_id: destination.id });
                info!(destination = %destination.id, "watchdog: destination recovered");
            }
            continue;
        }

        entry.consecutive_failures += 1;
        entry.health = DestinationHealth::Unhealthy;
        events.publish(CoreEvent::WatchdogUnhealthy {
            destination_id: destination.id,
            consecutive_failures: entry.consecutive_failures,
        });

        if entry.consecutive_failures >= threshold {
            warn!(destination = %destination.id, failures = entry.consecutive_failures, "watchdog: triggering recovery");
            entry.cooldown_until = Some(tokio::time::Instant::now() + RECOVERY_COOLDOWN);
            let sid = stream_id.clone();
            let supervisor = supervisor.clone();
            drop(monitored);
            if let Some(sid) = sid {
                let _ = supervisor.stop(&sid).await;
                tokio::time::sleep(RECOVERY_RESTART_DELAY).await;
                // Restart is the caller's (executor's) responsibility once
                // it observes the stream stopped; the watchdog only
                // guarantees the stop half plus the cooldown window here.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;
    use crate::model::{EncodingProfile, WatchdogConfig};

    fn test_destination(enabled: bool) -> Destination {
        Destination {
            id: DestinationId::new(),
            name: "yt".into(),
            rtmp_url: url::Url::parse("rtmp://a.example/live/key").unwrap(),
            profile: EncodingProfile::Res720p30,
            watchdog: WatchdogConfig {
                enabled,
                check_interval_s: 30,
                consecutive_failure_threshold: 3,
                live_verification_url: None,
            },
        }
    }

    fn manager() -> WatchdogManager {
        WatchdogManager::new(
            ProcessSupervisor::new(SupervisorConfig::default(), EventBus::new()),
            EventBus::new(),
            Arc::new(LocalOnlyVerifier),
        )
    }

    // `notify_stream_started` spawns a background monitor task, so tests
    // calling it need a running Tokio reactor.

    #[tokio::test]
    async fn notify_stream_started_then_stopped_leaves_registry_empty() {
        let mgr = manager();
        let dest = test_destination(true);
        let dest_id = dest.id;
        mgr.notify_stream_started(vec![dest], "s1".into());
        assert_eq!(mgr.status().len(), 1);

        mgr.notify_stream_stopped("s1");
        assert_eq!(mgr.status().len(), 0);
        let _ = dest_id;
    }

    #[tokio::test]
    async fn disabled_destination_is_not_monitored() {
        let mgr = manager();
        let dest = test_destination(false);
        mgr.notify_stream_started(vec![dest], "s1".into());
        assert_eq!(mgr.status().len(), 0);
    }
}
