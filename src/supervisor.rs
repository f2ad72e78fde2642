// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Process Supervisor (C1): owns every ffmpeg child process the appliance
//! runs — camera relays, previews, and live encodes alike — under one
//! restart/backoff policy.
//!
//! At most one process is ever tracked per `stream_id`. Each tracked
//! process is driven by its own supervising task: spawn, watch stdout/
//! stderr for progress, wait for exit, decide whether to restart. The
//! registry itself is a single `parking_lot::Mutex`-guarded map, kept O(1)
//! for `start`/`stop`/`status` lookups the way the teacher's manager keeps
//! one map of worker handles.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::events::{CoreEvent, EventBus};
use crate::model::{StreamProcessState};

/// Hardware-accelerated encoder candidates probed in order; the first one
/// that survives a short dry run wins, otherwise software `libx264` is used.
const HW_PROFILE_CANDIDATES: &[&str] = &["h264_vaapi", "h264_nvenc", "h264_videotoolbox"];

/// Default grace period for [`ProcessSupervisor::stop`] (§4.1).
const DEFAULT_STOP_GRACE_MS: u64 = 5000;

/// Pure description of one ffmpeg invocation. Built by [`crate::compositor`]
/// or [`crate::relay`]; the supervisor only knows how to run it.
#[derive(Debug, Clone)]
pub struct EncoderInvocation {
    pub stream_id: String,
    pub argv: Vec<String>,
}

struct Tracked {
    state: StreamProcessState,
    restart_count: u32,
    pid: Option<u32>,
    output_urls: Vec<String>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Shared handle to the process registry. Cheap to clone.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: SupervisorConfig,
    events: EventBus,
    tracked: Mutex<HashMap<String, Tracked>>,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig, events: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                events,
                tracked: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Probe hardware encoder candidates with a short dry run (§4.1),
    /// returning the first one that produces output, or `None` for
    /// software encoding.
    pub async fn probe_hw_profile(&self) -> Option<String> {
        for candidate in HW_PROFILE_CANDIDATES {
            let probe = Command::new("ffmpeg")
                .args([
                    "-f", "lavfi", "-i", "color=black:s=64x64:d=1",
                    "-c:v", candidate, "-f", "null", "-",
                ])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn();

            let Ok(mut child) = probe else { continue };
            let outcome = tokio::time::timeout(Duration::from_secs(3), child.wait()).await;
            match outcome {
                Ok(Ok(status)) if status.success() => {
                    info!(profile = candidate, "hardware encoder profile selected");
                    return Some((*candidate).to_string());
                }
                _ => {
                    let _ = child.kill().await;
                    continue;
                }
            }
        }
        info!("no hardware encoder available, falling back to software");
        None
    }

    /// Start a process for `invocation.stream_id`. A no-op if one is
    /// already tracked under that id (at-most-one-per-stream_id, §4.1).
    pub fn start(&self, invocation: EncoderInvocation) -> Result<()> {
        let mut tracked = self.inner.tracked.lock();
        if tracked.contains_key(&invocation.stream_id) {
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stream_id = invocation.stream_id.clone();
        // argv isn't retained verbatim, but the destination URLs are kept
        // so `find_by_output_url` can resolve a stream_id from a
        // destination without the caller tracking the association itself.
        let output_urls: Vec<String> = invocation
            .argv
            .iter()
            .filter(|a| a.contains("://"))
            .cloned()
            .collect();
        let inner = self.inner.clone();
        let task = tokio::spawn(run_supervised(inner, invocation, shutdown_rx));

        tracked.insert(
            stream_id,
            Tracked {
                state: StreamProcessState::Starting,
                restart_count: 0,
                pid: None,
                output_urls,
                shutdown_tx,
                task,
            },
        );
        Ok(())
    }

    /// Stop a tracked process with the default grace period (§4.1: 5000ms).
    pub async fn stop(&self, stream_id: &str) -> Result<()> {
        self.stop_with_grace(stream_id, DEFAULT_STOP_GRACE_MS).await
    }

    /// Stop a tracked process: signal cooperative shutdown, then wait up to
    /// `grace_ms` before aborting the supervising task outright — the
    /// `stop(stream_id, grace_ms)` operation of §4.1, parameterized so
    /// cue-boundary transitions (§4.5: 3000ms) and ordinary stops (5000ms)
    /// share one implementation.
    pub async fn stop_with_grace(&self, stream_id: &str, grace_ms: u64) -> Result<()> {
        let entry = self.inner.tracked.lock().remove(stream_id);
        let Some(entry) = entry else {
            return Ok(());
        };
        let _ = entry.shutdown_tx.send(true);
        let grace = tokio::time::timeout(Duration::from_millis(grace_ms), entry.task).await;
        if grace.is_err() {
            warn!(stream_id, "process did not exit within grace period, task aborted");
        }
        Ok(())
    }

    /// Stop every tracked process. Used on application shutdown and at
    /// startup to reap anything left behind by a prior crash.
    pub async fn kill_all(&self) {
        let ids: Vec<String> = self.inner.tracked.lock().keys().cloned().collect();
        for id in ids {
            let _ = self.stop(&id).await;
        }
    }

    pub fn status(&self, stream_id: &str) -> Option<crate::model::StreamProcess> {
        let tracked = self.inner.tracked.lock();
        tracked.get(stream_id).map(|t| crate::model::StreamProcess {
            stream_id: stream_id.to_string(),
            state: t.state,
            restart_count: t.restart_count,
            pid: t.pid,
        })
    }

    /// Resolve the `stream_id`(s) currently publishing to a destination
    /// whose URL contains `url_substr` — how the watchdog maps a
    /// destination's `rtmp_url` back to the encoder process to restart.
    pub fn find_by_output_url(&self, url_substr: &str) -> Vec<String> {
        self.inner
            .tracked
            .lock()
            .iter()
            .filter(|(_, t)| t.output_urls.iter().any(|u| u.contains(url_substr)))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

async fn run_supervised(
    inner: Arc<Inner>,
    invocation: EncoderInvocation,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let cfg = &inner.config;
    let mut attempt: u32 = 0;
    let mut window_start = tokio::time::Instant::now();

    loop {
        if *shutdown_rx.borrow() {
            set_state(&inner, &invocation.stream_id, StreamProcessState::Stopped);
            return;
        }

        if window_start.elapsed() > Duration::from_secs(cfg.restart_budget_window_s) {
            attempt = 0;
            window_start = tokio::time::Instant::now();
        }

        if attempt >= cfg.restart_budget {
            error!(stream_id = invocation.stream_id, "restart budget exhausted");
            set_state(&inner, &invocation.stream_id, StreamProcessState::Failed);
            inner.events.publish(CoreEvent::ExecutionErrored {
                execution_id: crate::model::ExecutionId::new(),
                reason: format!("restart budget exhausted for '{}'", invocation.stream_id),
            });
            return;
        }

        set_state(&inner, &invocation.stream_id, StreamProcessState::Starting);

        match spawn_child(&invocation) {
            Ok(mut child) => {
                let pid = child.id();
                if let Some(t) = inner.tracked.lock().get_mut(&invocation.stream_id) {
                    t.state = StreamProcessState::Running;
                    t.pid = pid;
                }

                let stderr = child.stderr.take();
                let stream_id = invocation.stream_id.clone();
                let events = inner.events.clone();
                let last_activity = Arc::new(Mutex::new(tokio::time::Instant::now()));
                let stats_task = stderr.map(|s| {
                    tokio::spawn(read_progress(s, stream_id, events, last_activity.clone()))
                });

                let idle_timeout = Duration::from_secs(cfg.stderr_idle_timeout_s);
                let outcome = loop {
                    let deadline = *last_activity.lock() + idle_timeout;
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            let _ = child.start_kill();
                            let _ = child.wait().await;
                            if let Some(t) = stats_task { t.abort(); }
                            set_state(&inner, &invocation.stream_id, StreamProcessState::Stopped);
                            return;
                        }
                        status = child.wait() => break ChildOutcome::Exited(status),
                        _ = tokio::time::sleep_until(deadline), if idle_timeout > Duration::ZERO => {
                            let _ = child.start_kill();
                            let _ = child.wait().await;
                            break ChildOutcome::Idle;
                        }
                    }
                };
                if let Some(t) = stats_task { t.abort(); }

                match outcome {
                    ChildOutcome::Exited(Ok(s)) if s.success() => {
                        // ffmpeg exiting on its own is treated as a
                        // failure condition (§4.1) — a supervised
                        // relay/encode is expected to run forever.
                        warn!(stream_id = invocation.stream_id, "process exited cleanly but unexpectedly");
                    }
                    ChildOutcome::Exited(Ok(s)) => {
                        warn!(stream_id = invocation.stream_id, status = %s, "process exited nonzero");
                    }
                    ChildOutcome::Exited(Err(e)) => {
                        warn!(stream_id = invocation.stream_id, error = %e, "wait() failed");
                    }
                    ChildOutcome::Idle => {
                        warn!(
                            stream_id = invocation.stream_id,
                            idle_timeout_s = cfg.stderr_idle_timeout_s,
                            "no stderr progress within idle timeout, treating process as unresponsive",
                        );
                        inner.events.publish(CoreEvent::ExecutionErrored {
                            execution_id: crate::model::ExecutionId::new(),
                            reason: format!(
                                "stream '{}' unresponsive: no stderr activity for {}s",
                                invocation.stream_id, cfg.stderr_idle_timeout_s
                            ),
                        });
                    }
                }
            }
            Err(e) => {
                error!(stream_id = invocation.stream_id, error = %e, "spawn failed");
            }
        }

        attempt += 1;
        if let Some(t) = inner.tracked.lock().get_mut(&invocation.stream_id) {
            t.restart_count = attempt;
        }
        let backoff = Duration::from_secs(
            (cfg.backoff_initial_s.saturating_mul(1u64 << (attempt - 1).min(10))).min(cfg.backoff_max_s),
        );
        warn!(stream_id = invocation.stream_id, attempt, ?backoff, "restarting after backoff");

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown_rx.changed() => {
                set_state(&inner, &invocation.stream_id, StreamProcessState::Stopped);
                return;
            }
        }
    }
}

enum ChildOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Idle,
}

fn spawn_child(invocation: &EncoderInvocation) -> std::io::Result<Child> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(&invocation.argv)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd.spawn()
}

/// Parse ffmpeg's `-progress`-style stderr lines for fps/bitrate/dropped
/// frames/speed and publish them at whatever rate ffmpeg emits them
/// (≥1 Hz in practice).
async fn read_progress(
    stderr: tokio::process::ChildStderr,
    stream_id: String,
    events: EventBus,
    last_activity: Arc<Mutex<tokio::time::Instant>>,
) {
    let mut lines = BufReader::new(stderr).lines();
    let mut fps = 0.0;
    let mut bitrate_kbps = 0.0;
    let mut dropped_frames = 0u64;
    let mut speed = 0.0;

    while let Ok(Some(line)) = lines.next_line().await {
        *last_activity.lock() = tokio::time::Instant::now();
        if let Some(v) = parse_field(&line, "fps=") {
            fps = v;
        }
        if let Some(v) = parse_field(&line, "bitrate=") {
            bitrate_kbps = v;
        }
        if let Some(v) = parse_field(&line, "drop=") {
            dropped_frames = v as u64;
        }
        if let Some(v) = parse_field(&line, "speed=") {
            speed = v;
        }
        if line.starts_with("frame=") || line.contains("progress=") {
            events.publish(CoreEvent::EncoderStats {
                stream_id: stream_id.clone(),
                fps,
                bitrate_kbps,
                dropped_frames,
                speed,
            });
        }
    }
}

fn parse_field(line: &str, key: &str) -> Option<f64> {
    let idx = line.find(key)?;
    let rest = &line[idx + key.len()..];
    let token: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    token.parse().ok()
}

fn set_state(inner: &Arc<Inner>, stream_id: &str, state: StreamProcessState) {
    if let Some(t) = inner.tracked.lock().get_mut(stream_id) {
        t.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_progress_fields() {
        let line = "frame=  120 fps= 29.97 q=-1.0 size=  512kB time=00:00:04.00 bitrate=1048.5kbits/s speed=1.0x drop=3";
        assert_eq!(parse_field(line, "fps="), Some(29.97));
        assert_eq!(parse_field(line, "drop="), Some(3.0));
        assert_eq!(parse_field(line, "speed="), Some(1.0));
    }

    #[tokio::test]
    async fn start_is_idempotent_per_stream_id() {
        let sup = ProcessSupervisor::new(SupervisorConfig::default(), EventBus::new());
        let inv = EncoderInvocation { stream_id: "s1".into(), argv: vec!["-version".into()] };
        sup.start(inv.clone()).unwrap();
        sup.start(inv).unwrap();
        assert!(sup.status("s1").is_some());
        sup.stop("s1").await.unwrap();
    }

    #[tokio::test]
    async fn finds_stream_by_output_url_substring() {
        let sup = ProcessSupervisor::new(SupervisorConfig::default(), EventBus::new());
        let inv = EncoderInvocation {
            stream_id: "s2".into(),
            argv: vec!["-i".into(), "in.mp4".into(), "-f".into(), "flv".into(), "rtmp://a.example/live/key1".into()],
        };
        sup.start(inv).unwrap();
        assert_eq!(sup.find_by_output_url("a.example"), vec!["s2".to_string()]);
        assert!(sup.find_by_output_url("no-such-host").is_empty());
        sup.stop("s2").await.unwrap();
    }
}
