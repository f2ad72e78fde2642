// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{CoreError, Result};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    pub cameras: Vec<CameraConfig>,
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
}

/// HTTP API configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Falls back to `CORS_ALLOW_ORIGINS` / permissive when unset.
    #[serde(default)]
    pub cors_allow_origins: Option<Vec<String>>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            port: default_api_port(),
            cors_allow_origins: None,
        }
    }
}

fn default_api_enabled() -> bool {
    true
}
fn default_api_port() -> u16 {
    8080
}

/// Local RTMP relay host/port, overridable via `RTMP_RELAY_HOST` /
/// `RTMP_RELAY_PORT`.
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_relay_host")]
    pub host: String,
    #[serde(default = "default_relay_port")]
    pub port: u16,
    #[serde(default = "default_cue_prepare_timeout_ms")]
    pub cue_prepare_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            port: default_relay_port(),
            cue_prepare_timeout_ms: default_cue_prepare_timeout_ms(),
        }
    }
}

fn default_relay_host() -> String {
    "127.0.0.1".into()
}
fn default_relay_port() -> u16 {
    1935
}
fn default_cue_prepare_timeout_ms() -> u64 {
    3000
}

/// Process Supervisor tunables (§4.1).
#[derive(Debug, Deserialize, Clone)]
pub struct SupervisorConfig {
    #[serde(default = "default_restart_budget")]
    pub restart_budget: u32,
    #[serde(default = "default_restart_budget_window_s")]
    pub restart_budget_window_s: u64,
    #[serde(default = "default_backoff_initial_s")]
    pub backoff_initial_s: u64,
    #[serde(default = "default_backoff_max_s")]
    pub backoff_max_s: u64,
    #[serde(default = "default_stderr_idle_timeout_s")]
    pub stderr_idle_timeout_s: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_budget: default_restart_budget(),
            restart_budget_window_s: default_restart_budget_window_s(),
            backoff_initial_s: default_backoff_initial_s(),
            backoff_max_s: default_backoff_max_s(),
            stderr_idle_timeout_s: default_stderr_idle_timeout_s(),
        }
    }
}

fn default_restart_budget() -> u32 {
    10
}
fn default_restart_budget_window_s() -> u64 {
    60
}
fn default_backoff_initial_s() -> u64 {
    2
}
fn default_backoff_max_s() -> u64 {
    60
}
fn default_stderr_idle_timeout_s() -> u64 {
    15
}

/// Local RTMP→HLS preview muxer adapter config (§4.7).
#[derive(Debug, Deserialize, Clone)]
pub struct PreviewConfig {
    #[serde(default = "default_preview_host")]
    pub host: String,
    #[serde(default = "default_preview_rtmp_port")]
    pub rtmp_port: u16,
    #[serde(default = "default_preview_hls_port")]
    pub hls_port: u16,
    #[serde(default = "default_preview_api_port")]
    pub api_port: u16,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            host: default_preview_host(),
            rtmp_port: default_preview_rtmp_port(),
            hls_port: default_preview_hls_port(),
            api_port: default_preview_api_port(),
        }
    }
}

fn default_preview_host() -> String {
    "127.0.0.1".into()
}
fn default_preview_rtmp_port() -> u16 {
    1936
}
fn default_preview_hls_port() -> u16 {
    8888
}
fn default_preview_api_port() -> u16 {
    8889
}

/// Per-camera configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    pub id: String,
    pub name: String,
    pub stream_url: String,
    #[serde(default)]
    pub onvif_url: Option<String>,
    #[serde(default)]
    pub onvif_username: Option<String>,
    #[serde(default)]
    pub onvif_password: Option<String>,
    /// Boot the relay eagerly at startup rather than on first cue demand.
    #[serde(default = "default_relay_eager")]
    pub relay_eager: bool,
}

fn default_relay_eager() -> bool {
    true
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

/// Per-destination configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct DestinationConfig {
    pub id: String,
    pub name: String,
    pub rtmp_url: String,
    #[serde(default)]
    pub live_verification_url: Option<String>,
    #[serde(default = "default_watchdog_enabled")]
    pub watchdog_enabled: bool,
    #[serde(default = "default_check_interval_s")]
    pub watchdog_check_interval_s: u64,
    #[serde(default = "default_failure_threshold")]
    pub watchdog_failure_threshold: u32,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read config file: {e}")))?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(CoreError::Config("no cameras defined".into()));
        }
        if self.supervisor.restart_budget == 0 {
            return Err(CoreError::Config("supervisor.restart_budget must be > 0".into()));
        }
        if self.supervisor.backoff_max_s < self.supervisor.backoff_initial_s {
            return Err(CoreError::Config(
                "supervisor.backoff_max_s must be >= backoff_initial_s".into(),
            ));
        }
        for cam in &self.cameras {
            url::Url::parse(&cam.stream_url)
                .map_err(|e| CoreError::Config(format!("camera '{}' stream_url: {e}", cam.id)))?;
        }
        for dest in &self.destinations {
            url::Url::parse(&dest.rtmp_url)
                .map_err(|e| CoreError::Config(format!("destination '{}' rtmp_url: {e}", dest.id)))?;
        }
        Ok(())
    }
}

/// Environment variables recognized at startup (§6), consumed by the
/// ambient HTTP/persistence layers and, where relevant, threaded into
/// [`AppConfig`] overrides.
pub struct EnvOverrides {
    pub database_url: Option<String>,
    pub uploads_dir: Option<PathBuf>,
    pub rtmp_relay_host: Option<String>,
    pub rtmp_relay_port: Option<u16>,
    pub cors_allow_origins: Option<Vec<String>>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            uploads_dir: std::env::var("UPLOADS_DIR").ok().map(PathBuf::from),
            rtmp_relay_host: std::env::var("RTMP_RELAY_HOST").ok(),
            rtmp_relay_port: std::env::var("RTMP_RELAY_PORT")
                .ok()
                .and_then(|v| v.parse().ok()),
            cors_allow_origins: std::env::var("CORS_ALLOW_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect()),
        }
    }

    pub fn apply(self, config: &mut AppConfig) {
        if let Some(host) = self.rtmp_relay_host {
            config.relay.host = host;
        }
        if let Some(port) = self.rtmp_relay_port {
            config.relay.port = port;
        }
        if let Some(origins) = self.cors_allow_origins {
            config.api.cors_allow_origins = Some(origins);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        f.write_all(contents.as_bytes()).expect("write");
        f
    }

    #[test]
    fn loads_minimal_config() {
        let f = write_config(
            r#"
            [[cameras]]
            id = "cam1"
            name = "Front door"
            stream_url = "rtsp://127.0.0.1/cam1"
            "#,
        );
        let cfg = AppConfig::from_file(f.path()).expect("parse");
        assert_eq!(cfg.cameras.len(), 1);
        assert_eq!(cfg.relay.port, 1935);
        assert!(cfg.api.enabled);
    }

    #[test]
    fn rejects_empty_cameras() {
        let f = write_config("cameras = []\n");
        assert!(AppConfig::from_file(f.path()).is_err());
    }

    #[test]
    fn rejects_invalid_stream_url() {
        let f = write_config(
            r#"
            [[cameras]]
            id = "cam1"
            name = "Front door"
            stream_url = "not a url"
            "#,
        );
        assert!(AppConfig::from_file(f.path()).is_err());
    }
}
