// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The `Application` object (§9's "explicit application object" guidance):
//! constructed once, in dependency order, owns every CORE component, and
//! tears them down in reverse order on shutdown. Nothing in this crate
//! reaches for a module-level `static`/`lazy_static` singleton — every
//! component is a field here, handed to whatever needs it (the HTTP
//! layer, the CLI) by reference.
//!
//! Mirrors the teacher's `main.rs`/`RecordingManager` split: `main.rs`
//! loads config and calls [`Application::start`], then blocks on
//! `tokio::signal::ctrl_c()` before calling [`Application::shutdown`].

use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::events::{EventBus, PositionStore};
use crate::model::{Asset, AssetId, Camera, CameraId, Destination, DestinationId, EncodingProfile, Preset, PresetId, WatchdogConfig};
use crate::preview::PreviewServerAdapter;
use crate::ptz::PtzController;
use crate::registry::Registry;
use crate::relay::CameraRelayManager;
use crate::router::StreamRouter;
use crate::supervisor::ProcessSupervisor;
use crate::watchdog::{HttpRedirectLiveVerifier, WatchdogManager};

/// Hook an external broadcast-lifecycle integration (platform OAuth +
/// go-live/end-live REST calls) into, without the CORE ever calling it
/// inline from a failure path (§4.8, §9). The default build installs
/// `None` — no concrete implementation ships with this crate, since that
/// integration is an external collaborator per §1.
#[async_trait::async_trait]
pub trait BroadcastLifecycleHook: Send + Sync {
    async fn on_go_live(&self, destination_id: DestinationId);
    async fn on_stop(&self, destination_id: DestinationId);
}

pub struct Application {
    pub config: AppConfig,
    pub events: EventBus,
    pub positions: PositionStore,
    pub supervisor: ProcessSupervisor,
    pub relay: CameraRelayManager,
    pub ptz: PtzController,
    pub router: Arc<StreamRouter>,
    pub watchdog: WatchdogManager,
    pub cameras: Registry<CameraId, Camera>,
    pub broadcast_hook: Option<Arc<dyn BroadcastLifecycleHook>>,
}

impl Application {
    /// Construct every component in dependency order (C1 before the
    /// components that spawn processes through it, C9's event bus before
    /// everything else) and eagerly start relays for enabled cameras
    /// (§4.2). Does not block; the caller awaits shutdown separately.
    pub async fn start(config: AppConfig) -> crate::error::Result<Self> {
        let events = EventBus::new();
        let positions = PositionStore::new();

        let supervisor = ProcessSupervisor::new(config.supervisor.clone(), events.clone());
        supervisor.kill_all().await; // orphan reap at startup (§4.1)
        let hw_profile = supervisor.probe_hw_profile().await;
        info!(?hw_profile, "hardware encoder profile resolved");

        let relay = CameraRelayManager::new(config.relay.clone(), supervisor.clone(), events.clone());
        let ptz = PtzController::new();

        let cameras: Registry<CameraId, Camera> = Registry::new();
        let destinations: Registry<DestinationId, Destination> = Registry::new();
        let timelines = Registry::new();
        let assets: Registry<AssetId, Asset> = Registry::new();
        let presets: Registry<PresetId, Preset> = Registry::new();

        let mut configured_cameras = Vec::with_capacity(config.cameras.len());
        for cam_cfg in &config.cameras {
            let camera = camera_from_config(cam_cfg)?;
            cameras.insert(camera.id, camera.clone());
            configured_cameras.push((camera, cam_cfg.relay_eager));
        }
        for dest_cfg in &config.destinations {
            let destination = destination_from_config(dest_cfg)?;
            destinations.insert(destination.id, destination);
        }

        for (camera, relay_eager) in &configured_cameras {
            if *relay_eager {
                relay.ensure_relay(camera)?;
            }
        }

        let preview = PreviewServerAdapter::new(config.preview.clone());
        let watchdog = WatchdogManager::new(
            supervisor.clone(),
            events.clone(),
            Arc::new(HttpRedirectLiveVerifier::new()),
        );

        let router = Arc::new(StreamRouter::new(
            preview,
            cameras.clone(),
            destinations,
            timelines,
            assets,
            presets,
            relay.clone(),
            ptz.clone(),
            supervisor.clone(),
            events.clone(),
            positions.clone(),
            watchdog.clone(),
        ));

        Ok(Self {
            config,
            events,
            positions,
            supervisor,
            relay,
            ptz,
            router,
            watchdog,
            cameras,
            broadcast_hook: None,
        })
    }

    /// Stop the router (tearing down whatever executor is active), every
    /// camera relay, and every tracked encoder process — in reverse
    /// construction order. Idempotent.
    pub async fn shutdown(&self) {
        info!("application shutting down");
        self.router.stop().await;
        for camera in self.cameras.all() {
            let _ = self.relay.teardown(camera.id).await;
        }
        self.supervisor.kill_all().await;
    }
}

fn camera_id_from_config(raw: &str) -> CameraId {
    CameraId(uuid::Uuid::parse_str(raw).unwrap_or_else(|_| uuid::Uuid::new_v4()))
}

fn camera_from_config(cfg: &crate::config::CameraConfig) -> crate::error::Result<Camera> {
    Ok(Camera {
        id: camera_id_from_config(&cfg.id),
        name: cfg.name.clone(),
        stream_url: url::Url::parse(&cfg.stream_url)?,
        onvif_url: cfg.onvif_url.as_ref().map(|u| url::Url::parse(u)).transpose()?,
        onvif_username: cfg.onvif_username.clone(),
        onvif_password: cfg.onvif_password.clone(),
    })
}

fn destination_from_config(cfg: &crate::config::DestinationConfig) -> crate::error::Result<Destination> {
    Ok(Destination {
        id: DestinationId(uuid::Uuid::parse_str(&cfg.id).unwrap_or_else(|_| uuid::Uuid::new_v4())),
        name: cfg.name.clone(),
        rtmp_url: url::Url::parse(&cfg.rtmp_url)?,
        profile: EncodingProfile::Res1080p30,
        watchdog: WatchdogConfig {
            enabled: cfg.watchdog_enabled,
            check_interval_s: cfg.watchdog_check_interval_s,
            consecutive_failure_threshold: cfg.watchdog_failure_threshold,
            live_verification_url: cfg
                .live_verification_url
                .as_ref()
                .map(|u| url::Url::parse(u))
                .transpose()?,
        },
    })
}
