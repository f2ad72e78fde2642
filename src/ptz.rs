// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! PTZ Controller (C3): drives ONVIF pan/tilt/zoom on cameras that support
//! it. A camera without an `onvif_url` is simply not PTZ-capable and every
//! operation here is a no-op for it (§4.3).
//!
//! Concurrent requests for the same `(camera_id, preset_id)` are coalesced
//! onto a single in-flight request rather than issued twice — grounded in
//! the same single-flight shape the teacher uses for camera connection
//! attempts (`supervised_connect` never starts a second connection while
//! one is outstanding).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::{CoreError, Result};
use crate::model::{Camera, Preset, PresetId};

const ONVIF_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SETTLE: Duration = Duration::from_millis(3000);

#[derive(Clone)]
pub struct PtzController {
    client: Client,
    inflight: Arc<Mutex<HashMap<(String, String), broadcast::Sender<()>>>>,
}

impl PtzController {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(ONVIF_TIMEOUT)
                .build()
                .expect("reqwest client"),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Capture the camera's current PTZ position as a new [`Preset`]. A
    /// non-PTZ camera returns `PresetUnreachable`-free success is not
    /// possible without a position to read, so this is the one operation
    /// that is genuinely unavailable (not merely a no-op) for non-PTZ
    /// cameras.
    pub async fn capture_preset(&self, camera: &Camera, name: String) -> Result<Preset> {
        let Some(onvif_url) = &camera.onvif_url else {
            return Err(CoreError::PresetUnreachable {
                camera_id: camera.id.to_string(),
                preset_id: String::new(),
                reason: "camera has no onvif_url".into(),
            });
        };

        let envelope = soap_envelope(
            "<GetStatus xmlns=\"http://www.onvif.org/ver20/ptz/wsdl\"><ProfileToken>Profile_1</ProfileToken></GetStatus>",
        );
        let body = self
            .post_soap(onvif_url.as_str(), camera, &envelope)
            .await
            .map_err(|e| CoreError::PresetUnreachable {
                camera_id: camera.id.to_string(),
                preset_id: String::new(),
                reason: e.to_string(),
            })?;

        let (pan, tilt, zoom) = parse_ptz_status(&body).unwrap_or((0.0, 0.0, 0.0));

        Ok(Preset {
            id: PresetId::new(),
            camera_id: camera.id,
            name,
            pan,
            tilt,
            zoom,
        })
    }

    /// Move to a previously captured preset and wait [`DEFAULT_SETTLE`]
    /// for the mechanism to settle. Failure is non-fatal: the caller's cue
    /// proceeds regardless (§4.3), so this returns `Ok(())` even on
    /// failure but logs a warning — callers that need the distinction use
    /// [`Self::go_to`] directly and inspect its `Result`.
    pub async fn move_to_preset(&self, camera: &Camera, preset: &Preset) -> Result<()> {
        if !camera.is_ptz() {
            return Ok(());
        }

        let key = (camera.id.to_string(), preset.id.to_string());
        let (should_issue, mut rx) = {
            let mut inflight = self.inflight.lock();
            if let Some(tx) = inflight.get(&key) {
                (false, tx.subscribe())
            } else {
                let (tx, rx) = broadcast::channel(1);
                inflight.insert(key.clone(), tx);
                (true, rx)
            }
        };

        if !should_issue {
            let _ = rx.recv().await;
            return Ok(());
        }

        let result = self.go_to(camera, preset.pan, preset.tilt, preset.zoom).await;
        if let Err(e) = &result {
            warn!(camera = %camera.id, preset = %preset.id, error = %e, "preset unreachable, cue proceeds without PTZ move");
        }

        tokio::time::sleep(DEFAULT_SETTLE).await;

        if let Some(tx) = self.inflight.lock().remove(&key) {
            let _ = tx.send(());
        }

        Ok(())
    }

    /// Issue an absolute move and return the actual ONVIF outcome
    /// (unlike [`Self::move_to_preset`], failures here are surfaced).
    pub async fn go_to(&self, camera: &Camera, pan: f64, tilt: f64, zoom: f64) -> Result<()> {
        let Some(onvif_url) = &camera.onvif_url else {
            return Ok(());
        };

        let envelope = soap_envelope(&format!(
            "<AbsoluteMove xmlns=\"http://www.onvif.org/ver20/ptz/wsdl\">\
               <ProfileToken>Profile_1</ProfileToken>\
               <Position><PanTilt x=\"{pan}\" y=\"{tilt}\" xmlns=\"http://www.onvif.org/ver10/schema\"/>\
               <Zoom x=\"{zoom}\" xmlns=\"http://www.onvif.org/ver10/schema\"/></Position>\
             </AbsoluteMove>"
        ));

        self.post_soap(onvif_url.as_str(), camera, &envelope)
            .await
            .map(|_| ())
            .map_err(|e| CoreError::PresetUnreachable {
                camera_id: camera.id.to_string(),
                preset_id: String::new(),
                reason: e.to_string(),
            })
    }

    async fn post_soap(&self, url: &str, camera: &Camera, envelope: &str) -> Result<String> {
        let mut req = self
            .client
            .post(url)
            .header("Content-Type", "application/soap+xml; charset=utf-8")
            .body(envelope.to_string());

        if let (Some(user), Some(pass)) = (&camera.onvif_username, &camera.onvif_password) {
            req = req.basic_auth(user, Some(pass));
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(CoreError::CameraUnreachable {
                camera_id: camera.id.to_string(),
                reason: format!("onvif endpoint returned {status}"),
            });
        }
        Ok(text)
    }
}

impl Default for PtzController {
    fn default() -> Self {
        Self::new()
    }
}

fn soap_envelope(body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\">\
         <s:Body>{body}</s:Body></s:Envelope>"
    )
}

/// Pull `x`/`y` pan-tilt and zoom `x` out of a `GetStatus` SOAP response.
/// Tolerant of whatever attribute ordering/whitespace a given camera's
/// ONVIF stack emits — this is a best-effort scrape, not a validating
/// parser, since the CORE only needs the three numbers back.
fn parse_ptz_status(body: &str) -> Option<(f64, f64, f64)> {
    let pantilt = extract_tag_attrs(body, "PanTilt")?;
    let zoom = extract_tag_attrs(body, "Zoom");
    let pan = pantilt.get("x")?.parse().ok()?;
    let tilt = pantilt.get("y")?.parse().ok()?;
    let zoom = zoom
        .and_then(|m| m.get("x").cloned())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);
    Some((pan, tilt, zoom))
}

fn extract_tag_attrs(body: &str, tag: &str) -> Option<HashMap<String, String>> {
    let start = body.find(&format!("<{tag}"))?;
    let end = body[start..].find('>').map(|i| start + i)?;
    let tag_text = &body[start..end];

    let mut attrs = HashMap::new();
    for part in tag_text.split_whitespace().skip(1) {
        if let Some((k, v)) = part.split_once('=') {
            attrs.insert(k.to_string(), v.trim_matches('"').to_string());
        }
    }
    Some(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pantilt_and_zoom() {
        let body = r#"<PanTilt x="0.25" y="-0.5" space="..."/><Zoom x="0.8" space="..."/>"#;
        let (pan, tilt, zoom) = parse_ptz_status(body).unwrap();
        assert_eq!(pan, 0.25);
        assert_eq!(tilt, -0.5);
        assert_eq!(zoom, 0.8);
    }

    #[test]
    fn missing_pantilt_returns_none() {
        assert!(parse_ptz_status("<Zoom x=\"0.8\"/>").is_none());
    }

    #[tokio::test]
    async fn move_to_preset_is_noop_for_non_ptz_camera() {
        let ptz = PtzController::new();
        let camera = Camera {
            id: crate::model::CameraId::new(),
            name: "fixed".into(),
            stream_url: url::Url::parse("rtsp://127.0.0.1/cam").unwrap(),
            onvif_url: None,
            onvif_username: None,
            onvif_password: None,
        };
        let preset = Preset {
            id: PresetId::new(),
            camera_id: camera.id,
            name: "home".into(),
            pan: 0.0,
            tilt: 0.0,
            zoom: 0.0,
        };
        assert!(ptz.move_to_preset(&camera, &preset).await.is_ok());
    }
}
