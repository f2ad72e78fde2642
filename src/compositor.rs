// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Overlay Compositor Builder (C4): pure translation from an execution
//! plan (the active video source plus whatever overlays are currently
//! visible) into an [`EncoderInvocation`]. No side effects — given the
//! same plan it always emits the same argv, which is what makes it safe
//! to call from [`crate::executor`] on every cue boundary.
//!
//! The ffmpeg invocation shape (one `-filter_complex` building a single
//! composited output fanned out to every destination with repeated
//! `-f flv <url>` outputs) follows the same "one encode, many outputs"
//! pattern the restreamer examples in the pack use for straight relays,
//! generalized here to a filter graph instead of `-c copy`.

use crate::model::{AssetId, AssetKind, EncodingProfile, Geometry};
use crate::supervisor::EncoderInvocation;
use url::Url;

#[derive(Debug, Clone)]
pub struct VisibleOverlay {
    pub asset_id: AssetId,
    pub asset_path: std::path::PathBuf,
    pub asset_kind: AssetKind,
    pub geometry: Geometry,
}

/// Everything the compositor needs to build one encoder invocation. The
/// executor rebuilds this at every cue boundary and calls
/// [`OverlayCompositorBuilder::build`] again, then explicitly stops and
/// restarts the supervised process under the same `stream_id` (§4.5 step
/// 4) — the builder itself never decides whether a restart is needed.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub stream_id: String,
    /// Local relay URL for the currently active video track camera, or
    /// `None` if the camera is unreachable (falls back to a black frame).
    pub active_camera_relay_url: Option<Url>,
    pub overlays: Vec<VisibleOverlay>,
    pub profile: EncodingProfile,
    pub destination_urls: Vec<Url>,
}

pub struct OverlayCompositorBuilder;

impl OverlayCompositorBuilder {
    pub fn build(plan: &ExecutionPlan) -> EncoderInvocation {
        let (w, h) = plan.profile.resolution();
        let fps = plan.profile.fps();

        let mut argv: Vec<String> = Vec::new();
        let mut input_idx = 0usize;

        // Input 0: the active camera relay, or a black frame fallback.
        match &plan.active_camera_relay_url {
            Some(url) => {
                argv.extend(["-i".into(), url.to_string()]);
            }
            None => {
                argv.extend([
                    "-f".into(),
                    "lavfi".into(),
                    "-i".into(),
                    format!("color=c=black:s={w}x{h}:r={fps}"),
                ]);
            }
        }
        let video_input = input_idx;
        input_idx += 1;

        // Input 1: a persistent silent audio track so every destination
        // gets continuous audio regardless of camera boundaries (§4.4).
        argv.extend(["-f".into(), "lavfi".into(), "-i".into(), "anullsrc=r=48000:cl=stereo".into()]);
        let audio_input = input_idx;
        input_idx += 1;

        // One input per visible overlay asset.
        let overlay_inputs: Vec<usize> = plan
            .overlays
            .iter()
            .map(|ov| {
                let idx = input_idx;
                input_idx += 1;
                match ov.asset_kind {
                    AssetKind::Image => {
                        argv.extend(["-loop".into(), "1".into(), "-i".into(), ov.asset_path.display().to_string()]);
                    }
                    AssetKind::Video => {
                        argv.extend(["-i".into(), ov.asset_path.display().to_string()]);
                    }
                }
                idx
            })
            .collect();

        // Build the filter graph: overlay each asset in turn onto the
        // running video label, keyed by normalized [0,1] geometry scaled
        // to the profile's resolution.
        let mut filter = String::new();
        let mut video_label = format!("[{video_input}:v]");
        for (i, (ov, input)) in plan.overlays.iter().zip(overlay_inputs.iter()).enumerate() {
            let x = (ov.geometry.x * w as f64).round() as i64;
            let y = (ov.geometry.y * h as f64).round() as i64;

            // §4.4: stretch to both dimensions when `height` is given,
            // otherwise scale proportionally from `width` alone.
            let scaled_label = format!("[sc{i}]");
            let target_w = (ov.geometry.width * w as f64).round() as i64;
            let scale = match ov.geometry.height {
                Some(height) => {
                    let target_h = (height * h as f64).round() as i64;
                    format!("scale={target_w}:{target_h}")
                }
                None => format!("scale={target_w}:-1"),
            };
            filter.push_str(&format!("[{input}:v]{scale}{scaled_label};"));

            let out_label = format!("[ov{i}]");
            filter.push_str(&format!(
                "{video_label}{scaled_label}overlay={x}:{y}{out_label};",
            ));
            video_label = out_label;
        }
        // Append a final passthrough step renaming whatever the last label
        // is (the base video, or the last overlay's output) to `vout`.
        filter.push_str(&format!("{video_label}null[vout]"));

        argv.extend(["-filter_complex".into(), filter]);
        argv.extend(["-map".into(), "[vout]".into(), "-map".into(), format!("{audio_input}:a")]);

        argv.extend([
            "-c:v".into(), "libx264".into(),
            "-b:v".into(), format!("{}k", plan.profile.video_kbps()),
            "-r".into(), fps.to_string(),
            "-c:a".into(), "aac".into(),
            "-ar".into(), "48000".into(),
        ]);

        for dest in &plan.destination_urls {
            argv.extend(["-f".into(), "flv".into(), dest.to_string()]);
        }

        EncoderInvocation {
            stream_id: plan.stream_id.clone(),
            argv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_plan() -> ExecutionPlan {
        ExecutionPlan {
            stream_id: "exec-1".into(),
            active_camera_relay_url: Some(Url::parse("rtmp://127.0.0.1:1935/relay/cam1").unwrap()),
            overlays: vec![],
            profile: EncodingProfile::Res720p30,
            destination_urls: vec![
                Url::parse("rtmp://a.example/live/key1").unwrap(),
                Url::parse("rtmp://b.example/live/key2").unwrap(),
            ],
        }
    }

    #[test]
    fn fans_out_to_every_destination() {
        let inv = OverlayCompositorBuilder::build(&base_plan());
        let flv_count = inv.argv.iter().filter(|a| a.as_str() == "flv").count();
        assert_eq!(flv_count, 2);
    }

    #[test]
    fn falls_back_to_black_when_camera_unreachable() {
        let mut plan = base_plan();
        plan.active_camera_relay_url = None;
        let inv = OverlayCompositorBuilder::build(&plan);
        assert!(inv.argv.iter().any(|a| a.starts_with("color=c=black")));
    }

    #[test]
    fn includes_one_overlay_input_per_visible_asset() {
        let mut plan = base_plan();
        plan.overlays.push(VisibleOverlay {
            asset_id: AssetId::new(),
            asset_path: "/assets/logo.png".into(),
            asset_kind: AssetKind::Image,
            geometry: Geometry { x: 0.1, y: 0.1, width: 0.2, height: None },
        });
        let inv = OverlayCompositorBuilder::build(&plan);
        assert!(inv.argv.iter().any(|a| a == "/assets/logo.png"));
        assert!(inv.argv.iter().any(|a| a.contains("overlay=")));
        let filter = inv.argv.iter().find(|a| a.contains("overlay=")).unwrap();
        assert!(filter.contains("scale=256:-1"), "proportional scale, got {filter}");
    }

    #[test]
    fn stretches_overlay_when_both_dimensions_given() {
        let mut plan = base_plan();
        plan.overlays.push(VisibleOverlay {
            asset_id: AssetId::new(),
            asset_path: "/assets/banner.png".into(),
            asset_kind: AssetKind::Image,
            geometry: Geometry { x: 0.0, y: 0.0, width: 1.0, height: Some(0.1) },
        });
        let inv = OverlayCompositorBuilder::build(&plan);
        let filter = inv.argv.iter().find(|a| a.contains("overlay=")).unwrap();
        let (w, h) = EncodingProfile::Res720p30.resolution();
        assert!(filter.contains(&format!("scale={w}:{}", (h as f64 * 0.1).round() as i64)));
    }
}
