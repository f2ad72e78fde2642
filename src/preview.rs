// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Preview Server Adapter (C7): a thin client over the local RTMP→HLS
//! muxer the appliance runs for low-latency local preview. This module
//! does not run the muxer — it only resolves its publish/playback URLs
//! and checks whether it is alive, the same "external media server"
//! relationship the teacher's `hls.rs` has to its own segment store,
//! generalized here to a remote process instead of on-disk segments.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::config::PreviewConfig;
use crate::error::Result;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct PreviewServerAdapter {
    config: PreviewConfig,
    client: Client,
    /// Only set by [`Self::new_for_test`]; bypasses the network call so
    /// [`crate::router`] tests can exercise the health gate without a
    /// real muxer running.
    forced_health: Option<bool>,
}

impl PreviewServerAdapter {
    pub fn new(config: PreviewConfig) -> Self {
        Self {
            config,
            client: Client::builder()
                .timeout(HEALTH_TIMEOUT)
                .build()
                .expect("reqwest client"),
            forced_health: None,
        }
    }

    #[cfg(test)]
    pub fn new_for_test(healthy: bool) -> Self {
        Self {
            config: PreviewConfig::default(),
            client: Client::new(),
            forced_health: Some(healthy),
        }
    }

    /// `true` if the muxer's admin endpoint answers at all — a `200` or
    /// the documented "auth required" `401`/`403` both count as healthy
    /// (§4.7); only a transport error or any other status is unhealthy.
    pub async fn health(&self) -> Result<bool> {
        if let Some(forced) = self.forced_health {
            return Ok(forced);
        }

        let url = format!(
            "http://{}:{}/",
            self.config.host, self.config.api_port
        );
        let resp = self.client.get(&url).send().await;
        match resp {
            Ok(r) => {
                let status = r.status();
                let healthy = status.is_success()
                    || status.as_u16() == 401
                    || status.as_u16() == 403;
                debug!(%status, healthy, "preview admin health check");
                Ok(healthy)
            }
            Err(e) => {
                debug!(error = %e, "preview admin health check failed");
                Ok(false)
            }
        }
    }

    pub fn publish_url(&self) -> Result<Url> {
        Url::parse(&format!(
            "rtmp://{}:{}/preview/stream",
            self.config.host, self.config.rtmp_port
        ))
        .map_err(crate::error::CoreError::from)
    }

    pub fn playback_url(&self) -> Result<Url> {
        Url::parse(&format!(
            "http://{}:{}/preview/index.m3u8",
            self.config.host, self.config.hls_port
        ))
        .map_err(crate::error::CoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forced_health_bypasses_network() {
        let healthy = PreviewServerAdapter::new_for_test(true);
        assert!(healthy.health().await.unwrap());

        let unhealthy = PreviewServerAdapter::new_for_test(false);
        assert!(!unhealthy.health().await.unwrap());
    }

    #[test]
    fn publish_and_playback_urls_are_well_formed() {
        let adapter = PreviewServerAdapter::new(PreviewConfig::default());
        assert_eq!(adapter.publish_url().unwrap().scheme(), "rtmp");
        assert_eq!(adapter.playback_url().unwrap().scheme(), "http");
        assert!(adapter.playback_url().unwrap().path().ends_with(".m3u8"));
    }
}
