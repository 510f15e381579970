//! AlertDispatcher - Threat notifications
//!
//! ## Responsibilities
//!
//! - Threshold gate (`should_notify`)
//! - Payload construction within the broadcast datagram cap
//! - Delivery: UDP broadcast first, then webhooks, then the primary HTTP URL
//! - Test notification for connectivity checks

mod channels;
mod payload;

pub use channels::{broadcast_addresses, local_ipv4, NetworkChannels, NotificationChannel, BROADCAST_PORTS};
pub use payload::{camera_label, detailed_payload, extract_summary, BroadcastPayload, ServerInfo, BROADCAST_CAP};

use crate::models::{AnalysisResult, ThreatLevel};
use std::path::Path;
use std::sync::Arc;

/// Notification settings
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub enabled: bool,
    pub min_level: ThreatLevel,
    /// Primary receiver, tried last
    pub primary_url: Option<String>,
    pub webhook_urls: Vec<String>,
    /// Advertised in payloads so receivers can fetch clips
    pub server_ip: String,
    pub server_port: u16,
    /// Fixed camera name; inferred from the clip path when unset
    pub camera_label: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_level: ThreatLevel::Medium,
            primary_url: None,
            webhook_urls: Vec::new(),
            server_ip: "localhost".to_string(),
            server_port: 8888,
            camera_label: None,
        }
    }
}

pub struct AlertDispatcher {
    config: AlertConfig,
    channels: Arc<dyn NotificationChannel>,
}

impl AlertDispatcher {
    pub fn new(config: AlertConfig, channels: Arc<dyn NotificationChannel>) -> Self {
        tracing::info!(
            server_ip = %config.server_ip,
            port = config.server_port,
            webhooks = config.webhook_urls.len(),
            http = config.primary_url.is_some(),
            min_level = %config.min_level,
            enabled = config.enabled,
            "AlertDispatcher configured"
        );
        Self { config, channels }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            ip: self.config.server_ip.clone(),
            port: self.config.server_port,
            status: None,
        }
    }

    pub fn should_notify(&self, analysis: &AnalysisResult) -> bool {
        if !self.config.enabled {
            tracing::debug!("Notifications disabled");
            return false;
        }
        if !analysis.is_threat_detected() {
            return false;
        }
        let send = analysis.threat_level.ordinal() >= self.config.min_level.ordinal();
        tracing::debug!(
            level = %analysis.threat_level,
            min_level = %self.config.min_level,
            send = send,
            "Notification threshold checked"
        );
        send
    }

    async fn send_webhooks(&self, payload: &serde_json::Value) -> bool {
        let sends = self
            .config
            .webhook_urls
            .iter()
            .map(|url| self.channels.send_webhook(url, payload));
        let delivered = futures::future::join_all(sends)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();

        if delivered == 0 {
            tracing::warn!(total = self.config.webhook_urls.len(), "All webhook notifications failed");
        } else {
            tracing::info!(delivered = delivered, total = self.config.webhook_urls.len(), "Webhook notifications sent");
        }
        delivered > 0
    }

    /// Deliver an alert for `analysis`. True if any channel succeeded.
    pub async fn dispatch(&self, analysis: &AnalysisResult, clip_path_hint: Option<&Path>) -> bool {
        if !self.should_notify(analysis) {
            return false;
        }

        let clip_path = clip_path_hint.unwrap_or_else(|| analysis.clip.path());
        let camera = self
            .config
            .camera_label
            .clone()
            .unwrap_or_else(|| camera_label(Some(clip_path)));
        let server = self.server_info();

        tracing::info!(
            level = %analysis.threat_level,
            confidence = analysis.confidence,
            clip = %clip_path.display(),
            "Sending security alert"
        );

        let broadcast = BroadcastPayload::from_analysis(analysis, Some(clip_path), &camera, &server);
        let mut success = match broadcast.encode(BROADCAST_CAP) {
            Ok(bytes) => self.channels.send_broadcast(&bytes, &BROADCAST_PORTS).await,
            Err(e) => {
                tracing::warn!(error = %e, "Broadcast payload encoding failed");
                false
            }
        };

        if !success && (!self.config.webhook_urls.is_empty() || self.config.primary_url.is_some()) {
            let detailed = detailed_payload(analysis, Some(clip_path), &camera, &server);

            if !self.config.webhook_urls.is_empty() {
                success = self.send_webhooks(&detailed).await;
            }
            if !success {
                if let Some(url) = &self.config.primary_url {
                    success = self.channels.send_http(url, &detailed).await;
                }
            }
        }

        if success {
            tracing::info!(level = %analysis.threat_level, "Security alert sent");
        } else {
            tracing::warn!(level = %analysis.threat_level, "Security alert could not be delivered");
        }
        success
    }

    /// Probe every channel: broadcast, then HTTP, then webhooks
    pub async fn send_test_notification(&self) -> bool {
        tracing::info!(server_ip = %self.config.server_ip, port = self.config.server_port, "Sending test notification");

        let payload = BroadcastPayload::test(&self.server_info());
        let mut success = match payload.encode(BROADCAST_CAP) {
            Ok(bytes) => self.channels.send_broadcast(&bytes, &BROADCAST_PORTS).await,
            Err(e) => {
                tracing::warn!(error = %e, "Test payload encoding failed");
                false
            }
        };

        let json = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Test payload serialization failed");
                return success;
            }
        };
        if !success {
            if let Some(url) = &self.config.primary_url {
                success = self.channels.send_http(url, &json).await;
            }
        }
        if !success && !self.config.webhook_urls.is_empty() {
            success = self.send_webhooks(&json).await;
        }

        if success {
            tracing::info!("Test notification sent");
        } else {
            tracing::warn!("Test notification failed, check network connectivity");
        }
        success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundingBox, Clip, Detection};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingChannels {
        broadcast_ok: bool,
        calls: Mutex<Vec<String>>,
        sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannels {
        async fn send_broadcast(&self, bytes: &[u8], _ports: &[u16]) -> bool {
            self.calls.lock().unwrap().push("broadcast".into());
            self.sizes.lock().unwrap().push(bytes.len());
            self.broadcast_ok
        }

        async fn send_webhook(&self, url: &str, _payload: &serde_json::Value) -> bool {
            self.calls.lock().unwrap().push(format!("webhook {}", url));
            false
        }

        async fn send_http(&self, url: &str, _payload: &serde_json::Value) -> bool {
            self.calls.lock().unwrap().push(format!("http {}", url));
            true
        }
    }

    fn analysis(level: ThreatLevel) -> AnalysisResult {
        let bbox = BoundingBox::new(0, 0, 50, 120, 0.9);
        AnalysisResult {
            clip: Clip {
                file_path: PathBuf::from("/recordings/security_clip_1.mp4"),
                start_time: Utc::now(),
                duration: Duration::from_secs(30),
                frame_count: 900,
                resolution: (1280, 720),
                trigger: Detection::new(Utc::now(), bbox, 0, 0.9).unwrap(),
            },
            text: "A person is walking along the fence line at night.".into(),
            threat_level: level,
            confidence: 0.8,
            keywords: vec!["person".into()],
            timestamp: Utc::now(),
        }
    }

    fn dispatcher(min_level: ThreatLevel, channels: Arc<RecordingChannels>) -> AlertDispatcher {
        let config = AlertConfig {
            min_level,
            primary_url: Some("http://phone/notify".into()),
            webhook_urls: vec!["http://hook/a".into()],
            ..AlertConfig::default()
        };
        AlertDispatcher::new(config, channels)
    }

    #[test]
    fn test_should_notify_threshold() {
        let channels = Arc::new(RecordingChannels::default());
        let high_min = dispatcher(ThreatLevel::High, channels.clone());
        let medium_min = dispatcher(ThreatLevel::Medium, channels.clone());

        assert!(!high_min.should_notify(&analysis(ThreatLevel::Medium)));
        assert!(medium_min.should_notify(&analysis(ThreatLevel::High)));
        assert!(!medium_min.should_notify(&analysis(ThreatLevel::Low)));

        let low_min = dispatcher(ThreatLevel::Low, channels);
        assert!(!low_min.should_notify(&analysis(ThreatLevel::Low)));
    }

    #[test]
    fn test_disabled_never_notifies() {
        let config = AlertConfig {
            enabled: false,
            ..AlertConfig::default()
        };
        let d = AlertDispatcher::new(config, Arc::new(RecordingChannels::default()));
        assert!(!d.should_notify(&analysis(ThreatLevel::Critical)));
    }

    #[tokio::test]
    async fn test_broadcast_success_short_circuits() {
        let channels = Arc::new(RecordingChannels {
            broadcast_ok: true,
            ..Default::default()
        });
        let d = dispatcher(ThreatLevel::Medium, channels.clone());

        assert!(d.dispatch(&analysis(ThreatLevel::High), None).await);
        assert_eq!(*channels.calls.lock().unwrap(), vec!["broadcast"]);
        assert!(channels.sizes.lock().unwrap()[0] <= BROADCAST_CAP);
    }

    #[tokio::test]
    async fn test_falls_through_to_http() {
        let channels = Arc::new(RecordingChannels::default());
        let d = dispatcher(ThreatLevel::Medium, channels.clone());

        assert!(d.dispatch(&analysis(ThreatLevel::Critical), None).await);
        assert_eq!(
            *channels.calls.lock().unwrap(),
            vec!["broadcast", "webhook http://hook/a", "http http://phone/notify"]
        );
    }

    #[tokio::test]
    async fn test_test_notification_order() {
        let channels = Arc::new(RecordingChannels::default());
        let d = dispatcher(ThreatLevel::Medium, channels.clone());

        assert!(d.send_test_notification().await);
        // HTTP succeeds, webhooks are not needed
        assert_eq!(*channels.calls.lock().unwrap(), vec!["broadcast", "http http://phone/notify"]);
    }
}
