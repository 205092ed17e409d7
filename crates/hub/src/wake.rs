//! Best-effort wake-up probe for hubs hosted on scale-to-zero platforms.

use std::time::Duration;

use parley_core::config::HubConfig;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct WakeProbe {
    client: reqwest::Client,
    target: Option<Url>,
}

impl WakeProbe {
    /// Build the probe from hub settings.
    ///
    /// A disabled probe or an underivable health URL yields a probe whose
    /// [`poke`](Self::poke) does nothing.
    pub fn new(config: &HubConfig) -> Self {
        let timeout = Duration::from_secs(config.wake_timeout_seconds);
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(error) => {
                warn!(error = %error, "Failed to build wake probe client, using defaults");
                reqwest::Client::new()
            }
        };

        let target = if config.wake_probe {
            match config.health_url() {
                Ok(url) => Some(url),
                Err(error) => {
                    warn!(error = %error, "Wake probe disabled: cannot derive health URL");
                    None
                }
            }
        } else {
            None
        };

        Self { client, target }
    }

    pub fn target(&self) -> Option<&Url> {
        self.target.as_ref()
    }

    /// GET the health endpoint and ignore the body.
    ///
    /// Returns whether the hub answered with a success status. Failures are
    /// logged and never propagated.
    pub async fn poke(&self) -> bool {
        let Some(url) = &self.target else {
            return false;
        };

        debug!(url = %url, "Waking hub");
        match self.client.get(url.clone()).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(status = %response.status(), "Hub is awake");
                true
            }
            Ok(response) => {
                warn!(url = %url, status = %response.status(), "Wake probe returned non-success status");
                false
            }
            Err(error) => {
                warn!(url = %url, error = %error, "Wake probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_in_config_has_no_target() {
        let mut config = HubConfig::new("https://chat.example.com/hubs/chat");
        config.wake_probe = false;
        assert!(WakeProbe::new(&config).target().is_none());
    }

    #[test]
    fn target_is_health_url_on_hub_origin() {
        let config = HubConfig::new("wss://chat.example.com/hubs/chat");
        let probe = WakeProbe::new(&config);
        assert_eq!(
            probe.target().map(Url::as_str),
            Some("https://chat.example.com/health")
        );
    }

    #[tokio::test]
    async fn disabled_probe_reports_not_awake() {
        let mut config = HubConfig::new("https://chat.example.com/hubs/chat");
        config.wake_probe = false;
        assert!(!WakeProbe::new(&config).poke().await);
    }
}
