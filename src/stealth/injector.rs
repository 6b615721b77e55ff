//! Anti-detection overrides applied to a fresh tab before navigation

use serde_json::json;
use tracing::debug;

use crate::cdp::CdpClient;
use crate::config::BrowserConfig;
use crate::Error;

use super::user_agents::{platform_for, random_desktop_user_agent};

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Stealth overrides for one tab
#[derive(Debug, Clone)]
pub struct StealthInjector {
    user_agent: String,
    accept_language: String,
}

impl StealthInjector {
    pub fn new(user_agent: impl Into<String>, accept_language: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            accept_language: accept_language.into(),
        }
    }

    /// Configured user agent, or one picked from the desktop pool
    pub fn from_config(config: &BrowserConfig) -> Self {
        let user_agent = config
            .user_agent
            .clone()
            .filter(|ua| !ua.is_empty())
            .unwrap_or_else(|| random_desktop_user_agent().to_string());
        Self::new(user_agent, config.accept_language.clone())
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Languages list exposed through `navigator.languages`
    fn languages(&self) -> Vec<String> {
        self.accept_language
            .split(',')
            .map(|part| part.split(';').next().unwrap_or_default().trim().to_string())
            .filter(|lang| !lang.is_empty())
            .collect()
    }

    /// Script run in every new document before page scripts
    pub fn init_script(&self) -> String {
        let languages = serde_json::to_string(&self.languages()).unwrap_or_else(|_| "[\"en-US\"]".to_string());
        format!(
            r#"(function() {{
                Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
                Object.defineProperty(navigator, 'languages', {{ get: () => {languages} }});
                Object.defineProperty(navigator, 'plugins', {{ get: () => [
                    {{ name: "Chrome PDF Plugin", filename: "internal-pdf-viewer", description: "Portable Document Format", length: 1 }},
                    {{ name: "Chrome PDF Viewer", filename: "mhjfbmdgcfjbbpaeojofohoefgiehjai", description: "", length: 1 }}
                ]}});
                window.chrome = window.chrome || {{ runtime: {{}} }};
            }})();"#
        )
    }

    /// Apply user agent, extra headers and the init script
    pub async fn apply(&self, client: &dyn CdpClient) -> Result<(), Error> {
        debug!("Applying stealth overrides with user agent {}", self.user_agent);

        client
            .call_method(
                "Network.setUserAgentOverride",
                json!({
                    "userAgent": self.user_agent,
                    "acceptLanguage": self.accept_language,
                    "platform": platform_for(&self.user_agent),
                }),
            )
            .await?;

        client
            .call_method(
                "Network.setExtraHTTPHeaders",
                json!({
                    "headers": {
                        "Accept-Language": self.accept_language,
                        "Accept": ACCEPT,
                    }
                }),
            )
            .await?;

        client
            .call_method(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": self.init_script() }),
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::{CdpClientImpl, MockCdpConnection};
    use crate::stealth::DESKTOP_USER_AGENTS;
    use std::sync::Arc;

    #[test]
    fn test_configured_agent_wins() {
        let config = BrowserConfig {
            user_agent: Some("Custom/1.0".to_string()),
            ..BrowserConfig::default()
        };
        assert_eq!(StealthInjector::from_config(&config).user_agent(), "Custom/1.0");

        let injector = StealthInjector::from_config(&BrowserConfig::default());
        assert!(DESKTOP_USER_AGENTS.contains(&injector.user_agent()));
    }

    #[test]
    fn test_init_script_masks_automation() {
        let script = StealthInjector::new("UA", "en-US,en;q=0.9").init_script();
        assert!(script.contains("'webdriver'"));
        assert!(script.contains(r#"["en-US","en"]"#));
        assert!(script.contains("'plugins'"));
    }

    #[tokio::test]
    async fn test_apply_sends_overrides_in_order() {
        let connection = Arc::new(MockCdpConnection::new());
        let client = CdpClientImpl::new(connection.clone());

        StealthInjector::new(DESKTOP_USER_AGENTS[3], "en-US,en;q=0.9")
            .apply(&client)
            .await
            .unwrap();

        assert_eq!(
            connection.methods(),
            vec![
                "Network.setUserAgentOverride",
                "Network.setExtraHTTPHeaders",
                "Page.addScriptToEvaluateOnNewDocument",
            ]
        );
        let ua = connection.last_params("Network.setUserAgentOverride").unwrap();
        assert_eq!(ua["platform"], "MacIntel");
        let headers = connection.last_params("Network.setExtraHTTPHeaders").unwrap();
        assert_eq!(headers["headers"]["Accept-Language"], "en-US,en;q=0.9");
    }
}
