//! CDP browser control implementation
//!
//! Browser-level operations through the DevTools HTTP API of a running Chrome.

use super::client::CdpClientImpl;
use super::connection::CdpWebSocketConnection;
use super::traits::*;
use crate::Error;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// CDP browser implementation
#[derive(Debug)]
pub struct CdpBrowserImpl {
    /// Browser endpoint (e.g., "ws://localhost:9222")
    endpoint: String,
    http: reqwest::Client,
}

impl CdpBrowserImpl {
    /// Create a new CDP browser controller
    pub fn new<S: Into<String>>(endpoint: S) -> Self {
        let endpoint = endpoint.into();
        debug!("Creating CDP browser controller for endpoint: {}", endpoint);
        Self {
            endpoint,
            http: reqwest::Client::new(),
        }
    }

    /// HTTP base of the DevTools endpoint
    fn http_endpoint(&self) -> String {
        self.endpoint
            .replace("ws://", "http://")
            .replace("wss://", "https://")
            .trim_end_matches('/')
            .to_string()
    }

    fn unreachable(&self, e: impl std::fmt::Display) -> Error {
        Error::navigation_failed(format!(
            r#"Failed to reach Chrome CDP endpoint at {}.
Please start Chrome with:
  google-chrome --headless=new --remote-debugging-port=9222 --user-data-dir=/tmp/chrome-debug
Original error: {}"#,
            self.endpoint, e
        ))
    }
}

#[async_trait]
impl CdpBrowser for CdpBrowserImpl {
    async fn get_version(&self) -> Result<BrowserVersion, Error> {
        let url = format!("{}/json/version", self.http_endpoint());
        debug!("Fetching browser version from {}", url);

        let version: serde_json::Value = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?
            .json()
            .await?;

        let field = |name: &str| {
            version
                .get(name)
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string()
        };

        Ok(BrowserVersion {
            protocol_version: field("Protocol-Version"),
            product: field("Browser"),
            user_agent: field("User-Agent"),
            js_version: field("V8-Version"),
        })
    }

    async fn create_target(&self, url: &str) -> Result<TargetInfo, Error> {
        let new_url = format!("{}/json/new?{}", self.http_endpoint(), url);
        debug!("Creating new page via HTTP API: {}", new_url);

        let response_text = self
            .http
            .put(&new_url)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?
            .text()
            .await?;

        let target: serde_json::Value = serde_json::from_str(&response_text).map_err(|e| {
            Error::cdp(format!(
                "Failed to parse new target response: {} (response was: {})",
                e, response_text
            ))
        })?;

        let ws_url = target
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::cdp("No webSocketDebuggerUrl in new target response"))?;
        let target_id = target
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| ws_url.rsplit('/').next().unwrap_or_default().to_string());

        info!("Created target {}", target_id);

        Ok(TargetInfo {
            target_id,
            ws_url: ws_url.to_string(),
        })
    }

    async fn close_target(&self, target_id: &str) -> Result<(), Error> {
        let url = format!("{}/json/close/{}", self.http_endpoint(), target_id);
        debug!("Closing target via HTTP API: {}", url);

        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::cdp(format!(
                "Closing target {} returned {}",
                target_id,
                response.status()
            )));
        }
        Ok(())
    }

    async fn create_client(&self, ws_url: &str) -> Result<Arc<dyn CdpClient>, Error> {
        let connection = CdpWebSocketConnection::new(ws_url).await?;
        let client = Arc::new(CdpClientImpl::new(connection));

        for domain in ["Page", "Runtime", "DOM", "Network"] {
            client.enable_domain(domain).await?;
        }

        Ok(client)
    }
}
