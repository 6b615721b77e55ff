//! Hosted render API capture

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::traits::{CaptureOptions, CapturedPage, FullPageCapture};
use crate::config::CaptureConfig;
use crate::Error;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenderResponse {
    render_url: String,
}

/// Capture through `POST {api_base}/v1/render/sync`, then download the render
pub struct RenderApiCapture {
    api_base: String,
    secret: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for RenderApiCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderApiCapture")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl RenderApiCapture {
    pub fn new(api_base: &str, secret: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::configuration(format!("Render API client: {}", e)))?;

        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            secret: secret.into(),
            client,
        })
    }

    pub fn from_config(config: &CaptureConfig) -> Result<Self, Error> {
        let secret = config
            .api_secret
            .clone()
            .ok_or_else(|| Error::configuration("render-api capture requires capture.api_secret"))?;
        Self::new(&config.api_base, secret, Duration::from_millis(config.timeout_ms))
    }

    fn request(url: &str, format: &str, options: &CaptureOptions) -> Value {
        let mut body = json!({
            "url": url,
            "format": format,
            "full_page": format == "png",
        });
        if !options.modal_close_selectors.is_empty() {
            body["click"] = Value::String(options.modal_close_selectors.join(","));
        }
        body
    }

    /// Render and download one artifact
    async fn render(&self, url: &str, format: &str, options: &CaptureOptions) -> Result<bytes::Bytes, Error> {
        let endpoint = format!("{}/v1/render/sync", self.api_base);
        debug!("Requesting {} render of {}", format, url);

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.secret)
            .json(&Self::request(url, format, options))
            .send()
            .await
            .map_err(|e| Error::capture_failed(format!("{} render request failed: {}", format, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::capture_failed(format!("{} render returned {}: {:.200}", format, status, text)));
        }

        let render: RenderResponse = response
            .json()
            .await
            .map_err(|e| Error::capture_failed(format!("Unreadable render response: {}", e)))?;

        let download = self
            .client
            .get(&render.render_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::capture_failed(format!("Download of {} failed: {}", render.render_url, e)))?;

        download
            .bytes()
            .await
            .map_err(|e| Error::capture_failed(format!("Download of {} failed: {}", render.render_url, e)))
    }
}

#[async_trait]
impl FullPageCapture for RenderApiCapture {
    fn name(&self) -> &str {
        "render-api"
    }

    async fn capture(&self, url: &str, options: &CaptureOptions) -> Result<CapturedPage, Error> {
        let image = self.render(url, "png", options).await?;

        let html = if options.capture_html {
            let bytes = self.render(url, "html", options).await?;
            Some(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            None
        };

        info!("Captured {} ({} bytes) via render API", url, image.len());
        Ok(CapturedPage {
            image_png: image.to_vec(),
            html,
        })
    }
}
