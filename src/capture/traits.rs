//! Full-page capture traits

use async_trait::async_trait;

use crate::config::CaptureConfig;
use crate::Error;

/// Options for one capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Clicked before capturing to dismiss overlays
    pub modal_close_selectors: Vec<String>,
    /// Also return the serialized document
    pub capture_html: bool,
}

impl CaptureOptions {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            modal_close_selectors: config.modal_close_selectors.clone(),
            capture_html: config.capture_html,
        }
    }
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default())
    }
}

/// Full-page raster and optional HTML of a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPage {
    pub image_png: Vec<u8>,
    pub html: Option<String>,
}

/// Full-page capture backend
///
/// Any failure is reported as `Error::CaptureFailed`.
#[async_trait]
pub trait FullPageCapture: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn capture(&self, url: &str, options: &CaptureOptions) -> Result<CapturedPage, Error>;
}
