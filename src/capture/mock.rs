//! Static capture for testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::traits::{CaptureOptions, CapturedPage, FullPageCapture};
use crate::session::mock::render_png;
use crate::Error;

/// Returns the same page for every URL, or always fails
#[derive(Debug)]
pub struct StaticCapture {
    page: Result<CapturedPage, String>,
    latency: Duration,
    calls: AtomicUsize,
}

impl StaticCapture {
    pub fn new(page: CapturedPage) -> Self {
        Self {
            page: Ok(page),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Generated raster of `width` x `height` whose rows encode their offset
    pub fn generated(width: u32, height: u32) -> Result<Self, Error> {
        Ok(Self::new(CapturedPage {
            image_png: render_png(width, height, 0)?,
            html: Some(format!("<html><body data-height=\"{}\"></body></html>", height)),
        }))
    }

    pub fn failing(message: &str) -> Self {
        Self {
            page: Err(message.to_string()),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer only after `latency`
    pub fn slow(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FullPageCapture for StaticCapture {
    fn name(&self) -> &str {
        "static"
    }

    async fn capture(&self, url: &str, _options: &CaptureOptions) -> Result<CapturedPage, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.page
            .clone()
            .map_err(|message| Error::capture_failed(format!("{}: {}", url, message)))
    }
}
