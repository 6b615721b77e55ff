//! Capture through an independent browser session

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::traits::{CaptureOptions, CapturedPage, FullPageCapture};
use crate::session::{PageSession, ScreenshotOptions, SessionManager};
use crate::Error;

/// Full-page screenshot from a fresh session on the configured browser
pub struct BrowserCapture {
    sessions: Arc<dyn SessionManager>,
    dismiss_wait: Duration,
}

impl std::fmt::Debug for BrowserCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserCapture")
            .field("dismiss_wait", &self.dismiss_wait)
            .finish()
    }
}

impl BrowserCapture {
    pub fn new(sessions: Arc<dyn SessionManager>) -> Self {
        Self {
            sessions,
            dismiss_wait: Duration::from_millis(500),
        }
    }

    pub fn with_dismiss_wait(mut self, wait: Duration) -> Self {
        self.dismiss_wait = wait;
        self
    }

    /// Click every visible match of the modal-close selectors
    async fn dismiss_overlays(&self, session: &PageSession, selectors: &[String]) -> usize {
        let mut clicked = 0;
        for selector in selectors {
            let elements = match session.page().query_selector_all(selector).await {
                Ok(elements) => elements,
                Err(e) => {
                    debug!("Modal selector '{}' failed: {}", selector, e);
                    continue;
                }
            };
            for element in elements {
                if !element.is_visible().await.unwrap_or(false) {
                    continue;
                }
                match element.click().await {
                    Ok(()) => clicked += 1,
                    Err(e) => debug!("Click on '{}' failed: {}", selector, e),
                }
            }
        }

        if clicked > 0 {
            debug!("Dismissed {} overlays", clicked);
            tokio::time::sleep(self.dismiss_wait).await;
        }
        clicked
    }

    async fn capture_session(&self, session: &PageSession, options: &CaptureOptions) -> Result<CapturedPage, Error> {
        self.sessions.stabilize(session).await?;
        self.dismiss_overlays(session, &options.modal_close_selectors).await;

        let image_png = session.page().screenshot(ScreenshotOptions::full_page()).await?;
        let html = if options.capture_html {
            match session.page().content().await {
                Ok(html) => Some(html),
                Err(e) => {
                    warn!("Page content unavailable for {}: {}", session.url(), e);
                    None
                }
            }
        } else {
            None
        };

        Ok(CapturedPage { image_png, html })
    }
}

#[async_trait]
impl FullPageCapture for BrowserCapture {
    fn name(&self) -> &str {
        "browser"
    }

    async fn capture(&self, url: &str, options: &CaptureOptions) -> Result<CapturedPage, Error> {
        let session = self
            .sessions
            .open(url)
            .await
            .map_err(|e| Error::capture_failed(format!("{}: {}", url, e)))?;

        let result = self.capture_session(&session, options).await;
        if let Err(e) = session.close().await {
            warn!("Failed to close capture session for {}: {}", url, e);
        }

        let page = result.map_err(|e| Error::capture_failed(format!("{}: {}", url, e)))?;
        info!("Captured {} ({} bytes) in browser", url, page.image_png.len());
        Ok(page)
    }
}
