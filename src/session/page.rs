//! Page context implementation
//!
//! A browser tab driven over CDP. Load milestones are observed by polling the
//! document; `Page.loadEventFired` ends a load wait early.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cdp::{CdpBrowser, CdpClient, Clip, EvaluationResult, ScreenshotFormat};
use crate::session::element::ElementRefImpl;
use crate::session::traits::{ElementRef, LoadState, PageContext, ScreenshotOptions, Viewport};
use crate::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const SCROLL_HEIGHT_SCRIPT: &str = "Math.max(document.body ? document.body.scrollHeight : 0, \
     document.documentElement ? document.documentElement.scrollHeight : 0)";

const RESOURCE_COUNT_SCRIPT: &str = "performance.getEntriesByType('resource').length";

/// Page context implementation
#[derive(Debug)]
pub struct PageContextImpl {
    id: String,
    target_id: String,
    url: String,
    viewport: Viewport,
    /// Quiet period that counts as network idle
    idle_window: Duration,
    cdp_client: Arc<dyn CdpClient>,
    cdp_browser: Arc<dyn CdpBrowser>,
    /// Set once `Page.loadEventFired` arrives after the last navigation
    load_fired: Arc<watch::Sender<bool>>,
    is_active: AtomicBool,
}

impl PageContextImpl {
    pub fn new(
        target_id: String,
        url: String,
        viewport: Viewport,
        idle_window: Duration,
        cdp_client: Arc<dyn CdpClient>,
        cdp_browser: Arc<dyn CdpBrowser>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target_id,
            url,
            viewport,
            idle_window,
            cdp_client,
            cdp_browser,
            load_fired: Arc::new(watch::Sender::new(false)),
            is_active: AtomicBool::new(true),
        }
    }

    pub fn cdp_client(&self) -> Arc<dyn CdpClient> {
        Arc::clone(&self.cdp_client)
    }

    fn ensure_active(&self) -> Result<(), Error> {
        if self.is_active.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::session_not_found(&self.id))
        }
    }

    /// Apply the configured viewport to the tab
    pub async fn apply_viewport(&self) -> Result<(), Error> {
        self.cdp_client
            .call_method(
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": self.viewport.width,
                    "height": self.viewport.height,
                    "deviceScaleFactor": 1,
                    "mobile": false,
                }),
            )
            .await?;
        Ok(())
    }

    /// Poll `expression` until it is truthy
    ///
    /// Evaluation errors while polling are expected during navigation (the
    /// execution context is replaced) and are retried.
    pub async fn wait_for_function(&self, expression: &str, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        let probe = format!("!!({})", expression);

        loop {
            match self.cdp_client.evaluate(&probe, true).await {
                Ok(EvaluationResult::Bool(true)) => return Ok(()),
                Ok(_) => {}
                Err(e) => debug!("wait_for_function: {} ({})", expression, e),
            }

            if Instant::now() >= deadline {
                return Err(Error::timeout(format!(
                    "'{}' not satisfied within {:?}",
                    expression, timeout
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Flag the next load event; waits fall back to polling when events are unavailable
    async fn watch_load_event(&self) {
        self.load_fired.send_replace(false);
        match self.cdp_client.subscribe_events("Page.loadEventFired").await {
            Ok(mut events) => {
                let load_fired = Arc::clone(&self.load_fired);
                tokio::spawn(async move {
                    while events.recv().await.is_some() {
                        load_fired.send_replace(true);
                    }
                });
            }
            Err(e) => debug!("Load events unavailable for page {}: {}", self.id, e),
        }
    }

    /// Load event or `readyState === "complete"`, whichever comes first
    async fn wait_for_load(&self, timeout: Duration) -> Result<(), Error> {
        let mut fired = self.load_fired.subscribe();
        let load_event = tokio::time::timeout(timeout, async move { fired.wait_for(|fired| *fired).await.is_ok() });

        tokio::select! {
            Ok(true) = load_event => {
                debug!("Page {} load event fired", self.id);
                Ok(())
            }
            result = self.wait_for_function("document.readyState === 'complete'", timeout) => result,
        }
    }

    /// Resource-timing count stable for the idle window
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        let mut last_count: Option<u64> = None;
        let mut quiet_since = Instant::now();

        loop {
            let count = self
                .cdp_client
                .evaluate(RESOURCE_COUNT_SCRIPT, false)
                .await
                .ok()
                .and_then(|r| r.as_f64())
                .map(|n| n as u64);

            let now = Instant::now();
            if count.is_none() || count != last_count {
                last_count = count;
                quiet_since = now;
            } else if now.duration_since(quiet_since) >= self.idle_window {
                debug!("Network idle at {} resources", count.unwrap_or_default());
                return Ok(());
            }

            if now >= deadline {
                return Err(Error::timeout(format!("network not idle within {:?}", timeout)));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn document_height(&self) -> Result<f64, Error> {
        self.cdp_client
            .evaluate(SCROLL_HEIGHT_SCRIPT, false)
            .await?
            .as_f64()
            .ok_or_else(|| Error::script_execution_failed("scrollHeight is not a number"))
    }

    async fn document_root(&self) -> Result<i64, Error> {
        let document = self
            .cdp_client
            .call_method("DOM.getDocument", json!({ "depth": 0 }))
            .await?;

        document
            .get("root")
            .and_then(|r| r.get("nodeId"))
            .and_then(|id| id.as_i64())
            .ok_or_else(|| Error::cdp("DOM.getDocument returned no root node"))
    }
}

#[async_trait]
impl PageContext for PageContextImpl {
    fn id(&self) -> &str {
        &self.id
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), Error> {
        self.ensure_active()?;
        let started = Instant::now();
        self.watch_load_event().await;

        tokio::time::timeout(timeout, self.cdp_client.navigate(url))
            .await
            .map_err(|_| Error::navigation_failed(format!("{}: no response within {:?}", url, timeout)))??;

        let remaining = timeout.saturating_sub(started.elapsed());
        self.wait_for_load_state(LoadState::DomContentLoaded, remaining)
            .await
            .map_err(|e| Error::navigation_failed(format!("{}: {}", url, e)))?;

        info!("Page {} interactive after {:?}", self.id, started.elapsed());
        Ok(())
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<(), Error> {
        self.ensure_active()?;
        match state {
            LoadState::DomContentLoaded => {
                self.wait_for_function("document.readyState !== 'loading'", timeout)
                    .await
            }
            LoadState::Load => self.wait_for_load(timeout).await,
            LoadState::NetworkIdle => self.wait_for_network_idle(timeout).await,
        }
    }

    async fn evaluate(&self, script: &str) -> Result<EvaluationResult, Error> {
        self.ensure_active()?;
        self.cdp_client.evaluate(script, true).await
    }

    async fn query_selector_all(&self, selector: &str) -> Result<Vec<Arc<dyn ElementRef>>, Error> {
        self.ensure_active()?;
        let root = self.document_root().await?;
        ElementRefImpl::query_all(&self.cdp_client, root, selector).await
    }

    async fn scroll_to(&self, y: f64) -> Result<(), Error> {
        self.ensure_active()?;
        self.cdp_client
            .evaluate(&format!("window.scrollTo(0, {})", y), false)
            .await?;
        Ok(())
    }

    async fn scroll_height(&self) -> Result<f64, Error> {
        self.ensure_active()?;
        self.document_height().await
    }

    async fn screenshot(&self, options: ScreenshotOptions) -> Result<Vec<u8>, Error> {
        self.ensure_active()?;

        let clip = match (options.clip, options.full_page) {
            (Some(clip), _) => Some(clip),
            (None, true) => {
                let height = self.document_height().await?;
                Some(Clip::new(0.0, 0.0, f64::from(self.viewport.width), height))
            }
            (None, false) => None,
        };

        self.cdp_client
            .screenshot(ScreenshotFormat::Png, clip, clip.is_some())
            .await
    }

    async fn content(&self) -> Result<String, Error> {
        self.ensure_active()?;
        self.cdp_client.get_content().await
    }

    async fn close(&self) -> Result<(), Error> {
        if !self.is_active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Closing page {} (target {})", self.id, self.target_id);

        if let Err(e) = self.cdp_client.connection().close().await {
            warn!("Failed to close CDP connection for page {}: {}", self.id, e);
        }

        self.cdp_browser.close_target(&self.target_id).await
    }

    fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::{CdpClientImpl, MockCdpBrowser, MockCdpConnection};
    use std::sync::atomic::AtomicU64;

    fn page_over(connection: &Arc<MockCdpConnection>, browser: Arc<MockCdpBrowser>) -> PageContextImpl {
        PageContextImpl::new(
            "T1".to_string(),
            "https://example.com".to_string(),
            Viewport { width: 1280, height: 1024 },
            Duration::from_millis(200),
            Arc::new(CdpClientImpl::new(connection.clone())),
            browser,
        )
    }

    fn evaluate_value(value: serde_json::Value) -> serde_json::Value {
        let r#type = match &value {
            serde_json::Value::Bool(_) => "boolean",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            _ => "object",
        };
        json!({ "result": { "type": r#type, "value": value } })
    }

    #[tokio::test]
    async fn test_navigate_waits_for_interactive_document() {
        let connection = Arc::new(MockCdpConnection::new());
        let polls = Arc::new(AtomicU64::new(0));
        let counter = polls.clone();
        connection.respond_with("Runtime.evaluate", move |_| {
            // loading for the first two polls
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(evaluate_value(json!(n >= 2)))
        });

        let page = page_over(&connection, Arc::new(MockCdpBrowser::new()));
        page.navigate("https://example.com", Duration::from_secs(5)).await.unwrap();

        assert!(polls.load(Ordering::SeqCst) >= 3);
        assert_eq!(connection.methods()[0], "Page.navigate");
    }

    #[tokio::test]
    async fn test_navigate_times_out_as_navigation_failure() {
        let connection = Arc::new(MockCdpConnection::new());
        connection.respond("Runtime.evaluate", evaluate_value(json!(false)));

        let page = page_over(&connection, Arc::new(MockCdpBrowser::new()));
        let err = page
            .navigate("https://example.com", Duration::from_millis(250))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NavigationFailed(_)));
    }

    #[tokio::test]
    async fn test_load_event_ends_load_wait() {
        let connection = Arc::new(MockCdpConnection::new());
        connection.respond_with("Runtime.evaluate", |params| {
            // interactive, but readyState never reaches complete
            let expression = params["expression"].as_str().unwrap_or_default();
            Ok(evaluate_value(json!(expression.contains("'loading'"))))
        });

        let page = page_over(&connection, Arc::new(MockCdpBrowser::new()));
        page.navigate("https://example.com", Duration::from_secs(5)).await.unwrap();
        connection.emit("Page.loadEventFired", json!({ "timestamp": 1.0 }));

        let started = Instant::now();
        page.wait_for_load_state(LoadState::Load, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        let err = page_over(&connection, Arc::new(MockCdpBrowser::new()))
            .wait_for_load_state(LoadState::Load, Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_network_idle_needs_stable_resource_count() {
        let connection = Arc::new(MockCdpConnection::new());
        let polls = Arc::new(AtomicU64::new(0));
        let counter = polls.clone();
        connection.respond_with("Runtime.evaluate", move |_| {
            // resources keep arriving for five polls, then settle at 5
            let n = counter.fetch_add(1, Ordering::SeqCst).min(5);
            Ok(evaluate_value(json!(n)))
        });

        let page = page_over(&connection, Arc::new(MockCdpBrowser::new()));
        page.wait_for_load_state(LoadState::NetworkIdle, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(polls.load(Ordering::SeqCst) >= 7);
    }

    #[tokio::test]
    async fn test_full_page_screenshot_clips_to_document() {
        let connection = Arc::new(MockCdpConnection::new());
        connection.respond("Runtime.evaluate", evaluate_value(json!(4000)));

        let page = page_over(&connection, Arc::new(MockCdpBrowser::new()));
        page.screenshot(ScreenshotOptions::full_page()).await.unwrap();

        let params = connection.last_params("Page.captureScreenshot").unwrap();
        assert_eq!(params["clip"]["height"], 4000.0);
        assert_eq!(params["clip"]["width"], 1280.0);
        assert_eq!(params["captureBeyondViewport"], true);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let connection = Arc::new(MockCdpConnection::new());
        let browser = Arc::new(MockCdpBrowser::new());
        let page = page_over(&connection, browser.clone());

        page.close().await.unwrap();
        page.close().await.unwrap();

        assert!(!page.is_active());
        assert_eq!(browser.closed_targets(), vec!["T1".to_string()]);
        assert!(page.scroll_height().await.is_err());
    }
}
