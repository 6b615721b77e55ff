//! Session manager implementation
//!
//! Opens one tab per URL, caps concurrency with a semaphore and keeps a registry
//! of open pages for shutdown.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cdp::{CdpBrowser, CdpBrowserImpl};
use crate::config::{BrowserConfig, Config, TimeoutConfig};
use crate::session::page::PageContextImpl;
use crate::session::traits::{LoadState, PageContext, SessionManager, Viewport};
use crate::stealth::StealthInjector;
use crate::Error;

type BrowserFactory = Arc<dyn Fn() -> Result<Arc<dyn CdpBrowser>, Error> + Send + Sync>;

/// Load progress of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionLoadState {
    /// Navigation committed
    Opened,
    /// DOM parsed
    Interactive,
    /// Stabilization finished
    Settled,
}

/// Registry of open pages
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    pages: Arc<RwLock<HashMap<String, Arc<dyn PageContext>>>>,
}

impl SessionRegistry {
    fn insert(&self, id: &str, page: Arc<dyn PageContext>) {
        if let Ok(mut pages) = self.pages.write() {
            pages.insert(id.to_string(), page);
        }
    }

    fn remove(&self, id: &str) {
        if let Ok(mut pages) = self.pages.write() {
            pages.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.pages.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every registered page
    pub async fn close_all(&self) -> Result<(), Error> {
        let pages: Vec<Arc<dyn PageContext>> = self
            .pages
            .write()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?
            .drain()
            .map(|(_, page)| page)
            .collect();

        if !pages.is_empty() {
            info!("Closing {} open sessions", pages.len());
        }
        for page in pages {
            if let Err(e) = page.close().await {
                warn!("Failed to close page {}: {}", page.id(), e);
            }
        }
        Ok(())
    }
}

/// Open handle to a rendered page, owned by one pipeline run
///
/// Holds a concurrency permit until dropped. `close` is idempotent; a session
/// dropped while open closes its page in the background.
#[derive(Debug)]
pub struct PageSession {
    id: String,
    url: String,
    page: Arc<dyn PageContext>,
    load_state: Mutex<SessionLoadState>,
    lazy_rendered: AtomicBool,
    closed: AtomicBool,
    registry: SessionRegistry,
    _permit: OwnedSemaphorePermit,
}

impl PageSession {
    pub fn new(
        url: &str,
        page: Arc<dyn PageContext>,
        registry: SessionRegistry,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        registry.insert(&id, Arc::clone(&page));
        Self {
            id,
            url: url.to_string(),
            page,
            load_state: Mutex::new(SessionLoadState::Opened),
            lazy_rendered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            registry,
            _permit: permit,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn page(&self) -> &Arc<dyn PageContext> {
        &self.page
    }

    pub fn viewport(&self) -> Viewport {
        self.page.viewport()
    }

    pub fn load_state(&self) -> SessionLoadState {
        self.load_state
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionLoadState::Opened)
    }

    pub(crate) fn set_load_state(&self, state: SessionLoadState) {
        if let Ok(mut current) = self.load_state.lock() {
            *current = state;
        }
    }

    /// Claim the one lazy-render pass this session gets; false if already claimed
    pub(crate) fn claim_lazy_render(&self) -> bool {
        !self.lazy_rendered.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release the page
    pub async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing session {} for {}", self.id, self.url);
        self.registry.remove(&self.id);
        self.page.close().await
    }
}

impl Drop for PageSession {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        warn!("Session {} for {} dropped without close", self.id, self.url);

        // Registered until the close completes
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let page = Arc::clone(&self.page);
                let registry = self.registry.clone();
                let id = self.id.clone();
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        warn!("Background close of page {} failed: {}", page.id(), e);
                    }
                    registry.remove(&id);
                });
            }
            Err(_) => self.registry.remove(&self.id),
        }
    }
}

/// Bring a freshly opened page to a measurable state
///
/// Stages: interactive document (fatal), network quiescence degrading to the
/// load event, `readyState === "complete"`, fixed settle delay.
pub async fn stabilize_page(session: &PageSession, timeouts: &TimeoutConfig) -> Result<(), Error> {
    let page = session.page();
    let url = session.url();

    page.wait_for_load_state(LoadState::DomContentLoaded, ms(timeouts.navigation_ms))
        .await
        .map_err(|e| Error::navigation_failed(format!("{}: document never became interactive: {}", url, e)))?;
    session.set_load_state(SessionLoadState::Interactive);

    if let Err(e) = page
        .wait_for_load_state(LoadState::NetworkIdle, ms(timeouts.network_idle_ms))
        .await
    {
        warn!("Network not idle for {} ({}), falling back to load", url, e);
        if let Err(e) = page
            .wait_for_load_state(LoadState::Load, ms(timeouts.load_fallback_ms))
            .await
        {
            warn!("Load fallback failed for {}: {}", url, e);
        }
    }

    if let Err(e) = page
        .wait_for_load_state(LoadState::Load, ms(timeouts.ready_state_ms))
        .await
    {
        warn!("Document not complete for {}: {}", url, e);
    }

    tokio::time::sleep(ms(timeouts.settle_ms)).await;
    session.set_load_state(SessionLoadState::Settled);

    info!("Session {} stabilized", session.id());
    Ok(())
}

pub(crate) fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn as_navigation_error(url: &str, e: Error) -> Error {
    match e {
        Error::NavigationFailed(_) => e,
        other => Error::navigation_failed(format!("{}: {}", url, other)),
    }
}

/// Session manager implementation
pub struct SessionManagerImpl {
    browser_config: BrowserConfig,
    timeouts: TimeoutConfig,
    cdp_browser_factory: BrowserFactory,
    semaphore: Arc<Semaphore>,
    registry: SessionRegistry,
}

impl SessionManagerImpl {
    /// Create a new session manager
    pub fn new<F>(config: &Config, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn CdpBrowser>, Error> + Send + Sync + 'static,
    {
        Self {
            browser_config: config.browser.clone(),
            timeouts: config.timeouts.clone(),
            cdp_browser_factory: Arc::new(factory),
            semaphore: Arc::new(Semaphore::new(config.browser.max_concurrent_sessions.max(1))),
            registry: SessionRegistry::default(),
        }
    }

    /// Sessions against the configured CDP endpoint
    pub fn from_config(config: &Config) -> Self {
        let endpoint = config.browser.cdp_endpoint.clone();
        Self::new(config, move || {
            Ok(Arc::new(CdpBrowserImpl::new(endpoint.clone())) as Arc<dyn CdpBrowser>)
        })
    }

    /// Viewport and stealth overrides for a new tab
    async fn prepare(&self, page: &PageContextImpl) -> Result<(), Error> {
        page.apply_viewport().await?;
        if self.browser_config.stealth_enabled {
            StealthInjector::from_config(&self.browser_config)
                .apply(page.cdp_client().as_ref())
                .await?;
        }
        Ok(())
    }

    async fn open_page(&self, url: &str) -> Result<Arc<PageContextImpl>, Error> {
        let browser = (self.cdp_browser_factory)()?;
        let target = browser.create_target("about:blank").await?;

        let client = match browser.create_client(&target.ws_url).await {
            Ok(client) => client,
            Err(e) => {
                let _ = browser.close_target(&target.target_id).await;
                return Err(e);
            }
        };

        let page = Arc::new(PageContextImpl::new(
            target.target_id,
            url.to_string(),
            Viewport {
                width: self.browser_config.viewport_width,
                height: self.browser_config.viewport_height,
            },
            ms(self.timeouts.idle_window_ms),
            client,
            browser,
        ));

        if let Err(e) = self.prepare(&page).await {
            warn!("Page overrides not fully applied for {}: {}", url, e);
        }

        if let Err(e) = page.navigate(url, ms(self.timeouts.navigation_ms)).await {
            let _ = page.close().await;
            return Err(e);
        }

        Ok(page)
    }
}

#[async_trait]
impl SessionManager for SessionManagerImpl {
    async fn open(&self, url: &str) -> Result<PageSession, Error> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::internal("Session pool is closed"))?;

        info!("Opening session for {}", url);
        let page = self
            .open_page(url)
            .await
            .map_err(|e| as_navigation_error(url, e))?;

        Ok(PageSession::new(url, page, self.registry.clone(), permit))
    }

    async fn stabilize(&self, session: &PageSession) -> Result<(), Error> {
        stabilize_page(session, &self.timeouts).await
    }

    fn session_count(&self) -> usize {
        self.registry.len()
    }

    async fn close_all(&self) -> Result<(), Error> {
        self.registry.close_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::{MockCdpBrowser, MockCdpConnection};
    use serde_json::json;

    /// Connection answering like a loaded, quiet page
    fn ready_connection() -> Arc<MockCdpConnection> {
        let connection = Arc::new(MockCdpConnection::new());
        connection.respond_with("Runtime.evaluate", |params| {
            let expression = params["expression"].as_str().unwrap_or_default();
            let result = if expression.starts_with("!!(") {
                json!({ "type": "boolean", "value": true })
            } else if expression.contains("getEntriesByType") {
                json!({ "type": "number", "value": 12 })
            } else {
                json!({ "type": "undefined" })
            };
            Ok(json!({ "result": result }))
        });
        connection
    }

    fn fast_config(max_sessions: usize) -> Config {
        let mut config = Config::default();
        config.browser.max_concurrent_sessions = max_sessions;
        config.timeouts = TimeoutConfig {
            navigation_ms: 1_000,
            network_idle_ms: 1_000,
            load_fallback_ms: 200,
            ready_state_ms: 200,
            settle_ms: 10,
            idle_window_ms: 100,
        };
        config
    }

    fn manager_with(browser: Arc<MockCdpBrowser>, config: &Config) -> SessionManagerImpl {
        SessionManagerImpl::new(config, move || Ok(browser.clone() as Arc<dyn CdpBrowser>))
    }

    #[tokio::test]
    async fn test_open_applies_overrides_before_navigation() {
        let connection = ready_connection();
        let browser = Arc::new(MockCdpBrowser::with_connection(connection.clone()));
        let manager = manager_with(browser, &fast_config(2));

        let session = manager.open("https://example.com").await.unwrap();
        assert_eq!(manager.session_count(), 1);
        assert_eq!(session.viewport(), Viewport { width: 1280, height: 1024 });

        let methods = connection.methods();
        let position = |m: &str| methods.iter().position(|x| x == m).unwrap();
        assert!(position("Emulation.setDeviceMetricsOverride") < position("Page.navigate"));
        assert!(position("Network.setUserAgentOverride") < position("Page.navigate"));
        assert!(position("Page.addScriptToEvaluateOnNewDocument") < position("Page.navigate"));

        session.close().await.unwrap();
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_open_unreachable_endpoint_is_navigation_error() {
        let config = fast_config(1);
        let manager = SessionManagerImpl::new(&config, || {
            Ok(Arc::new(MockCdpBrowser::unreachable()) as Arc<dyn CdpBrowser>)
        });

        let err = manager.open("https://example.com").await.unwrap_err();
        assert!(matches!(err, Error::NavigationFailed(_)));
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_navigation_closes_target() {
        let connection = Arc::new(MockCdpConnection::new());
        connection.respond("Page.navigate", json!({ "errorText": "net::ERR_CONNECTION_REFUSED" }));
        let browser = Arc::new(MockCdpBrowser::with_connection(connection));
        let manager = manager_with(browser.clone(), &fast_config(1));

        assert!(manager.open("https://down.example").await.is_err());
        assert_eq!(browser.closed_targets().len(), 1);
    }

    #[tokio::test]
    async fn test_semaphore_caps_concurrent_sessions() {
        let browser = Arc::new(MockCdpBrowser::with_connection(ready_connection()));
        let manager = manager_with(browser, &fast_config(1));

        let first = manager.open("https://a.example").await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(100), manager.open("https://b.example")).await;
        assert!(blocked.is_err());

        first.close().await.unwrap();
        drop(first);

        let second = manager.open("https://b.example").await.unwrap();
        second.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stabilize_degrades_when_network_never_idles() {
        let connection = Arc::new(MockCdpConnection::new());
        let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let resources = counter.clone();
        connection.respond_with("Runtime.evaluate", move |params| {
            let expression = params["expression"].as_str().unwrap_or_default();
            let result = if expression.contains("getEntriesByType") {
                // a new resource on every poll
                json!({ "type": "number", "value": resources.fetch_add(1, Ordering::SeqCst) })
            } else {
                json!({ "type": "boolean", "value": true })
            };
            Ok(json!({ "result": result }))
        });
        let browser = Arc::new(MockCdpBrowser::with_connection(connection));
        let mut config = fast_config(1);
        config.timeouts.network_idle_ms = 300;
        let manager = manager_with(browser, &config);

        let session = manager.open("https://busy.example").await.unwrap();
        manager.stabilize(&session).await.unwrap();
        assert_eq!(session.load_state(), SessionLoadState::Settled);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_session_closes_in_background() {
        let browser = Arc::new(MockCdpBrowser::with_connection(ready_connection()));
        let manager = manager_with(browser.clone(), &fast_config(2));

        let session = manager.open("https://example.com").await.unwrap();
        drop(session);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(browser.closed_targets().len(), 1);
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_close_all_reaches_dropped_sessions() {
        let browser = Arc::new(MockCdpBrowser::with_connection(ready_connection()));
        let manager = manager_with(browser.clone(), &fast_config(2));

        let session = manager.open("https://example.com").await.unwrap();
        drop(session);
        assert_eq!(manager.session_count(), 1);

        manager.close_all().await.unwrap();
        assert_eq!(manager.session_count(), 0);
        assert_eq!(browser.closed_targets().len(), 1);

        // The background close finds the page already closed
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(browser.closed_targets().len(), 1);
    }

    #[tokio::test]
    async fn test_close_all_closes_registered_pages() {
        let browser = Arc::new(MockCdpBrowser::with_connection(ready_connection()));
        let manager = manager_with(browser.clone(), &fast_config(2));

        let a = manager.open("https://a.example").await.unwrap();
        let b = manager.open("https://b.example").await.unwrap();
        manager.close_all().await.unwrap();

        assert_eq!(manager.session_count(), 0);
        assert_eq!(browser.closed_targets().len(), 2);
        a.close().await.unwrap();
        b.close().await.unwrap();
        assert_eq!(browser.closed_targets().len(), 2);
    }
}
