//! Mock session implementation for testing
//!
//! A scriptable page with fixed element geometry, lazy content that appears once
//! the bottom is reached, and screenshots rendered as generated PNGs whose pixel
//! rows encode their document y coordinate.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::manager::{ms, stabilize_page, PageSession, SessionRegistry};
use super::traits::{
    BoundingBox, ElementRef, LoadState, PageContext, ScreenshotOptions, SessionManager, Viewport,
};
use crate::cdp::EvaluationResult;
use crate::config::TimeoutConfig;
use crate::Error;

/// Pixel colour of document row `y` in generated screenshots
pub fn row_color(y: u32) -> [u8; 4] {
    [(y % 256) as u8, ((y / 256) % 256) as u8, 0x80, 0xff]
}

/// Render a PNG whose rows start at document offset `top`
pub fn render_png(width: u32, height: u32, top: u32) -> Result<Vec<u8>, Error> {
    let image = image::RgbaImage::from_fn(width.max(1), height.max(1), |_, y| image::Rgba(row_color(top + y)));
    let mut buffer = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image).write_to(&mut buffer, image::ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// Vertical anchor of a mock element
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockPosition {
    /// Top edge at a fixed document offset
    Top(f64),
    /// Top edge this far above the current document end
    FromBottom(f64),
}

/// Element definition on a mock page
#[derive(Debug, Clone)]
pub struct MockNode {
    pub position: MockPosition,
    pub x: f64,
    pub width: f64,
    pub height: f64,
    pub visible: bool,
    /// Present only once the page has been scrolled to the bottom
    pub lazy: bool,
    pub outer_html: String,
    pub inner_html: String,
    pub children: Vec<(String, MockNode)>,
}

impl MockNode {
    /// Element spanning `top..top + height`
    pub fn at(top: f64, height: f64) -> Self {
        Self {
            position: MockPosition::Top(top),
            x: 0.0,
            width: 1280.0,
            height,
            visible: true,
            lazy: false,
            outer_html: String::new(),
            inner_html: String::new(),
            children: Vec::new(),
        }
    }

    /// Element whose top sits `distance` above the document end
    pub fn from_bottom(distance: f64, height: f64) -> Self {
        Self {
            position: MockPosition::FromBottom(distance),
            ..Self::at(0.0, height)
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn width(mut self, width: f64) -> Self {
        self.width = width;
        self
    }

    pub fn html(mut self, outer_html: &str) -> Self {
        self.outer_html = outer_html.to_string();
        self
    }

    pub fn inner(mut self, inner_html: &str) -> Self {
        self.inner_html = inner_html.to_string();
        self
    }

    pub fn child(mut self, selector: &str, node: MockNode) -> Self {
        self.children.push((selector.to_string(), node));
        self
    }
}

/// Load behaviour of a mock page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockLoad {
    #[default]
    Ready,
    /// Network never goes quiet; load milestones still succeed
    NeverIdle,
    /// Document stays in "loading"
    StuckLoading,
}

#[derive(Debug, Clone, Default)]
struct MockPageState {
    height: f64,
    grown_height: Option<f64>,
    reached_bottom: bool,
    elements: HashMap<String, Vec<MockNode>>,
    invalid_selectors: HashSet<String>,
    load: MockLoad,
    content: String,
    scroll_log: Vec<f64>,
    load_waits: Vec<LoadState>,
    screenshots: Vec<ScreenshotOptions>,
    clicks: Vec<String>,
    queries: Vec<String>,
}

impl MockPageState {
    fn present(&self, node: &MockNode) -> bool {
        !node.lazy || self.reached_bottom
    }

    fn top_of(&self, node: &MockNode) -> f64 {
        match node.position {
            MockPosition::Top(y) => y,
            MockPosition::FromBottom(distance) => self.height - distance,
        }
    }
}

/// Mock page
#[derive(Debug)]
pub struct MockPage {
    id: String,
    url: String,
    viewport: Viewport,
    active: AtomicBool,
    state: Arc<Mutex<MockPageState>>,
}

impl MockPage {
    /// Page at `url` with a document `height` pixels tall
    pub fn new(url: &str, height: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            viewport: Viewport { width: 1280, height: 1024 },
            active: AtomicBool::new(true),
            state: Arc::new(Mutex::new(MockPageState {
                height,
                ..MockPageState::default()
            })),
        }
    }

    fn update(&self, f: impl FnOnce(&mut MockPageState)) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
    }

    fn read<T>(&self, f: impl FnOnce(&MockPageState) -> T) -> Result<T, Error> {
        self.state
            .lock()
            .map(|state| f(&state))
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Viewport { width, height };
        self
    }

    /// Add an element matched by `selector`
    pub fn with(self, selector: &str, node: MockNode) -> Self {
        self.update(|s| s.elements.entry(selector.to_string()).or_default().push(node));
        self
    }

    /// Document grows to `height` once the bottom is reached
    pub fn grows_to(self, height: f64) -> Self {
        self.update(|s| s.grown_height = Some(height));
        self
    }

    /// Querying `selector` fails like a syntax error would
    pub fn with_invalid_selector(self, selector: &str) -> Self {
        self.update(|s| {
            s.invalid_selectors.insert(selector.to_string());
        });
        self
    }

    pub fn with_load(self, load: MockLoad) -> Self {
        self.update(|s| s.load = load);
        self
    }

    pub fn with_content(self, html: &str) -> Self {
        self.update(|s| s.content = html.to_string());
        self
    }

    /// Independent copy with fresh state, as a new tab on the same URL would be
    pub fn duplicate(&self) -> Self {
        let state = self.read(|s| MockPageState {
            scroll_log: Vec::new(),
            load_waits: Vec::new(),
            screenshots: Vec::new(),
            clicks: Vec::new(),
            queries: Vec::new(),
            reached_bottom: false,
            ..s.clone()
        });
        Self {
            id: Uuid::new_v4().to_string(),
            url: self.url.clone(),
            viewport: self.viewport,
            active: AtomicBool::new(true),
            state: Arc::new(Mutex::new(state.unwrap_or_default())),
        }
    }

    pub fn scroll_log(&self) -> Vec<f64> {
        self.read(|s| s.scroll_log.clone()).unwrap_or_default()
    }

    pub fn load_waits(&self) -> Vec<LoadState> {
        self.read(|s| s.load_waits.clone()).unwrap_or_default()
    }

    pub fn screenshots(&self) -> Vec<ScreenshotOptions> {
        self.read(|s| s.screenshots.clone()).unwrap_or_default()
    }

    /// Selectors of clicked elements
    pub fn clicks(&self) -> Vec<String> {
        self.read(|s| s.clicks.clone()).unwrap_or_default()
    }

    /// Selectors queried, in order
    pub fn queries(&self) -> Vec<String> {
        self.read(|s| s.queries.clone()).unwrap_or_default()
    }

    fn ensure_active(&self) -> Result<(), Error> {
        if self.active.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::session_not_found(&self.id))
        }
    }

    fn elements_for(&self, nodes: Vec<MockNode>, selector: &str) -> Vec<Arc<dyn ElementRef>> {
        nodes
            .into_iter()
            .map(|node| {
                Arc::new(MockElement {
                    selector: selector.to_string(),
                    node,
                    state: Arc::clone(&self.state),
                }) as Arc<dyn ElementRef>
            })
            .collect()
    }
}

#[async_trait]
impl PageContext for MockPage {
    fn id(&self) -> &str {
        &self.id
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<(), Error> {
        self.ensure_active()
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<(), Error> {
        self.ensure_active()?;
        let load = self.read(|s| s.load)?;
        self.update(|s| s.load_waits.push(state));

        let reached = match (load, state) {
            (MockLoad::Ready, _) => true,
            (MockLoad::NeverIdle, LoadState::NetworkIdle) => false,
            (MockLoad::NeverIdle, _) => true,
            (MockLoad::StuckLoading, _) => false,
        };

        if reached {
            Ok(())
        } else {
            Err(Error::timeout(format!("{:?} not reached within {:?}", state, timeout)))
        }
    }

    async fn evaluate(&self, _script: &str) -> Result<EvaluationResult, Error> {
        self.ensure_active()?;
        Ok(EvaluationResult::Null)
    }

    async fn query_selector_all(&self, selector: &str) -> Result<Vec<Arc<dyn ElementRef>>, Error> {
        self.ensure_active()?;
        let nodes = self.read(|s| {
            if s.invalid_selectors.contains(selector) {
                return Err(Error::cdp(format!(
                    "DOM.querySelectorAll failed: '{}' is not a valid selector",
                    selector
                )));
            }
            Ok(s.elements
                .get(selector)
                .map(|nodes| nodes.iter().filter(|n| s.present(n)).cloned().collect::<Vec<_>>())
                .unwrap_or_default())
        })??;
        self.update(|s| s.queries.push(selector.to_string()));

        Ok(self.elements_for(nodes, selector))
    }

    async fn scroll_to(&self, y: f64) -> Result<(), Error> {
        self.ensure_active()?;
        let viewport_height = f64::from(self.viewport.height);
        self.update(|s| {
            s.scroll_log.push(y);
            if y + viewport_height >= s.height - 1.0 && !s.reached_bottom {
                s.reached_bottom = true;
                if let Some(grown) = s.grown_height {
                    s.height = grown;
                }
            }
        });
        Ok(())
    }

    async fn scroll_height(&self) -> Result<f64, Error> {
        self.ensure_active()?;
        self.read(|s| s.height)
    }

    async fn screenshot(&self, options: ScreenshotOptions) -> Result<Vec<u8>, Error> {
        self.ensure_active()?;
        let height = self.read(|s| s.height)?;
        self.update(|s| s.screenshots.push(options.clone()));

        match (options.clip, options.full_page) {
            (Some(clip), _) => render_png(
                clip.width.round() as u32,
                clip.height.round() as u32,
                clip.y.max(0.0).round() as u32,
            ),
            (None, true) => render_png(self.viewport.width, height.round() as u32, 0),
            (None, false) => render_png(
                self.viewport.width,
                self.viewport.height.min(height.round() as u32),
                0,
            ),
        }
    }

    async fn content(&self) -> Result<String, Error> {
        self.ensure_active()?;
        self.read(|s| s.content.clone())
    }

    async fn close(&self) -> Result<(), Error> {
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Element on a mock page
#[derive(Debug)]
pub struct MockElement {
    selector: String,
    node: MockNode,
    state: Arc<Mutex<MockPageState>>,
}

impl MockElement {
    fn read<T>(&self, f: impl FnOnce(&MockPageState) -> T) -> Result<T, Error> {
        self.state
            .lock()
            .map(|state| f(&state))
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))
    }
}

#[async_trait]
impl ElementRef for MockElement {
    fn selector(&self) -> &str {
        &self.selector
    }

    async fn is_visible(&self) -> Result<bool, Error> {
        Ok(self.node.visible)
    }

    async fn bounding_box(&self) -> Result<Option<BoundingBox>, Error> {
        let top = self.read(|s| s.top_of(&self.node))?;
        Ok(Some(BoundingBox::new(self.node.x, top, self.node.width, self.node.height)))
    }

    async fn outer_html(&self) -> Result<String, Error> {
        Ok(self.node.outer_html.clone())
    }

    async fn inner_html(&self) -> Result<String, Error> {
        Ok(self.node.inner_html.clone())
    }

    async fn query_selector_all(&self, selector: &str) -> Result<Vec<Arc<dyn ElementRef>>, Error> {
        let nodes = self.read(|s| {
            self.node
                .children
                .iter()
                .filter(|(child_selector, node)| child_selector == selector && s.present(node))
                .map(|(_, node)| node.clone())
                .collect::<Vec<_>>()
        })?;

        Ok(nodes
            .into_iter()
            .map(|node| {
                Arc::new(MockElement {
                    selector: selector.to_string(),
                    node,
                    state: Arc::clone(&self.state),
                }) as Arc<dyn ElementRef>
            })
            .collect())
    }

    async fn click(&self) -> Result<(), Error> {
        if let Ok(mut state) = self.state.lock() {
            state.clicks.push(self.selector.clone());
        }
        Ok(())
    }
}

/// Mock session manager serving mock pages by URL
#[derive(Debug)]
pub struct MockSessionManager {
    pages: Mutex<HashMap<String, MockPage>>,
    opened: Mutex<Vec<Arc<MockPage>>>,
    timeouts: TimeoutConfig,
    semaphore: Arc<Semaphore>,
    registry: SessionRegistry,
}

impl MockSessionManager {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            opened: Mutex::new(Vec::new()),
            timeouts: TimeoutConfig {
                navigation_ms: 50,
                network_idle_ms: 50,
                load_fallback_ms: 50,
                ready_state_ms: 50,
                settle_ms: 0,
                idle_window_ms: 0,
            },
            semaphore: Arc::new(Semaphore::new(16)),
            registry: SessionRegistry::default(),
        }
    }

    /// Serve `page` for its URL; every open gets a fresh copy
    pub fn with_page(self, page: MockPage) -> Self {
        if let Ok(mut pages) = self.pages.lock() {
            pages.insert(page.url().to_string(), page);
        }
        self
    }

    /// Pages handed out so far, in open order
    pub fn opened_pages(&self) -> Vec<Arc<MockPage>> {
        self.opened.lock().map(|o| o.clone()).unwrap_or_default()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().map(|o| o.len()).unwrap_or(0)
    }
}

impl Default for MockSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionManager for MockSessionManager {
    async fn open(&self, url: &str) -> Result<PageSession, Error> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::internal("Session pool is closed"))?;

        let page = self
            .pages
            .lock()
            .map_err(|e| Error::internal(format!("Lock error: {}", e)))?
            .get(url)
            .map(MockPage::duplicate)
            .ok_or_else(|| Error::navigation_failed(format!("{}: net::ERR_NAME_NOT_RESOLVED", url)))?;

        let page = Arc::new(page);
        page.navigate(url, ms(self.timeouts.navigation_ms)).await?;

        if let Ok(mut opened) = self.opened.lock() {
            opened.push(Arc::clone(&page));
        }

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
    use crate::session::SessionLoadState;

    #[tokio::test]
    async fn test_lazy_nodes_appear_after_reaching_bottom() {
        let page = MockPage::new("https://example.com", 3000.0)
            .with("footer", MockNode::from_bottom(200.0, 200.0).lazy())
            .grows_to(4000.0);

        assert!(page.query_selector_all("footer").await.unwrap().is_empty());

        page.scroll_to(1000.0).await.unwrap();
        assert_eq!(page.scroll_height().await.unwrap(), 3000.0);

        page.scroll_to_bottom().await.unwrap();
        assert_eq!(page.scroll_height().await.unwrap(), 4000.0);

        let footers = page.query_selector_all("footer").await.unwrap();
        let bbox = footers[0].bounding_box().await.unwrap().unwrap();
        assert_eq!(bbox.y, 3800.0);
        assert_eq!(bbox.bottom(), 4000.0);
    }

    #[tokio::test]
    async fn test_clip_screenshot_rows_encode_document_offset() {
        let page = MockPage::new("https://example.com", 4000.0);
        let png = page
            .screenshot(ScreenshotOptions::clipped(crate::cdp::Clip::new(0.0, 3900.0, 8.0, 100.0)))
            .await
            .unwrap();

        let image = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(image.dimensions(), (8, 100));
        assert_eq!(image.get_pixel(0, 0).0, row_color(3900));
        assert_eq!(image.get_pixel(0, 99).0, row_color(3999));
    }

    #[tokio::test]
    async fn test_invalid_selector_errors() {
        let page = MockPage::new("https://example.com", 1000.0).with_invalid_selector("div[");
        assert!(page.query_selector_all("div[").await.is_err());
        assert!(page.query_selector_all("header").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manager_opens_fresh_copies_and_stabilizes() {
        let manager = MockSessionManager::new()
            .with_page(MockPage::new("https://example.com", 2000.0).with_load(MockLoad::NeverIdle));

        let session = manager.open("https://example.com").await.unwrap();
        manager.stabilize(&session).await.unwrap();
        assert_eq!(session.load_state(), SessionLoadState::Settled);

        let page = &manager.opened_pages()[0];
        assert_eq!(
            page.load_waits(),
            vec![
                LoadState::DomContentLoaded,
                LoadState::NetworkIdle,
                LoadState::Load,
                LoadState::Load
            ]
        );

        session.close().await.unwrap();
        assert!(!page.is_active());
        assert_eq!(manager.session_count(), 0);

        let again = manager.open("https://example.com").await.unwrap();
        assert!(again.page().is_active());
        again.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stuck_document_fails_stabilize() {
        let manager = MockSessionManager::new()
            .with_page(MockPage::new("https://slow.example", 2000.0).with_load(MockLoad::StuckLoading));

        let session = manager.open("https://slow.example").await.unwrap();
        let err = manager.stabilize(&session).await.unwrap_err();
        assert!(matches!(err, Error::NavigationFailed(_)));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_url_is_navigation_error() {
        let manager = MockSessionManager::new();
        assert!(matches!(
            manager.open("https://unknown.example").await,
            Err(Error::NavigationFailed(_))
        ));
    }
}
