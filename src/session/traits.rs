//! Session management traits
//!
//! This module defines the abstract interfaces over a rendered page and its elements,
//! and the manager that hands out page sessions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cdp::{Clip, EvaluationResult};
use crate::session::PageSession;

/// Viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Screenshot options. Screenshots are always PNG.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreenshotOptions {
    /// Clip region in document coordinates
    pub clip: Option<Clip>,
    /// Capture the whole document instead of the viewport
    pub full_page: bool,
}

impl ScreenshotOptions {
    pub fn clipped(clip: Clip) -> Self {
        Self {
            clip: Some(clip),
            full_page: false,
        }
    }

    pub fn full_page() -> Self {
        Self {
            clip: None,
            full_page: true,
        }
    }
}

/// Page load milestone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// `document.readyState` has left "loading"
    DomContentLoaded,
    /// `document.readyState === "complete"`
    Load,
    /// No new resource requests for the idle window
    NetworkIdle,
}

/// Element bounding box in document coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// Page context trait
///
/// Represents one rendered tab.
#[async_trait]
pub trait PageContext: Send + Sync + std::fmt::Debug {
    /// Get page ID
    fn id(&self) -> &str;

    /// URL the page was opened for
    fn url(&self) -> &str;

    fn viewport(&self) -> Viewport;

    /// Navigate and wait until the document is interactive
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), crate::Error>;

    /// Wait for a load milestone; `Error::Timeout` when it is not reached in time
    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<(), crate::Error>;

    /// Evaluate JavaScript, awaiting promises
    async fn evaluate(&self, script: &str) -> Result<EvaluationResult, crate::Error>;

    /// All elements matching `selector`, in document order
    async fn query_selector_all(&self, selector: &str) -> Result<Vec<Arc<dyn ElementRef>>, crate::Error>;

    /// Scroll the window to a vertical offset
    async fn scroll_to(&self, y: f64) -> Result<(), crate::Error>;

    /// Current document height
    async fn scroll_height(&self) -> Result<f64, crate::Error>;

    /// Scroll to the current end of the document
    async fn scroll_to_bottom(&self) -> Result<f64, crate::Error> {
        let height = self.scroll_height().await?;
        self.scroll_to(height).await?;
        Ok(height)
    }

    /// Capture a PNG screenshot
    async fn screenshot(&self, options: ScreenshotOptions) -> Result<Vec<u8>, crate::Error>;

    /// Serialized document
    async fn content(&self) -> Result<String, crate::Error>;

    /// Close the page. Closing twice is a no-op.
    async fn close(&self) -> Result<(), crate::Error>;

    /// Check if page is active
    fn is_active(&self) -> bool;
}

/// Element reference trait
///
/// Represents a DOM element in a page.
#[async_trait]
pub trait ElementRef: Send + Sync + std::fmt::Debug {
    /// Selector this element was found with
    fn selector(&self) -> &str;

    /// Rendered, not hidden by style, and connected to the document
    async fn is_visible(&self) -> Result<bool, crate::Error>;

    /// Box in document coordinates; `None` once the node is detached
    async fn bounding_box(&self) -> Result<Option<BoundingBox>, crate::Error>;

    async fn outer_html(&self) -> Result<String, crate::Error>;

    async fn inner_html(&self) -> Result<String, crate::Error>;

    /// Descendants matching `selector`
    async fn query_selector_all(&self, selector: &str) -> Result<Vec<Arc<dyn ElementRef>>, crate::Error>;

    async fn click(&self) -> Result<(), crate::Error>;
}

/// Session manager trait
///
/// Opens one page session per URL and brings it to a measurable state.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Open a session and navigate to `url`. Fails with `Error::NavigationFailed`
    /// when the target does not respond in time.
    async fn open(&self, url: &str) -> Result<PageSession, crate::Error>;

    /// Four-stage load wait; only the first stage is fatal
    async fn stabilize(&self, session: &PageSession) -> Result<(), crate::Error>;

    /// Number of open sessions
    fn session_count(&self) -> usize;

    /// Close every open session
    async fn close_all(&self) -> Result<(), crate::Error>;
}
