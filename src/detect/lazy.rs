//! Scroll choreography that forces deferred content to render

use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::LazyLoadConfig;
use crate::session::{LoadState, PageSession};
use crate::Error;

/// Lazy-content trigger
#[derive(Debug, Clone)]
pub struct LazyContentTrigger {
    config: LazyLoadConfig,
}

impl LazyContentTrigger {
    pub fn new(config: LazyLoadConfig) -> Self {
        Self { config }
    }

    /// Run the choreography once per session; later calls are no-ops
    ///
    /// End of document, wait, nudge back and return, network quiescence
    /// (best effort), settle, end of document again.
    #[instrument(skip_all, fields(url = %session.url()))]
    pub async fn force_render(&self, session: &PageSession) -> Result<(), Error> {
        if !session.claim_lazy_render() {
            debug!("Lazy content already rendered for session {}", session.id());
            return Ok(());
        }

        let page = session.page();
        let wait = |millis: u64| tokio::time::sleep(Duration::from_millis(millis));

        let height = page.scroll_to_bottom().await?;
        wait(self.config.first_scroll_wait_ms).await;

        let current = page.scroll_height().await?;
        page.scroll_to((current - self.config.back_scroll_px).max(0.0)).await?;
        wait(self.config.back_scroll_wait_ms).await;
        page.scroll_to_bottom().await?;

        if let Err(e) = page
            .wait_for_load_state(LoadState::NetworkIdle, Duration::from_millis(self.config.network_idle_ms))
            .await
        {
            warn!("Network did not settle after scrolling: {}", e);
        }

        wait(self.config.settle_ms).await;

        let final_height = page.scroll_to_bottom().await?;
        wait(self.config.final_scroll_wait_ms).await;

        info!("Lazy content rendered, document height {:.0}px -> {:.0}px", height, final_height);
        Ok(())
    }
}
