//! Region markup extraction
//!
//! Header and footer outer HTML from the located elements, body markup with both
//! removed. Missing elements and failed reads degrade to empty strings.

use serde::Serialize;
use tracing::{info, warn};

use super::lazy::LazyContentTrigger;
use super::locator::ElementLocator;
use super::selectors::SelectorSet;
use crate::config::{DetectionConfig, RegionConfig};
use crate::session::PageSession;

/// Markup of the three regions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegionMarkup {
    pub header: String,
    pub body: String,
    pub footer: String,
}

/// Outer HTML of the element the measurement cascade would pick, under the same height cap
async fn outer_html(session: &PageSession, profile: &RegionConfig, name: &str) -> String {
    let selectors = SelectorSet::from(profile.selectors.as_slice());
    let locator = ElementLocator::new(session.page().as_ref());
    let Some(candidate) = locator.find(&selectors, None, Some(profile.max_height)).await else {
        warn!("No {} element found for markup extraction", name);
        return String::new();
    };

    match candidate.element().outer_html().await {
        Ok(html) => html,
        Err(e) => {
            warn!("Could not read {} markup: {}", name, e);
            String::new()
        }
    }
}

/// Remove the first occurrence of `fragment`
fn remove_once(haystack: &str, fragment: &str) -> String {
    if fragment.is_empty() {
        return haystack.to_string();
    }
    haystack.replacen(fragment, "", 1)
}

/// Extract region markup. The footer is read after the lazy trigger.
pub async fn extract_markup(
    session: &PageSession,
    config: &DetectionConfig,
    lazy: &LazyContentTrigger,
) -> RegionMarkup {
    let header = outer_html(session, &config.header, "header").await;

    if let Err(e) = lazy.force_render(session).await {
        warn!("Lazy content trigger failed before footer markup: {}", e);
    }
    let footer = outer_html(session, &config.footer, "footer").await;

    let page = session.page();
    let body_html = match page.query_selector_all("body").await {
        Ok(bodies) => match bodies.first() {
            Some(body) => body.inner_html().await.ok(),
            None => None,
        },
        Err(e) => {
            warn!("Could not query body: {}", e);
            None
        }
    };

    let body_html = match body_html {
        Some(html) => html,
        None => {
            warn!("No body element; using the serialized document");
            page.content().await.unwrap_or_default()
        }
    };

    let body = remove_once(&remove_once(&body_html, &header), &footer);

    info!(
        "Markup extracted: header {}B, body {}B, footer {}B",
        header.len(),
        body.len(),
        footer.len()
    );

    RegionMarkup { header, body, footer }
}
