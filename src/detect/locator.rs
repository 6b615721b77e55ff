//! Element locator
//!
//! Walks selector candidates in priority order and returns the first visible,
//! positive-area element. A selector that fails to query is logged and skipped.

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::selectors::SelectorSet;
use crate::session::{BoundingBox, ElementRef, PageContext};
use crate::Error;

/// Element that passed the visibility and area checks
#[derive(Debug, Clone)]
pub struct ElementCandidate {
    pub selector: String,
    pub bounding_box: BoundingBox,
    pub visible: bool,
    element: Arc<dyn ElementRef>,
}

impl ElementCandidate {
    pub fn element(&self) -> &Arc<dyn ElementRef> {
        &self.element
    }

    pub fn height(&self) -> f64 {
        self.bounding_box.height
    }
}

/// Locator bound to one page
#[derive(Debug, Clone, Copy)]
pub struct ElementLocator<'a> {
    page: &'a dyn PageContext,
}

impl<'a> ElementLocator<'a> {
    pub fn new(page: &'a dyn PageContext) -> Self {
        Self { page }
    }

    async fn query(&self, selector: &str, scope: Option<&dyn ElementRef>) -> Result<Vec<Arc<dyn ElementRef>>, Error> {
        match scope {
            Some(scope) => scope.query_selector_all(selector).await,
            None => self.page.query_selector_all(selector).await,
        }
    }

    /// Visible element with a positive-area box, or `None`
    async fn qualify(&self, selector: &str, element: Arc<dyn ElementRef>) -> Option<ElementCandidate> {
        match element.is_visible().await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                debug!("Visibility check failed for {}: {}", selector, e);
                return None;
            }
        }

        let bounding_box = match element.bounding_box().await {
            Ok(Some(bbox)) if bbox.has_area() => bbox,
            Ok(_) => return None,
            Err(e) => {
                debug!("Bounding box unavailable for {}: {}", selector, e);
                return None;
            }
        };

        Some(ElementCandidate {
            selector: selector.to_string(),
            bounding_box,
            visible: true,
            element,
        })
    }

    /// First qualifying element across `selectors`, in priority order
    #[instrument(skip_all, fields(selectors = selectors.len(), max_height = ?max_height))]
    pub async fn find(
        &self,
        selectors: &SelectorSet,
        scope: Option<&dyn ElementRef>,
        max_height: Option<f64>,
    ) -> Option<ElementCandidate> {
        for selector in selectors.iter() {
            let elements = match self.query(selector, scope).await {
                Ok(elements) => elements,
                Err(e) => {
                    warn!("Selector '{}' failed: {}", selector, e);
                    continue;
                }
            };

            for element in elements {
                let Some(candidate) = self.qualify(selector, element).await else {
                    continue;
                };

                if let Some(cap) = max_height {
                    if candidate.height() > cap {
                        debug!(
                            "'{}' skipped: too tall ({:.0}px > {:.0}px)",
                            selector,
                            candidate.height(),
                            cap
                        );
                        continue;
                    }
                }

                debug!("'{}' matched at y={:.0} h={:.0}", selector, candidate.bounding_box.y, candidate.height());
                return Some(candidate);
            }
        }

        None
    }

    /// Every qualifying element across `selectors` whose box passes `filter`
    #[instrument(skip_all, fields(selectors = selectors.len()))]
    pub async fn find_all<F>(
        &self,
        selectors: &SelectorSet,
        scope: Option<&dyn ElementRef>,
        filter: F,
    ) -> Vec<ElementCandidate>
    where
        F: Fn(&BoundingBox) -> bool + Send + Sync,
    {
        let mut found = Vec::new();

        for selector in selectors.iter() {
            let elements = match self.query(selector, scope).await {
                Ok(elements) => elements,
                Err(e) => {
                    warn!("Selector '{}' failed: {}", selector, e);
                    continue;
                }
            };

            for element in elements {
                if let Some(candidate) = self.qualify(selector, element).await {
                    if filter(&candidate.bounding_box) {
                        found.push(candidate);
                    }
                }
            }
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MockNode, MockPage};

    fn selectors(list: &str) -> SelectorSet {
        SelectorSet::parse(list)
    }

    #[tokio::test]
    async fn test_first_selector_with_visible_match_wins() {
        let page = MockPage::new("https://example.com", 4000.0)
            .with("header", MockNode::at(0.0, 120.0).hidden())
            .with("nav", MockNode::at(0.0, 96.0))
            .with(".navbar", MockNode::at(0.0, 60.0));

        let found = ElementLocator::new(&page)
            .find(&selectors("header, nav, .navbar"), None, None)
            .await
            .unwrap();
        assert_eq!(found.selector, "nav");
        assert_eq!(found.height(), 96.0);
    }

    #[tokio::test]
    async fn test_zero_area_and_too_tall_are_skipped() {
        let page = MockPage::new("https://example.com", 4000.0)
            .with("header", MockNode::at(0.0, 900.0))
            .with("header", MockNode::at(0.0, 80.0).width(0.0))
            .with("nav", MockNode::at(0.0, 70.0));

        let found = ElementLocator::new(&page)
            .find(&selectors("header, nav"), None, Some(500.0))
            .await
            .unwrap();
        assert_eq!(found.selector, "nav");
    }

    #[tokio::test]
    async fn test_invalid_selector_falls_through() {
        let page = MockPage::new("https://example.com", 4000.0)
            .with_invalid_selector("div[")
            .with("footer", MockNode::from_bottom(300.0, 300.0));

        let found = ElementLocator::new(&page)
            .find(&SelectorSet::new(["div[", "footer"]), None, None)
            .await
            .unwrap();
        assert_eq!(found.bounding_box.y, 3700.0);
    }

    #[tokio::test]
    async fn test_nothing_qualifies_is_none() {
        let page = MockPage::new("https://example.com", 4000.0).with("header", MockNode::at(0.0, 50.0).hidden());
        assert!(ElementLocator::new(&page)
            .find(&selectors("header, nav"), None, None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_scoped_search_only_sees_descendants() {
        let page = MockPage::new("https://example.com", 4000.0)
            .with("a", MockNode::at(2000.0, 20.0))
            .with("footer", MockNode::from_bottom(300.0, 300.0).child("a", MockNode::from_bottom(250.0, 20.0)));

        let locator = ElementLocator::new(&page);
        let footer = locator.find(&selectors("footer"), None, None).await.unwrap();
        let link = locator
            .find(&selectors("a"), Some(footer.element().as_ref()), None)
            .await
            .unwrap();
        assert_eq!(link.bounding_box.y, 3750.0);
    }

    #[tokio::test]
    async fn test_find_all_applies_filter() {
        let page = MockPage::new("https://example.com", 4000.0)
            .with(".promo-bar", MockNode::at(0.0, 40.0))
            .with("nav", MockNode::at(40.0, 100.0))
            .with("nav", MockNode::at(1800.0, 50.0));

        let found = ElementLocator::new(&page)
            .find_all(&selectors(".promo-bar, nav"), None, |bbox| bbox.y <= 300.0)
            .await;
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].bounding_box.bottom(), 140.0);
    }
}
