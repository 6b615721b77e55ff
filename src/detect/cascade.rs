//! Boundary detection cascade
//!
//! Standard detection, multi-element synthesis, percentage fallback. The first
//! two produce candidates that must pass the visual oracle; the fallback always
//! accepts. Each stage is entered only when the previous one was rejected.

use serde::Serialize;
use std::fmt;
use tracing::{debug, info, instrument, warn};

use super::lazy::LazyContentTrigger;
use super::locator::{ElementCandidate, ElementLocator};
use super::selectors::{Region, SelectorSet};
use crate::cdp::Clip;
use crate::config::{DetectionConfig, RegionConfig};
use crate::oracle::{OracleAdapter, OracleContext, OracleVerdict};
use crate::session::{PageSession, ScreenshotOptions};
use crate::Error;

/// Cascade stage that produced or rejected a height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionStage {
    Standard,
    MultiElement,
    PercentageFallback,
}

impl fmt::Display for DetectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectionStage::Standard => "standard",
            DetectionStage::MultiElement => "multi-element",
            DetectionStage::PercentageFallback => "percentage-fallback",
        };
        f.write_str(name)
    }
}

/// One stage's result, kept for observability
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionAttempt {
    pub stage: DetectionStage,
    pub height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<OracleVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DetectionAttempt {
    fn rejected(stage: DetectionStage, height: Option<f64>, reason: impl Into<String>) -> Self {
        Self {
            stage,
            height,
            verdict: None,
            reason: Some(reason.into()),
        }
    }
}

/// Outcome of a single stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    Accepted(DetectionAttempt),
    Rejected(DetectionAttempt),
}

/// Final height for one region with the attempts that led to it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionOutcome {
    pub region: Region,
    /// Rounded to whole pixels
    pub height: u32,
    pub stage: DetectionStage,
    pub attempts: Vec<DetectionAttempt>,
    /// Document height when the region was measured
    pub page_height: f64,
}

/// Span of elements found by multi-element synthesis
#[derive(Debug, Clone, Copy, PartialEq)]
struct Span {
    top: f64,
    bottom: f64,
}

impl Span {
    fn covering(candidates: &[ElementCandidate]) -> Option<Self> {
        let top = candidates.iter().map(|c| c.bounding_box.y).reduce(f64::min)?;
        let bottom = candidates.iter().map(|c| c.bounding_box.bottom()).reduce(f64::max)?;
        Some(Self { top, bottom })
    }

    fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

/// `clamp(page_height * ratio, min, max)`
pub fn percentage_fallback(page_height: f64, config: &DetectionConfig) -> f64 {
    (page_height * config.fallback_ratio).clamp(config.fallback_min, config.fallback_max)
}

/// Runs the cascade for headers and footers
#[derive(Debug, Clone)]
pub struct BoundaryDetector {
    config: DetectionConfig,
    oracle: OracleAdapter,
    lazy: LazyContentTrigger,
}

impl BoundaryDetector {
    pub fn new(config: DetectionConfig, oracle: OracleAdapter, lazy: LazyContentTrigger) -> Self {
        Self { config, oracle, lazy }
    }

    fn region_config(&self, region: Region) -> &RegionConfig {
        match region {
            Region::Header => &self.config.header,
            Region::Footer => &self.config.footer,
        }
    }

    pub async fn detect_header(&self, session: &PageSession) -> Result<DetectionOutcome, Error> {
        self.detect(session, Region::Header).await
    }

    /// Renders lazy content first; the page height is taken afterwards
    pub async fn detect_footer(&self, session: &PageSession) -> Result<DetectionOutcome, Error> {
        self.detect(session, Region::Footer).await
    }

    /// Run the cascade for `region`. Only a failure to read the document height
    /// is an error; every stage failure is a rejection.
    #[instrument(skip(self, session), fields(url = %session.url()))]
    pub async fn detect(&self, session: &PageSession, region: Region) -> Result<DetectionOutcome, Error> {
        if region == Region::Footer {
            if let Err(e) = self.lazy.force_render(session).await {
                warn!("Lazy content trigger failed: {}", e);
            }
        }

        let page_height = session.page().scroll_height().await?;
        let mut attempts = Vec::new();

        for stage in [DetectionStage::Standard, DetectionStage::MultiElement] {
            let result = match stage {
                DetectionStage::Standard => self.standard(session, region, page_height).await,
                _ => self.multi_element(session, region, page_height).await,
            };

            match result {
                StageResult::Accepted(attempt) => {
                    let height = attempt.height.unwrap_or_default();
                    attempts.push(attempt);
                    return Ok(self.finish(region, height, stage, attempts, page_height));
                }
                StageResult::Rejected(attempt) => {
                    debug!("{} {} rejected: {:?}", region, stage, attempt.reason);
                    attempts.push(attempt);
                }
            }
        }

        let height = percentage_fallback(page_height, &self.config);
        attempts.push(DetectionAttempt {
            stage: DetectionStage::PercentageFallback,
            height: Some(height),
            verdict: None,
            reason: None,
        });
        Ok(self.finish(region, height, DetectionStage::PercentageFallback, attempts, page_height))
    }

    fn finish(
        &self,
        region: Region,
        height: f64,
        stage: DetectionStage,
        attempts: Vec<DetectionAttempt>,
        page_height: f64,
    ) -> DetectionOutcome {
        let height = height.max(0.0).round() as u32;
        info!("{} height {}px via {} (page {:.0}px)", region, height, stage, page_height);
        DetectionOutcome {
            region,
            height,
            stage,
            attempts,
            page_height,
        }
    }

    async fn standard(&self, session: &PageSession, region: Region, page_height: f64) -> StageResult {
        let config = self.region_config(region);
        let selectors = SelectorSet::from(config.selectors.as_slice());

        let candidate = ElementLocator::new(session.page().as_ref())
            .find(&selectors, None, Some(config.max_height))
            .await;

        match candidate {
            Some(candidate) => {
                debug!("{} standard candidate '{}'", region, candidate.selector);
                self.validate(session, region, DetectionStage::Standard, candidate.height(), page_height)
                    .await
            }
            None => StageResult::Rejected(DetectionAttempt::rejected(
                DetectionStage::Standard,
                None,
                "no visible candidate within the height cap",
            )),
        }
    }

    async fn multi_element(&self, session: &PageSession, region: Region, page_height: f64) -> StageResult {
        let config = self.region_config(region);
        let window = config.probe_window;
        let locator = ElementLocator::new(session.page().as_ref());

        let mut found = Vec::new();
        for (family, selectors) in region.families() {
            let members = match region {
                Region::Header => locator.find_all(&selectors, None, |bbox| bbox.y >= 0.0 && bbox.y <= window).await,
                Region::Footer => {
                    locator
                        .find_all(&selectors, None, |bbox| bbox.bottom() >= page_height - window)
                        .await
                }
            };
            debug!("{} family '{}': {} elements", region, family, members.len());
            found.extend(members);
        }

        let stage = DetectionStage::MultiElement;
        let Some(span) = Span::covering(&found) else {
            return StageResult::Rejected(DetectionAttempt::rejected(stage, None, "no family elements in the probe window"));
        };

        if span.height() < config.min_span || span.height() > config.max_span {
            return StageResult::Rejected(DetectionAttempt::rejected(
                stage,
                None,
                format!(
                    "span {:.0}..{:.0} ({:.0}px) outside {:.0}..{:.0}px",
                    span.top,
                    span.bottom,
                    span.height(),
                    config.min_span,
                    config.max_span
                ),
            ));
        }

        let height = match region {
            Region::Header => span.bottom,
            Region::Footer => page_height - span.top,
        };
        self.validate(session, region, stage, height, page_height).await
    }

    /// Crop the candidate from the page edge and ask the oracle
    async fn validate(
        &self,
        session: &PageSession,
        region: Region,
        stage: DetectionStage,
        height: f64,
        page_height: f64,
    ) -> StageResult {
        let height = height.min(page_height);
        let width = f64::from(session.viewport().width);
        let top = match region {
            Region::Header => 0.0,
            Region::Footer => (page_height - height).max(0.0),
        };

        let crop = match session
            .page()
            .screenshot(ScreenshotOptions::clipped(Clip::new(0.0, top, width, height)))
            .await
        {
            Ok(png) => png,
            Err(e) => {
                return StageResult::Rejected(DetectionAttempt::rejected(
                    stage,
                    Some(height),
                    format!("crop failed: {}", e),
                ))
            }
        };

        let context = OracleContext {
            url: session.url().to_string(),
            region,
            candidate_height: height,
            page_height,
        };
        let verdict = self.oracle.validate(&crop, height, page_height, &context).await;
        let accepted = self.oracle.accepts(&verdict);

        let attempt = DetectionAttempt {
            stage,
            height: Some(height),
            reason: (!accepted).then(|| {
                format!(
                    "oracle: complete={} confidence={:.2} (needs > {:.2})",
                    verdict.is_complete,
                    verdict.confidence,
                    self.oracle.threshold()
                )
            }),
            verdict: Some(verdict),
        };

        if accepted {
            StageResult::Accepted(attempt)
        } else {
            StageResult::Rejected(attempt)
        }
    }
}
