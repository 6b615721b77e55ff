//! Visual oracle traits and verdict types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::detect::Region;
use crate::Error;

/// Judgement on whether a cropped region looks complete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleVerdict {
    pub is_complete: bool,
    /// Always within [0, 1]
    pub confidence: f64,
    pub rationale: String,
}

impl OracleVerdict {
    pub fn new(is_complete: bool, confidence: f64, rationale: impl Into<String>) -> Self {
        let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        Self {
            is_complete,
            confidence,
            rationale: rationale.into(),
        }
    }

    /// Complete and strictly above the threshold
    pub fn accepts(&self, threshold: f64) -> bool {
        self.is_complete && self.confidence > threshold
    }
}

/// What the oracle is shown alongside the crop
#[derive(Debug, Clone, PartialEq)]
pub struct OracleContext {
    pub url: String,
    pub region: Region,
    pub candidate_height: f64,
    pub page_height: f64,
}

impl OracleContext {
    /// Share of the page the candidate occupies, in percent
    pub fn page_percentage(&self) -> f64 {
        if self.page_height > 0.0 {
            self.candidate_height / self.page_height * 100.0
        } else {
            0.0
        }
    }
}

/// Visual completeness backend
///
/// Errors mean "unavailable"; the adapter turns them into a verdict.
#[async_trait]
pub trait VisualOracle: Send + Sync + std::fmt::Debug {
    /// Backend name for logs
    fn name(&self) -> &str;

    async fn judge(&self, image_png: &[u8], context: &OracleContext) -> Result<OracleVerdict, Error>;
}
