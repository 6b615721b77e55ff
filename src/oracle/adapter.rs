//! Oracle adapter applying the availability policy

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::openai::OpenAiOracle;
use super::traits::{OracleContext, OracleVerdict, VisualOracle};
use crate::config::OracleConfig;
use crate::Error;

/// Verdict substituted when the backend cannot answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OraclePolicy {
    /// Accept the geometry unvalidated
    FailOpen,
    /// Reject the geometry
    FailClosed,
}

impl OraclePolicy {
    pub fn from_flag(fail_open: bool) -> Self {
        if fail_open {
            OraclePolicy::FailOpen
        } else {
            OraclePolicy::FailClosed
        }
    }

    fn verdict(&self, reason: &Error) -> OracleVerdict {
        match self {
            OraclePolicy::FailOpen => OracleVerdict::new(true, 1.0, format!("fail-open: {}", reason)),
            OraclePolicy::FailClosed => OracleVerdict::new(false, 0.0, format!("fail-closed: {}", reason)),
        }
    }
}

/// Backend used when no API key is configured; always unavailable
#[derive(Debug, Default)]
pub struct DisabledOracle;

#[async_trait::async_trait]
impl VisualOracle for DisabledOracle {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn judge(&self, _image_png: &[u8], _context: &OracleContext) -> Result<OracleVerdict, Error> {
        Err(Error::oracle_unavailable("no oracle backend configured"))
    }
}

/// Wraps a backend with a timeout, the availability policy and the
/// acceptance threshold
#[derive(Debug, Clone)]
pub struct OracleAdapter {
    backend: Arc<dyn VisualOracle>,
    policy: OraclePolicy,
    timeout: Duration,
    threshold: f64,
}

impl OracleAdapter {
    pub fn new(backend: Arc<dyn VisualOracle>, policy: OraclePolicy, timeout: Duration, threshold: f64) -> Self {
        Self {
            backend,
            policy,
            timeout,
            threshold,
        }
    }

    /// Adapter over the configured backend
    pub fn from_config(config: &OracleConfig) -> Self {
        let backend: Arc<dyn VisualOracle> = match OpenAiOracle::from_config(config) {
            Some(oracle) => Arc::new(oracle),
            None => {
                info!("No oracle API key configured; verdicts follow the availability policy");
                Arc::new(DisabledOracle)
            }
        };
        Self::with_backend(backend, config)
    }

    /// Configured policy, timeout and threshold around `backend`
    pub fn with_backend(backend: Arc<dyn VisualOracle>, config: &OracleConfig) -> Self {
        Self::new(
            backend,
            OraclePolicy::from_flag(config.fail_open),
            Duration::from_millis(config.timeout_ms),
            config.confidence_threshold,
        )
    }

    pub fn policy(&self) -> OraclePolicy {
        self.policy
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Ask the backend; unavailability yields the policy verdict
    pub async fn validate(
        &self,
        image_png: &[u8],
        candidate_height: f64,
        page_height: f64,
        context: &OracleContext,
    ) -> OracleVerdict {
        let context = OracleContext {
            candidate_height,
            page_height,
            ..context.clone()
        };

        let outcome = match tokio::time::timeout(self.timeout, self.backend.judge(image_png, &context)).await {
            Ok(result) => result,
            Err(_) => Err(Error::oracle_unavailable(format!(
                "{} did not answer within {:?}",
                self.backend.name(),
                self.timeout
            ))),
        };

        match outcome {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Oracle {} unavailable for {} ({}), applying {:?}", self.backend.name(), context.region, e, self.policy);
                self.policy.verdict(&e)
            }
        }
    }

    /// Threshold test against the configured confidence
    pub fn accepts(&self, verdict: &OracleVerdict) -> bool {
        verdict.accepts(self.threshold)
    }
}
