//! Deterministic oracle stubs for testing

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use super::traits::{OracleContext, OracleVerdict, VisualOracle};
use crate::detect::Region;
use crate::Error;

type Rule = Box<dyn Fn(&OracleContext) -> Option<Result<OracleVerdict, Error>> + Send + Sync>;

/// Oracle answering from rules, then a queue, then a default
///
/// Rules see the request context and may decline by returning `None`.
pub struct ScriptedOracle {
    rules: Vec<Rule>,
    queue: Mutex<VecDeque<Result<OracleVerdict, Error>>>,
    default: Option<OracleVerdict>,
    delay: Option<Duration>,
    requests: Mutex<Vec<OracleContext>>,
}

impl std::fmt::Debug for ScriptedOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedOracle")
            .field("rules", &self.rules.len())
            .field("default", &self.default)
            .finish()
    }
}

impl ScriptedOracle {
    /// Unavailable unless a rule or queued answer applies
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            queue: Mutex::new(VecDeque::new()),
            default: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Same verdict for every request
    pub fn always(verdict: OracleVerdict) -> Self {
        Self {
            default: Some(verdict),
            ..Self::new()
        }
    }

    /// Never reachable
    pub fn unavailable() -> Self {
        Self::new()
    }

    /// Answer requests for `region` with a candidate of exactly `height`
    pub fn on(mut self, region: Region, height: f64, verdict: OracleVerdict) -> Self {
        self.rules.push(Box::new(move |context| {
            (context.region == region && (context.candidate_height - height).abs() < 0.5)
                .then(|| Ok(verdict.clone()))
        }));
        self
    }

    /// Answer every request for `region`
    pub fn on_region(mut self, region: Region, verdict: OracleVerdict) -> Self {
        self.rules
            .push(Box::new(move |context| (context.region == region).then(|| Ok(verdict.clone()))));
        self
    }

    /// Queue a one-shot answer used before the default
    pub fn then(self, answer: Result<OracleVerdict, Error>) -> Self {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(answer);
        }
        self
    }

    pub fn with_default(mut self, verdict: OracleVerdict) -> Self {
        self.default = Some(verdict);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Contexts seen so far
    pub fn requests(&self) -> Vec<OracleContext> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VisualOracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn judge(&self, _image_png: &[u8], context: &OracleContext) -> Result<OracleVerdict, Error> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(context.clone());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(answer) = self.rules.iter().find_map(|rule| rule(context)) {
            return answer;
        }

        if let Some(answer) = self.queue.lock().ok().and_then(|mut q| q.pop_front()) {
            return answer;
        }

        self.default
            .clone()
            .ok_or_else(|| Error::oracle_unavailable("scripted oracle has no answer"))
    }
}
