//! Configuration management for pagesplit

use crate::{Error, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub browser: BrowserConfig,
    pub timeouts: TimeoutConfig,
    pub lazy: LazyLoadConfig,
    pub detection: DetectionConfig,
    pub oracle: OracleConfig,
    pub capture: CaptureConfig,
    pub output: OutputConfig,

    /// Log level
    pub log_level: String,
}

/// Rendering session configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// CDP endpoint of a running Chrome (e.g. "ws://localhost:9222")
    pub cdp_endpoint: String,

    /// Viewport width
    pub viewport_width: u32,

    /// Viewport height
    pub viewport_height: u32,

    /// Fixed user agent; a desktop user agent is picked when unset
    pub user_agent: Option<String>,

    /// Accept-Language header sent with every request
    pub accept_language: String,

    /// Maximum concurrent page sessions
    pub max_concurrent_sessions: usize,

    /// Apply anti-detection overrides
    pub stealth_enabled: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            cdp_endpoint: "ws://localhost:9222".to_string(),
            viewport_width: 1280,
            viewport_height: 1024,
            user_agent: None,
            accept_language: "en-US,en;q=0.9".to_string(),
            max_concurrent_sessions: 4,
            stealth_enabled: true,
        }
    }
}

/// Wait bounds for each suspension point, in milliseconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub navigation_ms: u64,
    pub network_idle_ms: u64,
    pub load_fallback_ms: u64,
    pub ready_state_ms: u64,
    pub settle_ms: u64,
    /// Quiet window that counts as network quiescence
    pub idle_window_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation_ms: 90_000,
            network_idle_ms: 30_000,
            load_fallback_ms: 30_000,
            ready_state_ms: 15_000,
            settle_ms: 1_500,
            idle_window_ms: 500,
        }
    }
}

/// Scroll choreography delays, in milliseconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LazyLoadConfig {
    pub first_scroll_wait_ms: u64,
    pub back_scroll_wait_ms: u64,
    pub back_scroll_px: f64,
    pub network_idle_ms: u64,
    pub settle_ms: u64,
    pub final_scroll_wait_ms: u64,
}

impl Default for LazyLoadConfig {
    fn default() -> Self {
        Self {
            first_scroll_wait_ms: 1_500,
            back_scroll_wait_ms: 800,
            back_scroll_px: 100.0,
            network_idle_ms: 30_000,
            settle_ms: 6_000,
            final_scroll_wait_ms: 1_500,
        }
    }
}

/// Per-region detection tuning
#[derive(Debug, Clone)]
pub struct RegionConfig {
    /// Ordered selector candidates for standard detection
    pub selectors: Vec<String>,
    /// Candidates taller than this are skipped
    pub max_height: f64,
    /// Vertical window (from the page top for headers, from the bottom for footers)
    /// that multi-element synthesis probes
    pub probe_window: f64,
    /// Sanity band for synthesized spans
    pub min_span: f64,
    pub max_span: f64,
}

impl RegionConfig {
    fn header_default() -> Self {
        Self {
            selectors: crate::detect::selectors::DEFAULT_HEADER_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_height: 500.0,
            probe_window: 300.0,
            min_span: 40.0,
            max_span: 600.0,
        }
    }

    fn footer_default() -> Self {
        Self {
            selectors: crate::detect::selectors::DEFAULT_FOOTER_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_height: 800.0,
            probe_window: 1_000.0,
            min_span: 40.0,
            max_span: 1_200.0,
        }
    }
}

/// Partial region settings as read from a config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RegionOverrides {
    selectors: Option<Vec<String>>,
    max_height: Option<f64>,
    probe_window: Option<f64>,
    min_span: Option<f64>,
    max_span: Option<f64>,
}

impl RegionOverrides {
    fn apply(self, mut base: RegionConfig) -> RegionConfig {
        if let Some(selectors) = self.selectors {
            base.selectors = selectors;
        }
        base.max_height = self.max_height.unwrap_or(base.max_height);
        base.probe_window = self.probe_window.unwrap_or(base.probe_window);
        base.min_span = self.min_span.unwrap_or(base.min_span);
        base.max_span = self.max_span.unwrap_or(base.max_span);
        base
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DetectionOverrides {
    header: RegionOverrides,
    footer: RegionOverrides,
    fallback_ratio: Option<f64>,
    fallback_min: Option<f64>,
    fallback_max: Option<f64>,
}

impl From<DetectionOverrides> for DetectionConfig {
    fn from(file: DetectionOverrides) -> Self {
        let base = DetectionConfig::default();
        Self {
            header: file.header.apply(base.header),
            footer: file.footer.apply(base.footer),
            fallback_ratio: file.fallback_ratio.unwrap_or(base.fallback_ratio),
            fallback_min: file.fallback_min.unwrap_or(base.fallback_min),
            fallback_max: file.fallback_max.unwrap_or(base.fallback_max),
        }
    }
}

/// Boundary detection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "DetectionOverrides")]
pub struct DetectionConfig {
    pub header: RegionConfig,
    pub footer: RegionConfig,
    /// Fraction of the page used by the percentage fallback
    pub fallback_ratio: f64,
    pub fallback_min: f64,
    pub fallback_max: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            header: RegionConfig::header_default(),
            footer: RegionConfig::footer_default(),
            fallback_ratio: 0.20,
            fallback_min: 100.0,
            fallback_max: 800.0,
        }
    }
}

/// Visual completeness oracle configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// OpenAI-compatible API base
    pub api_base: String,
    /// API key; falls back to OPENAI_API_KEY
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_ms: u64,
    /// Verdicts must be strictly above this confidence to be accepted
    pub confidence_threshold: f64,
    /// Accept unvalidated geometry when the oracle is unavailable
    pub fail_open: bool,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-5-mini".to_string(),
            timeout_ms: 60_000,
            confidence_threshold: 0.6,
            fail_open: true,
        }
    }
}

/// Full-page capture backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureBackend {
    /// Hosted render API
    RenderApi,
    /// Independent session on the configured browser
    Browser,
}

/// Full-page capture configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: CaptureBackend,
    pub api_base: String,
    pub api_secret: Option<String>,
    pub timeout_ms: u64,
    /// Selectors clicked before capture to dismiss cookie banners and modals
    pub modal_close_selectors: Vec<String>,
    pub capture_html: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::Browser,
            api_base: "https://api.urlbox.io".to_string(),
            api_secret: None,
            timeout_ms: 120_000,
            modal_close_selectors: crate::detect::selectors::DEFAULT_MODAL_CLOSE_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            capture_html: true,
        }
    }
}

/// Output layout configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Extract per-region markup from the measurement session
    pub extract_markup: bool,
    /// Maximum URLs processed in parallel by a batch
    pub batch_concurrency: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            extract_markup: true,
            batch_concurrency: 4,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser: BrowserConfig::default(),
            timeouts: TimeoutConfig::default(),
            lazy: LazyLoadConfig::default(),
            detection: DetectionConfig::default(),
            oracle: OracleConfig::default(),
            capture: CaptureConfig::default(),
            output: OutputConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| Error::configuration(format!("Invalid {}", name))),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::configuration(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Override values from PAGESPLIT_* environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(endpoint) = env::var("PAGESPLIT_CDP_ENDPOINT") {
            self.browser.cdp_endpoint = endpoint;
        }

        if let Some(max) = parse_var("PAGESPLIT_MAX_SESSIONS")? {
            self.browser.max_concurrent_sessions = max;
        }

        if let Ok(user_agent) = env::var("PAGESPLIT_USER_AGENT") {
            self.browser.user_agent = Some(user_agent);
        }

        if let Some(stealth) = parse_var("PAGESPLIT_STEALTH")? {
            self.browser.stealth_enabled = stealth;
        }

        if let Some(timeout) = parse_var("PAGESPLIT_NAVIGATION_TIMEOUT")? {
            self.timeouts.navigation_ms = timeout;
        }

        if let Some(height) = parse_var("PAGESPLIT_MAX_HEADER_HEIGHT")? {
            self.detection.header.max_height = height;
        }

        if let Some(height) = parse_var("PAGESPLIT_MAX_FOOTER_HEIGHT")? {
            self.detection.footer.max_height = height;
        }

        if let Ok(model) = env::var("PAGESPLIT_ORACLE_MODEL") {
            self.oracle.model = model;
        }

        if let Ok(api_base) = env::var("PAGESPLIT_ORACLE_API_BASE") {
            self.oracle.api_base = api_base;
        }

        if let Some(fail_open) = parse_var("PAGESPLIT_ORACLE_FAIL_OPEN")? {
            self.oracle.fail_open = fail_open;
        }

        if self.oracle.api_key.is_none() {
            self.oracle.api_key = env::var("OPENAI_API_KEY").ok();
        }

        if let Ok(secret) = env::var("PAGESPLIT_CAPTURE_SECRET") {
            self.capture.api_secret = Some(secret);
            self.capture.backend = CaptureBackend::RenderApi;
        }

        if let Ok(dir) = env::var("PAGESPLIT_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(dir);
        }

        if let Ok(log_level) = env::var("PAGESPLIT_LOG_LEVEL") {
            self.log_level = log_level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.browser.max_concurrent_sessions == 0 {
            errors.push("max_concurrent_sessions must be positive".to_string());
        }

        if self.output.batch_concurrency == 0 {
            errors.push("batch_concurrency must be positive".to_string());
        }

        if self.browser.viewport_width == 0 || self.browser.viewport_height == 0 {
            errors.push("viewport dimensions must be positive".to_string());
        }

        if !(0.0..=1.0).contains(&self.oracle.confidence_threshold) {
            errors.push("oracle confidence_threshold must be within [0, 1]".to_string());
        }

        let detection = &self.detection;
        if detection.fallback_min > detection.fallback_max {
            errors.push("fallback_min must not exceed fallback_max".to_string());
        }

        for (name, region) in [("header", &detection.header), ("footer", &detection.footer)] {
            if region.selectors.is_empty() {
                errors.push(format!("{} selectors must not be empty", name));
            }
            if region.min_span > region.max_span {
                errors.push(format!("{} min_span must not exceed max_span", name));
            }
        }

        if self.capture.backend == CaptureBackend::RenderApi && self.capture.api_secret.is_none() {
            errors.push("render-api capture requires capture.api_secret".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::configuration(errors.join("; ")))
        }
    }
}
