//! Unified error types for pagesplit

use std::fmt;
use thiserror::Error;

/// Unified Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for pagesplit
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// CDP protocol errors
    #[error("CDP error: {0}")]
    Cdp(String),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Raster decode/encode errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Page session not found or already closed
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Timeout
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// Target unreachable or initial load timed out
    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    /// Script execution failed
    #[error("Script execution failed: {0}")]
    ScriptExecutionFailed(String),

    /// Visual oracle unreachable or unreadable
    #[error("Oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// Header and footer regions overlap
    #[error("Invalid dimensions: header ({header_height}px) overlaps footer (footer top at {footer_top}px, footer height {footer_height}px, page height {page_height}px)")]
    Overlap {
        header_height: u32,
        footer_height: u32,
        footer_top: i64,
        page_height: u32,
    },

    /// Full-page capture failed
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new WebSocket error
    pub fn websocket<S: Into<String>>(msg: S) -> Self {
        Error::WebSocket(msg.into())
    }

    /// Create a new CDP error
    pub fn cdp<S: Into<String>>(msg: S) -> Self {
        Error::Cdp(msg.into())
    }

    /// Create a new session not found error
    pub fn session_not_found<S: Into<String>>(id: S) -> Self {
        Error::SessionNotFound(id.into())
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    /// Create a new navigation failed error
    pub fn navigation_failed<S: Into<String>>(msg: S) -> Self {
        Error::NavigationFailed(msg.into())
    }

    /// Create a new script execution failed error
    pub fn script_execution_failed<S: Into<String>>(msg: S) -> Self {
        Error::ScriptExecutionFailed(msg.into())
    }

    /// Create a new oracle unavailable error
    pub fn oracle_unavailable<S: Into<String>>(msg: S) -> Self {
        Error::OracleUnavailable(msg.into())
    }

    /// Create a new overlap error from the measured heights
    pub fn overlap(header_height: u32, footer_height: u32, page_height: u32) -> Self {
        Error::Overlap {
            header_height,
            footer_height,
            footer_top: i64::from(page_height) - i64::from(footer_height),
            page_height,
        }
    }

    /// Create a new capture failed error
    pub fn capture_failed<S: Into<String>>(msg: S) -> Self {
        Error::CaptureFailed(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Stable process exit code for this error kind
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Configuration(_) => 2,
            Error::NavigationFailed(_) => 3,
            Error::Overlap { .. } => 4,
            Error::CaptureFailed(_) => 5,
            _ => 1,
        }
    }
}

/// Pipeline stage a run was in when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStage {
    Open,
    Stabilize,
    HeaderDetection,
    FooterDetection,
    Capture,
    Segmentation,
    Output,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Open => "open",
            PipelineStage::Stabilize => "stabilize",
            PipelineStage::HeaderDetection => "header-detection",
            PipelineStage::FooterDetection => "footer-detection",
            PipelineStage::Capture => "capture",
            PipelineStage::Segmentation => "segmentation",
            PipelineStage::Output => "output",
        };
        f.write_str(name)
    }
}

/// Last-known measurements at the time a run failed
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct MeasurementState {
    pub page_height: Option<u32>,
    pub header_height: Option<u32>,
    pub header_stage: Option<String>,
    pub footer_height: Option<u32>,
    pub footer_stage: Option<String>,
}

impl fmt::Display for MeasurementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map_or_else(|| "-".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "page={} header={} ({}) footer={} ({})",
            opt(&self.page_height),
            opt(&self.header_height),
            opt(&self.header_stage),
            opt(&self.footer_height),
            opt(&self.footer_stage),
        )
    }
}

/// Fatal pipeline error with the URL, stage and measurements attached
#[derive(Error, Debug)]
#[error("{url} failed during {stage}: {source} [{measurements}]")]
pub struct RunFailure {
    pub url: String,
    pub stage: PipelineStage,
    pub measurements: MeasurementState,
    #[source]
    pub source: Error,
}

impl RunFailure {
    pub fn new(url: &str, stage: PipelineStage, measurements: MeasurementState, source: Error) -> Self {
        Self {
            url: url.to_string(),
            stage,
            measurements,
            source,
        }
    }

    /// Exit code of the underlying error
    pub fn exit_code(&self) -> i32 {
        self.source.exit_code()
    }
}
