//! CDP (Chrome DevTools Protocol) layer traits
//!
//! This module defines the abstract interfaces for CDP communication.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::types::Clip;

/// CDP event representation
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// Event method (e.g., "Page.loadEventFired")
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// CDP response representation
#[derive(Debug, Clone)]
pub struct CdpResponse {
    /// Response ID (matches request ID)
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<CdpError>,
}

/// CDP error representation
#[derive(Debug, Clone)]
pub struct CdpError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

/// CDP connection trait
///
/// Represents a WebSocket connection to a Chrome DevTools Protocol target.
#[async_trait]
pub trait CdpConnection: Send + Sync + std::fmt::Debug {
    /// Send a CDP command and wait for response
    async fn send_command(&self, method: &str, params: Value) -> Result<CdpResponse, crate::Error>;

    /// Subscribe to CDP events
    async fn listen_events(&self) -> Result<tokio::sync::mpsc::Receiver<CdpEvent>, crate::Error>;

    /// Close the connection
    async fn close(&self) -> Result<(), crate::Error>;

    /// Check if connection is active
    fn is_active(&self) -> bool;
}

/// CDP client trait
///
/// High-level CDP client that provides typed methods for the operations
/// measurement and capture rely on.
#[async_trait]
pub trait CdpClient: Send + Sync + std::fmt::Debug {
    /// Get the underlying connection
    fn connection(&self) -> Arc<dyn CdpConnection>;

    /// Start navigation to a URL. Does not wait for any load milestone.
    async fn navigate(&self, url: &str) -> Result<NavigationResult, crate::Error>;

    /// Evaluate JavaScript in the page, returning the value by value
    async fn evaluate(&self, script: &str, await_promise: bool) -> Result<EvaluationResult, crate::Error>;

    /// Call a function declaration with `this` bound to a remote object
    async fn call_function_on(
        &self,
        object_id: &str,
        function_declaration: &str,
    ) -> Result<EvaluationResult, crate::Error>;

    /// Capture a screenshot, optionally clipped and beyond the viewport
    async fn screenshot(
        &self,
        format: ScreenshotFormat,
        clip: Option<Clip>,
        capture_beyond_viewport: bool,
    ) -> Result<Vec<u8>, crate::Error>;

    /// Get the serialized document
    async fn get_content(&self) -> Result<String, crate::Error>;

    /// Enable a domain
    async fn enable_domain(&self, domain: &str) -> Result<(), crate::Error>;

    /// Call a raw CDP method (returns JSON Value)
    async fn call_method(&self, method: &str, params: Value) -> Result<Value, crate::Error>;

    /// Subscribe to events matching `event_type` ("*" for all)
    async fn subscribe_events(&self, event_type: &str) -> Result<tokio::sync::mpsc::Receiver<CdpEvent>, crate::Error>;
}

/// Navigation result
#[derive(Debug, Clone)]
pub struct NavigationResult {
    pub frame_id: Option<String>,
    pub loader_id: Option<String>,
    pub url: String,
}

/// JavaScript evaluation result
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationResult {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    /// Object/Array (as JSON)
    Object(Value),
}

impl EvaluationResult {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EvaluationResult::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EvaluationResult::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EvaluationResult::String(s) => Some(s),
            _ => None,
        }
    }

    /// Owned JSON form, for results decoded with serde
    pub fn into_json(self) -> Value {
        match self {
            EvaluationResult::String(s) => Value::String(s),
            EvaluationResult::Number(n) => serde_json::json!(n),
            EvaluationResult::Bool(b) => Value::Bool(b),
            EvaluationResult::Null => Value::Null,
            EvaluationResult::Object(v) => v,
        }
    }
}

/// Screenshot format
#[derive(Debug, Clone, Copy, Default)]
pub enum ScreenshotFormat {
    #[default]
    Png,
    /// JPEG with quality 0-100
    Jpeg(u8),
}

/// CDP browser trait
///
/// Controls browser-level operations via the DevTools HTTP API.
#[async_trait]
pub trait CdpBrowser: Send + Sync + std::fmt::Debug {
    /// Get browser version
    async fn get_version(&self) -> Result<BrowserVersion, crate::Error>;

    /// Open a new tab at `url`
    async fn create_target(&self, url: &str) -> Result<TargetInfo, crate::Error>;

    /// Close a tab by target id
    async fn close_target(&self, target_id: &str) -> Result<(), crate::Error>;

    /// Connect a client to a target's WebSocket URL
    async fn create_client(&self, ws_url: &str) -> Result<Arc<dyn CdpClient>, crate::Error>;
}

/// Browser version information
#[derive(Debug, Clone)]
pub struct BrowserVersion {
    pub protocol_version: String,
    pub product: String,
    pub user_agent: String,
    pub js_version: String,
}

/// Newly created target
#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub target_id: String,
    pub ws_url: String,
}
