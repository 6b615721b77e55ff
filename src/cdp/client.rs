//! CDP client implementation
//!
//! This module provides a high-level CDP client with typed methods for common operations.

use super::traits::*;
use super::types::*;
use crate::Error;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;
use tracing::{debug, info};

/// CDP client implementation
#[derive(Debug, Clone)]
pub struct CdpClientImpl {
    connection: Arc<dyn CdpConnection>,
}

impl CdpClientImpl {
    /// Create a new CDP client over an established connection
    pub fn new(connection: Arc<dyn CdpConnection>) -> Self {
        Self { connection }
    }

    /// Parse remote object value to evaluation result
    pub(crate) fn parse_remote_object(obj: &RemoteObject) -> EvaluationResult {
        match obj.r#type.as_str() {
            "string" => EvaluationResult::String(
                obj.value
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            ),
            "number" => EvaluationResult::Number(obj.value.as_ref().and_then(|v| v.as_f64()).unwrap_or(0.0)),
            "boolean" => EvaluationResult::Bool(obj.value.as_ref().and_then(|v| v.as_bool()).unwrap_or(false)),
            "object" => match &obj.value {
                Some(serde_json::Value::Null) | None => EvaluationResult::Null,
                Some(value) => EvaluationResult::Object(value.clone()),
            },
            "undefined" => EvaluationResult::Null,
            other => {
                debug!("parse_remote_object: unhandled type '{}', returning Null", other);
                EvaluationResult::Null
            }
        }
    }

    /// Decode a `Runtime.*` reply, surfacing page exceptions
    fn decode_evaluation(result: serde_json::Value) -> Result<EvaluationResult, Error> {
        let response: EvaluateResponse = serde_json::from_value(result)?;

        if let Some(exception) = response.exception_details {
            return Err(Error::script_execution_failed(exception.message()));
        }

        Ok(Self::parse_remote_object(&response.result))
    }
}

#[async_trait]
impl CdpClient for CdpClientImpl {
    fn connection(&self) -> Arc<dyn CdpConnection> {
        Arc::clone(&self.connection)
    }

    async fn navigate(&self, url: &str) -> Result<NavigationResult, Error> {
        info!("Navigating to {}", url);

        let params = NavigateParams {
            url: url.to_string(),
            referrer: None,
        };

        let result = self
            .call_method("Page.navigate", serde_json::to_value(params)?)
            .await
            .map_err(|e| Error::navigation_failed(format!("{}: {}", url, e)))?;

        // DNS failures and refused connections come back as errorText, not as a CDP error
        if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(Error::navigation_failed(format!("{}: {}", url, error_text)));
        }

        Ok(NavigationResult {
            frame_id: result.get("frameId").and_then(|v| v.as_str()).map(str::to_string),
            loader_id: result.get("loaderId").and_then(|v| v.as_str()).map(str::to_string),
            url: url.to_string(),
        })
    }

    async fn evaluate(&self, script: &str, await_promise: bool) -> Result<EvaluationResult, Error> {
        let params = EvaluateParams {
            expression: script.to_string(),
            await_promise,
            return_by_value: true,
        };

        let result = self.call_method("Runtime.evaluate", serde_json::to_value(params)?).await?;
        Self::decode_evaluation(result)
    }

    async fn call_function_on(&self, object_id: &str, function_declaration: &str) -> Result<EvaluationResult, Error> {
        let params = CallFunctionOnParams {
            object_id: object_id.to_string(),
            function_declaration: function_declaration.to_string(),
            await_promise: true,
            return_by_value: true,
        };

        let result = self
            .call_method("Runtime.callFunctionOn", serde_json::to_value(params)?)
            .await?;
        Self::decode_evaluation(result)
    }

    async fn screenshot(
        &self,
        format: ScreenshotFormat,
        clip: Option<Clip>,
        capture_beyond_viewport: bool,
    ) -> Result<Vec<u8>, Error> {
        debug!("Capturing screenshot (clip: {:?}, beyond viewport: {})", clip, capture_beyond_viewport);

        let (format, quality) = match format {
            ScreenshotFormat::Png => ("png", None),
            ScreenshotFormat::Jpeg(q) => ("jpeg", Some(q)),
        };

        let params = ScreenshotParams {
            format: format.to_string(),
            quality,
            clip,
            capture_beyond_viewport,
        };

        let result = self
            .call_method("Page.captureScreenshot", serde_json::to_value(params)?)
            .await?;

        let data = result
            .get("data")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::cdp("No data in screenshot result"))?;

        BASE64
            .decode(data)
            .map_err(|e| Error::cdp(format!("Failed to decode screenshot: {}", e)))
    }

    async fn get_content(&self) -> Result<String, Error> {
        match self.evaluate("document.documentElement.outerHTML", false).await? {
            EvaluationResult::String(html) => Ok(html),
            _ => Ok(String::new()),
        }
    }

    async fn enable_domain(&self, domain: &str) -> Result<(), Error> {
        debug!("Enabling domain: {}", domain);
        self.call_method(&format!("{}.enable", domain), serde_json::json!({}))
            .await?;
        Ok(())
    }

    async fn call_method(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, Error> {
        let response = self.connection.send_command(method, params).await?;
        response.result.ok_or_else(|| Error::cdp(format!("No result in {} response", method)))
    }

    async fn subscribe_events(&self, event_type: &str) -> Result<tokio::sync::mpsc::Receiver<CdpEvent>, Error> {
        let mut event_receiver = self.connection.listen_events().await?;

        let (tx, rx) = tokio::sync::mpsc::channel(100);
        let filter = event_type.to_string();

        tokio::spawn(async move {
            while let Some(event) = event_receiver.recv().await {
                if (filter == "*" || event.method == filter) && tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}
