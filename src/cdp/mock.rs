//! Mock CDP implementation for testing
//!
//! A scriptable connection that answers commands from per-method responders and
//! records every call, plus a browser that hands out clients over it.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::cdp::client::CdpClientImpl;
use crate::cdp::traits::*;
use crate::Error;

type Responder = Arc<dyn Fn(&Value) -> Result<Value, Error> + Send + Sync>;

/// Mock CDP connection
pub struct MockCdpConnection {
    is_active: AtomicBool,
    next_id: AtomicU64,
    responders: Mutex<HashMap<String, Responder>>,
    calls: Mutex<Vec<(String, Value)>>,
    listeners: Mutex<Vec<tokio::sync::mpsc::Sender<CdpEvent>>>,
}

impl std::fmt::Debug for MockCdpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCdpConnection")
            .field("is_active", &self.is_active.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockCdpConnection {
    pub fn new() -> Self {
        Self {
            is_active: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            responders: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Deliver an event to every listener
    pub fn emit(&self, method: &str, params: Value) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|tx| {
                tx.try_send(CdpEvent {
                    method: method.to_string(),
                    params: params.clone(),
                    session_id: None,
                })
                .is_ok()
            });
        }
    }

    /// Answer `method` with a fixed result
    pub fn respond(&self, method: &str, result: Value) {
        self.respond_with(method, move |_| Ok(result.clone()));
    }

    /// Answer `method` by computing a result from the params
    pub fn respond_with<F>(&self, method: &str, responder: F)
    where
        F: Fn(&Value) -> Result<Value, Error> + Send + Sync + 'static,
    {
        if let Ok(mut responders) = self.responders.lock() {
            responders.insert(method.to_string(), Arc::new(responder));
        }
    }

    /// Fail every call to `method` with a CDP error
    pub fn fail(&self, method: &str, message: &str) {
        let message = message.to_string();
        self.respond_with(method, move |_| Err(Error::cdp(message.clone())));
    }

    /// Recorded calls, in order
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Methods called, in order
    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|(m, _)| m).collect()
    }

    /// Params of the most recent call to `method`
    pub fn last_params(&self, method: &str) -> Option<Value> {
        self.calls()
            .into_iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, p)| p)
    }

    fn default_result(method: &str) -> Value {
        match method {
            "Page.navigate" => json!({
                "frameId": uuid::Uuid::new_v4().to_string(),
                "loaderId": uuid::Uuid::new_v4().to_string(),
            }),
            "Runtime.evaluate" | "Runtime.callFunctionOn" => json!({
                "result": { "type": "undefined" }
            }),
            "Page.captureScreenshot" => json!({
                "data": "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg=="
            }),
            "Page.addScriptToEvaluateOnNewDocument" => json!({ "identifier": "1" }),
            _ => json!({}),
        }
    }
}

impl Default for MockCdpConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CdpConnection for MockCdpConnection {
    async fn send_command(&self, method: &str, params: Value) -> Result<CdpResponse, Error> {
        if !self.is_active.load(Ordering::Relaxed) {
            return Err(Error::websocket("Connection is not active"));
        }

        if let Ok(mut calls) = self.calls.lock() {
            calls.push((method.to_string(), params.clone()));
        }

        let responder = self
            .responders
            .lock()
            .ok()
            .and_then(|r| r.get(method).cloned());

        let result = match responder {
            Some(responder) => responder(&params)?,
            None => Self::default_result(method),
        };

        Ok(CdpResponse {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            result: Some(result),
            error: None,
        })
    }

    async fn listen_events(&self) -> Result<tokio::sync::mpsc::Receiver<CdpEvent>, Error> {
        let (tx, rx) = tokio::sync::mpsc::channel(100);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(tx);
        }
        Ok(rx)
    }

    async fn close(&self) -> Result<(), Error> {
        self.is_active.store(false, Ordering::Relaxed);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.clear();
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Relaxed)
    }
}

/// Per-client view of the shared mock connection with its own lifetime
#[derive(Debug)]
struct MockConnectionHandle {
    shared: Arc<MockCdpConnection>,
    is_active: AtomicBool,
}

#[async_trait]
impl CdpConnection for MockConnectionHandle {
    async fn send_command(&self, method: &str, params: Value) -> Result<CdpResponse, Error> {
        if !self.is_active.load(Ordering::Relaxed) {
            return Err(Error::websocket("Connection is not active"));
        }
        self.shared.send_command(method, params).await
    }

    async fn listen_events(&self) -> Result<tokio::sync::mpsc::Receiver<CdpEvent>, Error> {
        self.shared.listen_events().await
    }

    async fn close(&self) -> Result<(), Error> {
        self.is_active.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Relaxed) && self.shared.is_active()
    }
}

/// Mock CDP browser
#[derive(Debug, Default)]
pub struct MockCdpBrowser {
    connection: Arc<MockCdpConnection>,
    created: Mutex<Vec<String>>,
    closed: Mutex<Vec<String>>,
    unreachable: AtomicBool,
}

impl MockCdpBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every client handed out shares this connection
    pub fn with_connection(connection: Arc<MockCdpConnection>) -> Self {
        Self {
            connection,
            ..Self::default()
        }
    }

    /// Behave like an endpoint nobody is listening on
    pub fn unreachable() -> Self {
        let browser = Self::default();
        browser.unreachable.store(true, Ordering::Relaxed);
        browser
    }

    pub fn connection(&self) -> Arc<MockCdpConnection> {
        Arc::clone(&self.connection)
    }

    pub fn created_targets(&self) -> Vec<String> {
        self.created.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn closed_targets(&self) -> Vec<String> {
        self.closed.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CdpBrowser for MockCdpBrowser {
    async fn get_version(&self) -> Result<BrowserVersion, Error> {
        if self.unreachable.load(Ordering::Relaxed) {
            return Err(Error::navigation_failed("mock endpoint unreachable"));
        }
        Ok(BrowserVersion {
            protocol_version: "1.3".to_string(),
            product: "HeadlessChrome/131.0.0.0".to_string(),
            user_agent: "Mozilla/5.0 HeadlessChrome/131.0.0.0".to_string(),
            js_version: "13.1".to_string(),
        })
    }

    async fn create_target(&self, _url: &str) -> Result<TargetInfo, Error> {
        if self.unreachable.load(Ordering::Relaxed) {
            return Err(Error::navigation_failed("mock endpoint unreachable"));
        }
        let target_id = uuid::Uuid::new_v4().to_string();
        if let Ok(mut created) = self.created.lock() {
            created.push(target_id.clone());
        }
        Ok(TargetInfo {
            ws_url: format!("ws://mock/devtools/page/{}", target_id),
            target_id,
        })
    }

    async fn close_target(&self, target_id: &str) -> Result<(), Error> {
        if let Ok(mut closed) = self.closed.lock() {
            closed.push(target_id.to_string());
        }
        Ok(())
    }

    async fn create_client(&self, _ws_url: &str) -> Result<Arc<dyn CdpClient>, Error> {
        let handle = MockConnectionHandle {
            shared: Arc::clone(&self.connection),
            is_active: AtomicBool::new(true),
        };
        Ok(Arc::new(CdpClientImpl::new(Arc::new(handle))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_calls_and_uses_responders() {
        let connection = MockCdpConnection::new();
        connection.respond("DOM.getDocument", json!({ "root": { "nodeId": 1 } }));

        let response = connection.send_command("DOM.getDocument", json!({})).await.unwrap();
        assert_eq!(response.result.unwrap()["root"]["nodeId"], 1);

        connection.fail("DOM.querySelectorAll", "bad selector");
        assert!(connection.send_command("DOM.querySelectorAll", json!({})).await.is_err());

        assert_eq!(connection.methods(), vec!["DOM.getDocument", "DOM.querySelectorAll"]);
    }

    #[tokio::test]
    async fn test_closed_mock_rejects_commands() {
        let connection = MockCdpConnection::new();
        connection.close().await.unwrap();
        assert!(!connection.is_active());
        assert!(connection.send_command("Page.enable", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_browser_tracks_targets() {
        let browser = MockCdpBrowser::new();
        let target = browser.create_target("about:blank").await.unwrap();
        browser.close_target(&target.target_id).await.unwrap();

        assert_eq!(browser.created_targets(), vec![target.target_id.clone()]);
        assert_eq!(browser.closed_targets(), vec![target.target_id]);
    }
}
