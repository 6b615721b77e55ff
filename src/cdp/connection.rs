//! CDP WebSocket connection implementation
//!
//! This module provides WebSocket-based connection to Chrome DevTools Protocol.
//! The socket is split: writers share the sink behind a mutex while a single
//! reader task owns the stream and routes frames to waiters and subscribers.

use super::traits::{CdpConnection, CdpError as CdpErrorResponse, CdpEvent, CdpResponse};
use super::types::*;
use crate::Error;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<u64, PendingCommand>>>;
type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<CdpEvent>>>>;

/// CDP timeout configuration
#[derive(Debug, Clone)]
pub(crate) struct CdpTimeoutConfig {
    /// Default timeout for most commands (seconds)
    default_timeout_secs: u64,
    /// Timeout for screenshot commands (seconds)
    screenshot_timeout_secs: u64,
    /// Timeout for page navigation commands (seconds)
    navigation_timeout_secs: u64,
    /// Timeout for JavaScript execution (seconds)
    execution_timeout_secs: u64,
}

impl Default for CdpTimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            screenshot_timeout_secs: 90,
            navigation_timeout_secs: 60,
            execution_timeout_secs: 30,
        }
    }
}

impl CdpTimeoutConfig {
    /// Get timeout duration for a specific command method
    pub(crate) fn timeout_for(&self, method: &str) -> tokio::time::Duration {
        let method_lower = method.to_lowercase();

        let secs = if method_lower.contains("screenshot") || method_lower.contains("capture") {
            self.screenshot_timeout_secs
        } else if method_lower.contains("navigate") || method_lower.contains("reload") {
            self.navigation_timeout_secs
        } else if method_lower.starts_with("runtime.evaluate") || method_lower.starts_with("runtime.call") {
            self.execution_timeout_secs
        } else {
            self.default_timeout_secs
        };

        tokio::time::Duration::from_secs(secs)
    }
}

/// Pending command response
#[derive(Debug)]
struct PendingCommand {
    sender: oneshot::Sender<CdpResponse>,
    /// Command method (for logging)
    method: String,
}

/// CDP WebSocket connection implementation
pub struct CdpWebSocketConnection {
    url: String,
    sink: Mutex<SplitSink<WsStream, Message>>,
    next_id: AtomicU64,
    pending_commands: PendingMap,
    event_subscribers: Subscribers,
    is_active: Arc<AtomicBool>,
    timeout_config: CdpTimeoutConfig,
}

impl std::fmt::Debug for CdpWebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpWebSocketConnection")
            .field("url", &self.url)
            .field("is_active", &self.is_active.load(Ordering::SeqCst))
            .finish()
    }
}

impl CdpWebSocketConnection {
    /// Create a new CDP WebSocket connection
    ///
    /// # Arguments
    /// * `url` - WebSocket URL (e.g., "ws://localhost:9222/devtools/page/ABC123")
    pub async fn new<S: Into<String>>(url: S) -> Result<Arc<Self>, Error> {
        let url = url.into();
        info!("Connecting to CDP target {}", url);

        // Full-page screenshots arrive as a single large base64 frame
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = None;
        ws_config.max_frame_size = None;

        let (ws_stream, _) = connect_async_with_config(url.as_str(), Some(ws_config), false)
            .await
            .map_err(|e| Error::websocket(format!("Failed to connect to {}: {}", url, e)))?;

        let (sink, stream) = ws_stream.split();

        let connection = Arc::new(Self {
            url,
            sink: Mutex::new(sink),
            next_id: AtomicU64::new(1),
            pending_commands: Arc::new(Mutex::new(HashMap::new())),
            event_subscribers: Arc::new(Mutex::new(Vec::new())),
            is_active: Arc::new(AtomicBool::new(true)),
            timeout_config: CdpTimeoutConfig::default(),
        });

        tokio::spawn(Self::read_loop(
            stream,
            Arc::clone(&connection.pending_commands),
            Arc::clone(&connection.event_subscribers),
            Arc::clone(&connection.is_active),
        ));

        info!("WebSocket connection established");
        Ok(connection)
    }

    /// Reader task: owns the stream until the socket closes
    async fn read_loop(
        mut stream: SplitStream<WsStream>,
        pending_commands: PendingMap,
        event_subscribers: Subscribers,
        is_active: Arc<AtomicBool>,
    ) {
        debug!("CDP read loop started");

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    Self::route_message(&text, &pending_commands, &event_subscribers).await;
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket close frame received");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket read error, deactivating connection: {}", e);
                    break;
                }
            }
        }

        is_active.store(false, Ordering::SeqCst);

        // Dropping the senders wakes every waiter with a closed-channel error
        let abandoned = {
            let mut pending = pending_commands.lock().await;
            let count = pending.len();
            pending.clear();
            count
        };
        if abandoned > 0 {
            warn!("CDP connection closed with {} commands in flight", abandoned);
        }
        event_subscribers.lock().await.clear();

        debug!("CDP read loop exited");
    }

    /// Route one text frame to its waiter or to the event subscribers
    async fn route_message(text: &str, pending_commands: &PendingMap, event_subscribers: &Subscribers) {
        match CdpMessage::parse(text) {
            Some(CdpMessage::Response(response)) => {
                let waiter = pending_commands.lock().await.remove(&response.id);
                match waiter {
                    Some(pending) => {
                        debug!("Response for command {} ({})", response.id, pending.method);
                        let cdp_response = CdpResponse {
                            id: response.id,
                            result: Some(response.result),
                            error: response.error.map(|e| CdpErrorResponse {
                                code: e.code,
                                message: e.message,
                                data: e.data,
                            }),
                        };
                        let _ = pending.sender.send(cdp_response);
                    }
                    None => warn!("Received response for unknown command ID: {}", response.id),
                }
            }
            Some(CdpMessage::Notification(notification)) => {
                debug!("Received event: {}", notification.method);
                let event = CdpEvent {
                    method: notification.method,
                    params: notification.params,
                    session_id: notification.session_id,
                };
                event_subscribers
                    .lock()
                    .await
                    .retain(|sender| sender.send(event.clone()).is_ok());
            }
            None => {
                let preview: String = text.chars().take(200).collect();
                warn!("Unknown message format: {}", preview);
            }
        }
    }
}

#[async_trait]
impl CdpConnection for CdpWebSocketConnection {
    async fn send_command(&self, method: &str, params: serde_json::Value) -> Result<CdpResponse, Error> {
        if !self.is_active.load(Ordering::SeqCst) {
            return Err(Error::websocket("Connection is not active"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params: if params.is_null() { None } else { Some(params) },
        };
        let json = serde_json::to_string(&request)?;

        debug!("Sending CDP command {}: {}", id, method);

        let (sender, receiver) = oneshot::channel();
        self.pending_commands.lock().await.insert(
            id,
            PendingCommand {
                sender,
                method: method.to_string(),
            },
        );

        let sent = self.sink.lock().await.send(Message::Text(json)).await;
        if let Err(e) = sent {
            self.pending_commands.lock().await.remove(&id);
            return Err(Error::websocket(format!("Failed to send {}: {}", method, e)));
        }

        let timeout_duration = self.timeout_config.timeout_for(method);

        match tokio::time::timeout(timeout_duration, receiver).await {
            Ok(Ok(response)) => {
                if let Some(error) = &response.error {
                    return Err(Error::cdp(format!(
                        "{} failed: {} (code: {}){}",
                        method,
                        error.message,
                        error.code,
                        error.data.as_ref().map_or(String::new(), |d| format!(" {}", d))
                    )));
                }
                Ok(response)
            }
            Ok(Err(_)) => Err(Error::websocket(format!(
                "Connection closed before {} (command {}) completed",
                method, id
            ))),
            Err(_) => {
                self.pending_commands.lock().await.remove(&id);
                Err(Error::timeout(format!(
                    "Command {} ({}) timed out after {:?}",
                    id, method, timeout_duration
                )))
            }
        }
    }

    async fn listen_events(&self) -> Result<mpsc::Receiver<CdpEvent>, Error> {
        if !self.is_active.load(Ordering::SeqCst) {
            return Err(Error::websocket("Connection is not active"));
        }

        let (sender, receiver) = mpsc::channel(100);
        let (unbounded_sender, mut unbounded_receiver) = mpsc::unbounded_channel();

        self.event_subscribers.lock().await.push(unbounded_sender);

        // Forward events to bounded channel
        tokio::spawn(async move {
            while let Some(event) = unbounded_receiver.recv().await {
                if sender.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(receiver)
    }

    async fn close(&self) -> Result<(), Error> {
        if !self.is_active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Closing CDP WebSocket connection to {}", self.url);

        self.sink.lock().await.close().await.map_err(|e| {
            error!("Failed to close WebSocket: {}", e);
            Error::websocket(format!("Failed to close WebSocket: {}", e))
        })
    }

    fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classes() {
        let config = CdpTimeoutConfig::default();
        assert_eq!(config.timeout_for("Page.captureScreenshot").as_secs(), 90);
        assert_eq!(config.timeout_for("Page.navigate").as_secs(), 60);
        assert_eq!(config.timeout_for("Runtime.evaluate").as_secs(), 30);
        assert_eq!(config.timeout_for("Runtime.callFunctionOn").as_secs(), 30);
        assert_eq!(config.timeout_for("DOM.enable").as_secs(), 30);
    }

    #[tokio::test]
    async fn test_response_routed_by_id() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));

        let (sender, receiver) = oneshot::channel();
        pending.lock().await.insert(
            3,
            PendingCommand {
                sender,
                method: "Runtime.evaluate".to_string(),
            },
        );

        // Unknown ids are dropped without disturbing the real waiter
        CdpWebSocketConnection::route_message(r#"{"id":99,"result":{}}"#, &pending, &subscribers).await;
        assert_eq!(pending.lock().await.len(), 1);

        CdpWebSocketConnection::route_message(
            r#"{"id":3,"result":{"result":{"type":"number","value":4}}}"#,
            &pending,
            &subscribers,
        )
        .await;

        let response = receiver.await.unwrap();
        assert_eq!(response.id, 3);
        assert!(response.error.is_none());
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_events_broadcast_and_dead_subscribers_pruned() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));

        let (live, mut live_rx) = mpsc::unbounded_channel();
        let (dead, dead_rx) = mpsc::unbounded_channel();
        drop(dead_rx);
        subscribers.lock().await.extend([live, dead]);

        CdpWebSocketConnection::route_message(
            r#"{"method":"Network.loadingFinished","params":{"requestId":"1"}}"#,
            &pending,
            &subscribers,
        )
        .await;

        let event = live_rx.recv().await.unwrap();
        assert_eq!(event.method, "Network.loadingFinished");
        assert_eq!(subscribers.lock().await.len(), 1);
    }
}
