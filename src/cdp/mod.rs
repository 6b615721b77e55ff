//! # Chrome DevTools Protocol (CDP) 层
//!
//! 通过 WebSocket 与正在运行的 Chrome/Chromium 通信，为页面测量与整页截图提供底层能力。
//!
//! ## 主要功能
//! - **WebSocket 连接管理**: 建立连接，按命令 ID 将响应路由给等待者
//! - **协议通信**: 按命令类别设置超时（截图、导航、脚本）
//! - **事件订阅**: 广播浏览器事件
//! - **标签页管理**: 通过 DevTools HTTP 接口创建和关闭标签页
//!
//! ## 模块结构
//! - `traits`: CDP 操作的核心 trait 定义
//! - `types`: CDP 协议相关的数据类型
//! - `connection`: WebSocket 连接实现
//! - `client`: CDP 客户端实现
//! - `browser`: 浏览器级别的操作
//! - `mock`: 用于测试的 Mock 实现
//!
//! ## 使用示例
//! ```rust,no_run
//! use pagesplit::cdp::{CdpBrowser, CdpBrowserImpl};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let browser = CdpBrowserImpl::new("ws://localhost:9222");
//! let target = browser.create_target("about:blank").await?;
//! let client = browser.create_client(&target.ws_url).await?;
//!
//! let result = client.navigate("https://example.com").await?;
//! println!("Navigated to: {}", result.url);
//! browser.close_target(&target.target_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod traits;
pub mod types;
pub mod connection;
pub mod client;
pub mod browser;
pub mod mock;

pub use traits::{
    CdpConnection, CdpClient, CdpBrowser, CdpEvent, CdpResponse, CdpError,
    NavigationResult, EvaluationResult, ScreenshotFormat,
    BrowserVersion, TargetInfo,
};
pub use types::Clip;

// Re-export implementation structs
pub use connection::CdpWebSocketConnection;
pub use client::CdpClientImpl;
pub use browser::CdpBrowserImpl;

// Re-export mock for development/testing
pub use mock::{MockCdpConnection, MockCdpBrowser};
