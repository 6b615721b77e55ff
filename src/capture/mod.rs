//! # 整页截图
//!
//! 获取目标页面的整页位图（以及可选的 HTML），供分割使用。
//!
//! ## 主要功能
//! - **渲染 API**: 调用托管的渲染服务，点击弹窗关闭选择器后截取整页
//! - **浏览器**: 在独立会话中打开页面，稳定后关闭弹窗并以 `captureBeyondViewport` 截取整页
//! - **错误**: 任何失败都报告为 `Error::CaptureFailed`，只影响当前 URL
//!
//! ## 模块结构
//! - `traits`: `FullPageCapture` trait 与截图选项
//! - `render_api`: 渲染 API 实现
//! - `browser`: 浏览器实现
//! - `mock`: 用于测试的静态实现

pub mod traits;
pub mod render_api;
pub mod browser;
pub mod mock;

use std::sync::Arc;

pub use traits::{CaptureOptions, CapturedPage, FullPageCapture};
pub use render_api::RenderApiCapture;
pub use browser::BrowserCapture;
pub use mock::StaticCapture;

use crate::config::{CaptureBackend, CaptureConfig};
use crate::session::SessionManager;
use crate::Result;

/// Backend selected by the configuration
pub fn from_config(config: &CaptureConfig, sessions: Arc<dyn SessionManager>) -> Result<Arc<dyn FullPageCapture>> {
    Ok(match config.backend {
        CaptureBackend::RenderApi => Arc::new(RenderApiCapture::from_config(config)?),
        CaptureBackend::Browser => Arc::new(BrowserCapture::new(sessions)),
    })
}
