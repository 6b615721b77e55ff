//! # 会话管理层
//!
//! 为每个 URL 打开一个渲染会话，负责加载与稳定化，并在运行结束时保证释放。
//!
//! ## 主要功能
//! - **会话打开**: 创建新标签页，在导航前应用视口与隐身设置
//! - **稳定化**: 四阶段等待（DOM 可交互、网络空闲、readyState、固定延迟），只有第一阶段是致命的
//! - **并发控制**: 信号量限制同时打开的会话数量
//! - **资源释放**: `PageSession` 关闭幂等，未关闭即被丢弃时在后台关闭标签页
//!
//! ## 核心概念
//! - **PageSession**: 一次流水线运行独占的页面句柄
//! - **PageContext**: 页面上下文，提供查询、滚动、截图等页面级操作
//! - **ElementRef**: 元素引用，提供可见性与边界框
//!
//! ## 模块结构
//! - `traits`: 核心 trait 定义
//! - `manager`: 会话管理器与 `PageSession`
//! - `page`: 基于 CDP 的页面上下文实现
//! - `element`: 基于 CDP 的元素引用实现
//! - `mock`: 可编排的 Mock 页面与会话管理器
//!
//! ## 使用示例
//! ```rust,no_run
//! use pagesplit::session::{SessionManager, SessionManagerImpl};
//! use pagesplit::config::Config;
//!
//! # async fn example() -> pagesplit::Result<()> {
//! let manager = SessionManagerImpl::from_config(&Config::default());
//! let session = manager.open("https://example.com").await?;
//! manager.stabilize(&session).await?;
//! println!("Document height: {}", session.page().scroll_height().await?);
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod traits;
pub mod manager;
pub mod page;
pub mod element;
pub mod mock;

pub use traits::{
    BoundingBox, ElementRef, LoadState, PageContext, ScreenshotOptions, SessionManager, Viewport,
};

pub use manager::{stabilize_page, PageSession, SessionLoadState, SessionManagerImpl, SessionRegistry};
pub use page::PageContextImpl;
pub use element::ElementRefImpl;

pub use mock::{MockElement, MockLoad, MockNode, MockPage, MockPosition, MockSessionManager};
