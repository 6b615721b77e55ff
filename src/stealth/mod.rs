//! # 隐身配置
//!
//! 在导航之前为新标签页应用反自动化检测设置，避免站点对无头浏览器返回不同的布局。
//!
//! ## 主要功能
//! - **User-Agent**: 使用配置值，或从桌面 UA 池中随机选择
//! - **请求头**: 附加 `Accept-Language` 与 `Accept`
//! - **初始化脚本**: 隐藏 `navigator.webdriver`，伪装 plugins 与 languages
//!
//! ## 模块结构
//! - `injector`: 覆盖设置的注入
//! - `user_agents`: 桌面 UA 池

pub mod injector;
pub mod user_agents;

pub use injector::StealthInjector;
pub use user_agents::{random_desktop_user_agent, DESKTOP_USER_AGENTS};
