//! # 视觉完整性判定
//!
//! 将候选区域的截图连同页面上下文交给视觉模型，判断该区域是否完整。
//!
//! ## 主要功能
//! - **判定结果**: `OracleVerdict { is_complete, confidence, rationale }`，置信度限制在 [0, 1]
//! - **可用性策略**: 后端不可达、超时或返回无法解析时，按 `fail_open` 配置返回接受或拒绝
//! - **后端**: OpenAI 兼容的 chat-completions 接口，宽松解析回复中的 JSON
//!
//! ## 模块结构
//! - `traits`: `VisualOracle` trait 与判定类型
//! - `adapter`: 超时、策略与阈值
//! - `openai`: HTTP 后端
//! - `mock`: 用于测试的脚本化后端

pub mod traits;
pub mod adapter;
pub mod openai;
pub mod mock;

pub use traits::{OracleContext, OracleVerdict, VisualOracle};
pub use adapter::{DisabledOracle, OracleAdapter, OraclePolicy};
pub use openai::OpenAiOracle;
pub use mock::ScriptedOracle;
