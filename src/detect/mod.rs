//! # 区域边界检测
//!
//! 在已渲染的页面上测量页眉与页脚的高度。
//!
//! ## 主要功能
//! - **元素定位**: 按优先级遍历选择器，返回第一个可见且面积为正的元素
//! - **懒加载触发**: 滚动到底部、回退再返回、等待网络空闲，使延迟内容渲染
//! - **检测级联**: 标准检测 → 多元素合成 → 百分比回退，前两级的候选需通过视觉判定
//! - **区域标记**: 提取页眉、页脚的 outerHTML 以及去除二者后的 body 标记
//!
//! ## 模块结构
//! - `selectors`: 默认选择器、按角色分组的元素族、`SelectorSet`
//! - `locator`: 元素定位器
//! - `lazy`: 懒加载触发器
//! - `cascade`: 检测级联
//! - `markup`: 区域标记提取

pub mod selectors;
pub mod locator;
pub mod lazy;
pub mod cascade;
pub mod markup;

pub use selectors::{Region, SelectorSet};
pub use locator::{ElementCandidate, ElementLocator};
pub use lazy::LazyContentTrigger;
pub use cascade::{
    percentage_fallback, BoundaryDetector, DetectionAttempt, DetectionOutcome, DetectionStage, StageResult,
};
pub use markup::{extract_markup, RegionMarkup};
