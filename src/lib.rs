//! pagesplit: header/body/footer segmentation of rendered web pages
//!
//! Measures header and footer extents on a page rendered over the Chrome DevTools
//! Protocol, validates candidate boundaries with a visual oracle, and slices a
//! full-page capture into three disjoint regions.

pub mod error;
pub mod config;

pub mod cdp;
pub mod session;
pub mod stealth;
pub mod detect;
pub mod oracle;
pub mod segment;
pub mod capture;
pub mod output;
pub mod pipeline;

// Re-exports
pub use error::{Error, MeasurementState, PipelineStage, Result, RunFailure};
pub use pipeline::{Overrides, Pipeline};
pub use segment::{RegionBoundaries, SegmentationResult};

/// pagesplit library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
