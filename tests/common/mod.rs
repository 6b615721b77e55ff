//! Common test utilities
//!
//! Pipelines wired to mock sessions, a scripted oracle and a static capture,
//! writing into a temporary output directory.

use pagesplit::capture::StaticCapture;
use pagesplit::config::{Config, LazyLoadConfig};
use pagesplit::oracle::{OraclePolicy, OracleVerdict, ScriptedOracle};
use pagesplit::session::{MockNode, MockPage, MockSessionManager};
use pagesplit::Pipeline;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const URL: &str = "https://shop.example.com/landing";

/// Narrow raster keeps generated PNGs small
pub const CAPTURE_WIDTH: u32 = 64;

pub struct Harness {
    pub sessions: Arc<MockSessionManager>,
    pub capture: Arc<StaticCapture>,
    pub pipeline: Pipeline,
    pub output: TempDir,
}

impl Harness {
    pub fn out(&self) -> &Path {
        self.output.path()
    }
}

/// Lazy trigger with no waits
pub fn instant_lazy() -> LazyLoadConfig {
    LazyLoadConfig {
        first_scroll_wait_ms: 0,
        back_scroll_wait_ms: 0,
        back_scroll_px: 100.0,
        network_idle_ms: 10,
        settle_ms: 0,
        final_scroll_wait_ms: 0,
    }
}

pub fn accepting() -> ScriptedOracle {
    ScriptedOracle::always(OracleVerdict::new(true, 0.9, "region is complete"))
}

pub fn rejecting() -> ScriptedOracle {
    ScriptedOracle::always(OracleVerdict::new(false, 0.9, "region is cut off"))
}

/// Build a pipeline serving `pages`, judging with `oracle` and capturing with `capture`
pub fn harness(pages: Vec<MockPage>, oracle: ScriptedOracle, policy: OraclePolicy, capture: StaticCapture) -> Harness {
    harness_with(pages, oracle, policy, capture, |_| {})
}

/// Like [`harness`], with a hook to adjust the configuration
pub fn harness_with(
    pages: Vec<MockPage>,
    oracle: ScriptedOracle,
    policy: OraclePolicy,
    capture: StaticCapture,
    configure: impl FnOnce(&mut Config),
) -> Harness {
    let output = tempfile::tempdir().expect("tempdir");

    let mut config = Config::default();
    config.lazy = instant_lazy();
    config.output.dir = output.path().join("runs");
    config.output.batch_concurrency = 2;
    configure(&mut config);

    let sessions = Arc::new(pages.into_iter().fold(MockSessionManager::new(), MockSessionManager::with_page));
    let capture = Arc::new(capture);
    let oracle = pagesplit::oracle::OracleAdapter::new(Arc::new(oracle), policy, Duration::from_secs(1), 0.6);

    let pipeline = Pipeline::new(config, sessions.clone(), oracle, capture.clone());

    Harness {
        sessions,
        capture,
        pipeline,
        output,
    }
}

/// A 4000px page with a 96px `nav`, a 300px `footer` and marked-up body
pub fn storefront(url: &str) -> MockPage {
    MockPage::new(url, 4000.0)
        .with("nav", MockNode::at(0.0, 96.0).html("<nav>menu</nav>"))
        .with("footer", MockNode::from_bottom(300.0, 300.0).html("<footer>links</footer>"))
        .with(
            "body",
            MockNode::at(0.0, 4000.0).inner("<nav>menu</nav><main>catalogue</main><footer>links</footer>"),
        )
}

/// Generated capture of the given height
pub fn capture_of(height: u32) -> StaticCapture {
    StaticCapture::generated(CAPTURE_WIDTH, height).expect("render capture")
}

/// Sorted file names in `dir`
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read run dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Run directories created under the output root
pub fn run_dirs(harness: &Harness) -> Vec<std::path::PathBuf> {
    let root = harness.out().join("runs");
    let mut dirs: Vec<_> = std::fs::read_dir(root)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    dirs.sort();
    dirs
}

pub fn read_manifest(dir: &Path) -> serde_json::Value {
    let bytes = std::fs::read(dir.join("segmentation.json")).expect("manifest");
    serde_json::from_slice(&bytes).expect("manifest json")
}

/// Height of a PNG on disk
pub fn png_height(path: &Path) -> u32 {
    image::open(path).expect("png").height()
}

/// Colour of the first pixel of a PNG on disk
pub fn first_pixel(path: &Path) -> [u8; 4] {
    image::open(path).expect("png").to_rgba8().get_pixel(0, 0).0
}

