//! End-to-end pipeline runs against mock sessions, oracle and capture

mod common;

use common::*;
use pagesplit::detect::Region;
use pagesplit::oracle::{OraclePolicy, OracleVerdict, ScriptedOracle};
use pagesplit::session::{mock::row_color, MockNode, MockPage, PageContext, SessionManager};
use pagesplit::{Error, Overrides, PipelineStage};
use std::time::Duration;

#[tokio::test]
async fn test_standard_detection_segments_page() {
    let h = harness(vec![storefront(URL)], accepting(), OraclePolicy::FailClosed, capture_of(4000));

    let report = h.pipeline.detect_and_segment(URL, Overrides::default()).await.unwrap();

    assert_eq!(report.boundaries.header_height(), 96);
    assert_eq!(report.boundaries.footer_height(), 300);
    assert_eq!(report.boundaries.body_height(), 3604);
    assert_eq!(report.header.label(), "standard");
    assert_eq!(report.footer.label(), "standard");

    let dir = &report.output_dir;
    assert_eq!(
        files_in(dir),
        [
            "body.html",
            "body.png",
            "footer.html",
            "footer.png",
            "full_page.png",
            "header.html",
            "header.png",
            "page.html",
            "segmentation.json"
        ]
    );

    let heights: Vec<u32> = ["header.png", "body.png", "footer.png"]
        .iter()
        .map(|name| png_height(&dir.join(name)))
        .collect();
    assert_eq!(heights, [96, 3604, 300]);
    assert_eq!(heights.iter().sum::<u32>(), png_height(&dir.join("full_page.png")));

    // Crops start exactly at their boundary rows
    assert_eq!(first_pixel(&dir.join("header.png")), row_color(0));
    assert_eq!(first_pixel(&dir.join("body.png")), row_color(96));
    assert_eq!(first_pixel(&dir.join("footer.png")), row_color(3700));

    assert_eq!(std::fs::read_to_string(dir.join("header.html")).unwrap(), "<nav>menu</nav>");
    assert_eq!(std::fs::read_to_string(dir.join("body.html")).unwrap(), "<main>catalogue</main>");
    assert_eq!(std::fs::read_to_string(dir.join("footer.html")).unwrap(), "<footer>links</footer>");

    let manifest = read_manifest(dir);
    assert_eq!(manifest["status"], "complete");
    assert_eq!(manifest["boundaries"]["header_height"], 96);
    assert_eq!(manifest["header"]["source"], "detected");
    assert_eq!(manifest["header"]["stage"], "standard");
    assert_eq!(manifest["footer"]["region"], "footer");
    assert_eq!(manifest["files"].as_array().unwrap().len(), 9);

    assert_eq!(h.sessions.open_count(), 1);
    assert_eq!(h.sessions.session_count(), 0);
}

#[tokio::test]
async fn test_multi_element_header_after_standard_rejection() {
    let page = MockPage::new(URL, 4000.0)
        .with("nav", MockNode::at(40.0, 60.0))
        .with(".promo-bar", MockNode::at(0.0, 40.0))
        .with(".logo", MockNode::at(50.0, 90.0))
        .with("footer", MockNode::from_bottom(300.0, 300.0));
    let oracle = rejecting()
        .on(Region::Header, 140.0, OracleVerdict::new(true, 0.8, "span complete"))
        .on_region(Region::Footer, OracleVerdict::new(true, 0.9, "footer complete"));
    let h = harness(vec![page], oracle, OraclePolicy::FailClosed, capture_of(4000));

    let report = h.pipeline.detect_and_segment(URL, Overrides::default()).await.unwrap();

    assert_eq!(report.boundaries.header_height(), 140);
    assert_eq!(report.header.label(), "multi-element");
    assert_eq!(report.boundaries.footer_height(), 300);

    let manifest = read_manifest(&report.output_dir);
    let attempts = manifest["header"]["attempts"].as_array().unwrap();
    assert_eq!(attempts[0]["stage"], "standard");
    assert_eq!(attempts[0]["verdict"]["is_complete"], false);
    assert_eq!(attempts[1]["stage"], "multi-element");
}

#[tokio::test]
async fn test_rejected_candidates_fall_back_to_percentage() {
    let h = harness(vec![storefront(URL)], rejecting(), OraclePolicy::FailClosed, capture_of(4000));

    let report = h.pipeline.detect_and_segment(URL, Overrides::default()).await.unwrap();

    assert_eq!(report.header.label(), "percentage-fallback");
    assert_eq!(report.boundaries.header_height(), 800);
    assert_eq!(report.boundaries.footer_height(), 800);
    assert_eq!(report.boundaries.body_height(), 2400);
}

#[tokio::test]
async fn test_unavailable_oracle_fail_open_accepts_first_candidate() {
    let h = harness(
        vec![storefront(URL)],
        ScriptedOracle::unavailable(),
        OraclePolicy::FailOpen,
        capture_of(4000),
    );

    let report = h.pipeline.detect_and_segment(URL, Overrides::default()).await.unwrap();

    assert_eq!(report.boundaries.header_height(), 96);
    assert_eq!(report.boundaries.footer_height(), 300);
}

#[tokio::test]
async fn test_unavailable_oracle_fail_closed_falls_back() {
    let h = harness(
        vec![storefront(URL)],
        ScriptedOracle::unavailable(),
        OraclePolicy::FailClosed,
        capture_of(4000),
    );

    let report = h.pipeline.detect_and_segment(URL, Overrides::default()).await.unwrap();

    assert_eq!(report.header.label(), "percentage-fallback");
    assert_eq!(report.footer.label(), "percentage-fallback");
}

#[tokio::test]
async fn test_boundaries_follow_captured_raster() {
    // Page measured at 4000px, captured after more content rendered
    let h = harness(vec![storefront(URL)], accepting(), OraclePolicy::FailClosed, capture_of(4500));

    let report = h.pipeline.detect_and_segment(URL, Overrides::default()).await.unwrap();

    assert_eq!(report.boundaries.page_height(), 4500);
    assert_eq!(report.boundaries.footer_top(), 4200);
    assert_eq!(first_pixel(&report.output_dir.join("footer.png")), row_color(4200));
}

#[tokio::test]
async fn test_overlap_writes_only_incomplete_manifest() {
    let h = harness(vec![], accepting(), OraclePolicy::FailClosed, capture_of(1000));

    let failure = h
        .pipeline
        .detect_and_segment(URL, Overrides::new(Some(900), Some(200)))
        .await
        .unwrap_err();

    assert!(matches!(failure.source, Error::Overlap { .. }));
    assert_eq!(failure.stage, PipelineStage::Segmentation);
    assert_eq!(failure.exit_code(), 4);
    assert_eq!(failure.measurements.page_height, Some(1000));
    assert_eq!(failure.measurements.header_height, Some(900));
    assert_eq!(failure.measurements.footer_height, Some(200));

    let dirs = run_dirs(&h);
    assert_eq!(dirs.len(), 1);
    assert_eq!(files_in(&dirs[0]), ["segmentation.json"]);

    let manifest = read_manifest(&dirs[0]);
    assert_eq!(manifest["status"], "incomplete");
    assert_eq!(manifest["error"]["stage"], "segmentation");
    assert!(manifest["error"]["message"].as_str().unwrap().contains("900"));
}

#[tokio::test]
async fn test_both_overrides_skip_the_browser() {
    let h = harness(vec![storefront(URL)], accepting(), OraclePolicy::FailClosed, capture_of(2000));

    let report = h
        .pipeline
        .detect_and_segment(URL, Overrides::new(Some(120), Some(180)))
        .await
        .unwrap();

    assert_eq!(h.sessions.open_count(), 0);
    assert_eq!(h.capture.calls(), 1);
    assert_eq!(report.boundaries.body_height(), 1700);
    assert_eq!(report.header.label(), "override");

    // No markup without a session
    let files = files_in(&report.output_dir);
    assert!(!files.contains(&"header.html".to_string()));
    assert!(files.contains(&"page.html".to_string()));
}

#[tokio::test]
async fn test_single_override_detects_the_other_region() {
    let h = harness(vec![storefront(URL)], accepting(), OraclePolicy::FailClosed, capture_of(4000));

    let report = h
        .pipeline
        .detect_and_segment(URL, Overrides::new(Some(150), None))
        .await
        .unwrap();

    assert_eq!(h.sessions.open_count(), 1);
    assert_eq!(report.boundaries.header_height(), 150);
    assert_eq!(report.boundaries.footer_height(), 300);

    let manifest = read_manifest(&report.output_dir);
    assert_eq!(manifest["header"]["source"], "override");
    assert_eq!(manifest["header"]["height"], 150);
    assert_eq!(manifest["footer"]["source"], "detected");
}

#[tokio::test]
async fn test_markup_extraction_can_be_disabled() {
    let h = harness_with(
        vec![storefront(URL)],
        accepting(),
        OraclePolicy::FailClosed,
        capture_of(4000),
        |config| config.output.extract_markup = false,
    );

    let report = h.pipeline.detect_and_segment(URL, Overrides::default()).await.unwrap();

    let html: Vec<String> = files_in(&report.output_dir)
        .into_iter()
        .filter(|name| name.ends_with(".html"))
        .collect();
    assert_eq!(html, ["page.html"]);
}

#[tokio::test]
async fn test_capture_failure_reports_stage_and_measurements() {
    let h = harness(
        vec![storefront(URL)],
        accepting(),
        OraclePolicy::FailClosed,
        pagesplit::capture::StaticCapture::failing("render service unavailable"),
    );

    let failure = h.pipeline.detect_and_segment(URL, Overrides::default()).await.unwrap_err();

    assert_eq!(failure.stage, PipelineStage::Capture);
    assert_eq!(failure.exit_code(), 5);
    assert_eq!(failure.measurements.header_height, Some(96));
    assert_eq!(failure.measurements.footer_height, Some(300));
    assert_eq!(failure.measurements.page_height, Some(4000));

    let dirs = run_dirs(&h);
    assert_eq!(files_in(&dirs[0]), ["segmentation.json"]);
    assert_eq!(read_manifest(&dirs[0])["error"]["stage"], "capture");
}

#[tokio::test]
async fn test_repeated_runs_are_identical() {
    let h = harness(vec![storefront(URL)], accepting(), OraclePolicy::FailClosed, capture_of(4000));

    let first = h.pipeline.detect_and_segment(URL, Overrides::default()).await.unwrap();
    let second = h.pipeline.detect_and_segment(URL, Overrides::default()).await.unwrap();

    assert_eq!(first.boundaries, second.boundaries);
    assert_ne!(first.output_dir, second.output_dir);
    assert_eq!(
        std::fs::read(first.output_dir.join("body.png")).unwrap(),
        std::fs::read(second.output_dir.join("body.png")).unwrap()
    );
}

#[tokio::test]
async fn test_batch_keeps_order_and_isolates_failures() {
    let urls = vec![
        "https://a.example.com/".to_string(),
        "https://missing.example.com/".to_string(),
        "https://b.example.com/".to_string(),
    ];
    let h = harness(
        vec![storefront(&urls[0]), storefront(&urls[2])],
        accepting(),
        OraclePolicy::FailClosed,
        capture_of(4000),
    );

    let results = h.pipeline.run_batch(&urls, Overrides::default()).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().url, urls[0]);
    assert_eq!(results[2].as_ref().unwrap().url, urls[2]);

    let failure = results[1].as_ref().unwrap_err();
    assert_eq!(failure.url, urls[1]);
    assert_eq!(failure.stage, PipelineStage::Open);
    assert_eq!(failure.exit_code(), 3);

    // Failed runs still leave a directory with their manifest
    assert_eq!(run_dirs(&h).len(), 3);
}

#[tokio::test]
async fn test_cancelled_run_is_marked_incomplete() {
    let h = harness(
        vec![storefront(URL)],
        accepting(),
        OraclePolicy::FailClosed,
        capture_of(4000).slow(Duration::from_secs(3600)),
    );

    let run = h.pipeline.detect_and_segment(URL, Overrides::default());
    assert!(tokio::time::timeout(Duration::from_secs(2), run).await.is_err());
    assert_eq!(h.capture.calls(), 1);

    let dirs = run_dirs(&h);
    assert_eq!(dirs.len(), 1);
    assert_eq!(files_in(&dirs[0]), ["segmentation.json"]);

    // Measurements taken before the capture hung are kept
    let manifest = read_manifest(&dirs[0]);
    assert_eq!(manifest["status"], "incomplete");
    assert_eq!(manifest["stage"], "capture");
    assert_eq!(manifest["header"]["height"], 96);
    assert_eq!(manifest["footer"]["height"], 300);
    assert!(manifest.get("error").is_none());
    assert_eq!(h.sessions.session_count(), 0);
}

#[tokio::test]
async fn test_interrupted_detection_leaves_session_for_close_all() {
    let oracle = accepting().with_delay(Duration::from_millis(500));
    let h = harness(vec![storefront(URL)], oracle, OraclePolicy::FailClosed, capture_of(4000));

    let run = h.pipeline.detect_and_segment(URL, Overrides::default());
    assert!(tokio::time::timeout(Duration::from_millis(100), run).await.is_err());

    let manifest = read_manifest(&run_dirs(&h)[0]);
    assert_eq!(manifest["status"], "incomplete");
    assert_eq!(manifest["stage"], "open");

    h.sessions.close_all().await.unwrap();
    assert_eq!(h.sessions.session_count(), 0);
    assert!(h.sessions.opened_pages().iter().all(|page| !page.is_active()));
    assert_eq!(h.capture.calls(), 0);
}
