//! Detect-and-segment pipeline
//!
//! open → stabilize → header cascade → lazy trigger + footer cascade → markup →
//! close → capture → boundaries from the captured raster → segment → write.

use chrono::Local;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::capture::{self, CaptureOptions, FullPageCapture};
use crate::config::Config;
use crate::detect::{extract_markup, BoundaryDetector, LazyContentTrigger, RegionMarkup};
use crate::error::{MeasurementState, PipelineStage, RunFailure};
use crate::oracle::OracleAdapter;
use crate::output::{ArtifactWriter, Manifest, OutputLayout, RegionSource, RunReport, MANIFEST_FILE};
use crate::segment::{decode_image, segment, RegionBoundaries};
use crate::session::{PageSession, SessionManager, SessionManagerImpl};
use crate::{Error, Result};

/// Heights supplied by the caller instead of being detected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub header_height: Option<u32>,
    pub footer_height: Option<u32>,
}

impl Overrides {
    pub fn new(header_height: Option<u32>, footer_height: Option<u32>) -> Self {
        Self {
            header_height,
            footer_height,
        }
    }

    /// Nothing left to measure
    pub fn covers_both(&self) -> bool {
        self.header_height.is_some() && self.footer_height.is_some()
    }
}

type StageError = (PipelineStage, Error);

trait AtStage<T> {
    fn at(self, stage: PipelineStage) -> std::result::Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: PipelineStage) -> std::result::Result<T, StageError> {
        self.map_err(|e| (stage, e))
    }
}

/// Progress of one run, kept for failure reports
#[derive(Debug, Default)]
struct RunState {
    header: Option<RegionSource>,
    footer: Option<RegionSource>,
    markup: Option<RegionMarkup>,
    page_height: Option<u32>,
}

impl RunState {
    fn measurements(&self) -> MeasurementState {
        MeasurementState {
            page_height: self.page_height,
            header_height: self.header.as_ref().map(RegionSource::height),
            header_stage: self.header.as_ref().map(RegionSource::label),
            footer_height: self.footer.as_ref().map(RegionSource::height),
            footer_stage: self.footer.as_ref().map(RegionSource::label),
        }
    }
}

/// Region segmentation pipeline
pub struct Pipeline {
    config: Config,
    sessions: Arc<dyn SessionManager>,
    detector: BoundaryDetector,
    lazy: LazyContentTrigger,
    capture: Arc<dyn FullPageCapture>,
    layout: OutputLayout,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("capture", &self.capture.name())
            .field("output", &self.layout.root())
            .finish()
    }
}

impl Pipeline {
    pub fn new(
        config: Config,
        sessions: Arc<dyn SessionManager>,
        oracle: OracleAdapter,
        capture: Arc<dyn FullPageCapture>,
    ) -> Self {
        let lazy = LazyContentTrigger::new(config.lazy.clone());
        let detector = BoundaryDetector::new(config.detection.clone(), oracle, lazy.clone());
        let layout = OutputLayout::new(config.output.dir.clone());
        Self {
            config,
            sessions,
            detector,
            lazy,
            capture,
            layout,
        }
    }

    /// Pipeline against the configured browser, oracle and capture backend
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let sessions: Arc<dyn SessionManager> = Arc::new(SessionManagerImpl::from_config(&config));
        let oracle = OracleAdapter::from_config(&config.oracle);
        let capture = capture::from_config(&config.capture, Arc::clone(&sessions))?;
        Ok(Self::new(config, sessions, oracle, capture))
    }

    pub fn sessions(&self) -> &Arc<dyn SessionManager> {
        &self.sessions
    }

    /// Measure, capture and segment one URL
    #[instrument(skip(self))]
    pub async fn detect_and_segment(&self, url: &str, overrides: Overrides) -> std::result::Result<RunReport, RunFailure> {
        let mut state = RunState::default();

        let dir = self
            .layout
            .create_run_dir(url, Local::now())
            .await
            .map_err(|e| RunFailure::new(url, PipelineStage::Output, state.measurements(), e))?;
        let mut writer = ArtifactWriter::new(dir);
        Self::checkpoint(&mut writer, url, PipelineStage::Open, &state)
            .await
            .map_err(|e| RunFailure::new(url, PipelineStage::Output, state.measurements(), e))?;

        match self.run(url, overrides, &mut state, &mut writer).await {
            Ok(report) => {
                info!(
                    "{} segmented: header {}px ({}), footer {}px ({}), page {}px",
                    url,
                    report.boundaries.header_height(),
                    report.header.label(),
                    report.boundaries.footer_height(),
                    report.footer.label(),
                    report.boundaries.page_height()
                );
                Ok(report)
            }
            Err((stage, source)) => {
                let failure = RunFailure::new(url, stage, state.measurements(), source);
                error!("{}", failure);

                let files = writer.files().to_vec();
                let manifest = Manifest::incomplete(&failure, state.header.clone(), state.footer.clone(), &files);
                if let Err(e) = writer.write_manifest(&manifest).await {
                    warn!("Could not write manifest for {}: {}", url, e);
                }
                Err(failure)
            }
        }
    }

    async fn run(
        &self,
        url: &str,
        overrides: Overrides,
        state: &mut RunState,
        writer: &mut ArtifactWriter,
    ) -> std::result::Result<RunReport, StageError> {
        state.header = overrides.header_height.map(|height| RegionSource::Override { height });
        state.footer = overrides.footer_height.map(|height| RegionSource::Override { height });

        if overrides.covers_both() {
            info!("Both heights supplied for {}, skipping detection", url);
        } else {
            let session = self.sessions.open(url).await.at(PipelineStage::Open)?;
            let measured = self.measure(&session, state).await;
            if let Err(e) = session.close().await {
                warn!("Failed to close session for {}: {}", url, e);
            }
            measured?;
        }

        Self::checkpoint(writer, url, PipelineStage::Capture, state)
            .await
            .at(PipelineStage::Output)?;

        let captured = self
            .capture
            .capture(url, &CaptureOptions::from_config(&self.config.capture))
            .await
            .at(PipelineStage::Capture)?;

        let image = decode_image(&captured.image_png).at(PipelineStage::Segmentation)?;
        state.page_height = Some(image.height());

        let header = state
            .header
            .clone()
            .ok_or_else(|| Error::internal("header height missing"))
            .at(PipelineStage::Segmentation)?;
        let footer = state
            .footer
            .clone()
            .ok_or_else(|| Error::internal("footer height missing"))
            .at(PipelineStage::Segmentation)?;
        let boundaries =
            RegionBoundaries::new(header.height(), footer.height(), image.height()).at(PipelineStage::Segmentation)?;
        let result = segment(&image, boundaries).at(PipelineStage::Segmentation)?;

        writer
            .write_bytes("full_page.png", &captured.image_png)
            .await
            .at(PipelineStage::Output)?;
        if let Some(html) = &captured.html {
            writer.write_text("page.html", html).await.at(PipelineStage::Output)?;
        }
        for (name, crop) in result.regions() {
            writer
                .write_image(&format!("{}.png", name), crop)
                .await
                .at(PipelineStage::Output)?;
        }
        if let Some(markup) = &state.markup {
            for (name, html) in [("header", &markup.header), ("body", &markup.body), ("footer", &markup.footer)] {
                writer
                    .write_text(&format!("{}.html", name), html)
                    .await
                    .at(PipelineStage::Output)?;
            }
        }

        let mut report = RunReport {
            url: url.to_string(),
            output_dir: writer.dir().to_path_buf(),
            boundaries,
            header,
            footer,
            files: Vec::new(),
        };
        report.files = writer.files().to_vec();
        if !report.files.iter().any(|f| f == MANIFEST_FILE) {
            report.files.push(MANIFEST_FILE.to_string());
        }

        writer
            .write_manifest(&Manifest::complete(&report))
            .await
            .at(PipelineStage::Output)?;

        Ok(report)
    }

    /// Mark the run directory incomplete at `stage`; overwritten when the run ends
    async fn checkpoint(writer: &mut ArtifactWriter, url: &str, stage: PipelineStage, state: &RunState) -> Result<()> {
        let files = writer.files().to_vec();
        let manifest = Manifest::in_progress(url, stage, state.header.clone(), state.footer.clone(), &files);
        writer.write_manifest(&manifest).await
    }

    /// Stabilize and measure whatever was not overridden
    async fn measure(&self, session: &PageSession, state: &mut RunState) -> std::result::Result<(), StageError> {
        self.sessions.stabilize(session).await.at(PipelineStage::Stabilize)?;

        if state.header.is_none() {
            let outcome = self
                .detector
                .detect_header(session)
                .await
                .at(PipelineStage::HeaderDetection)?;
            state.page_height = Some(outcome.page_height.round() as u32);
            state.header = Some(RegionSource::Detected(outcome));
        }

        if state.footer.is_none() {
            let outcome = self
                .detector
                .detect_footer(session)
                .await
                .at(PipelineStage::FooterDetection)?;
            state.page_height = Some(outcome.page_height.round() as u32);
            state.footer = Some(RegionSource::Detected(outcome));
        }

        if self.config.output.extract_markup {
            state.markup = Some(extract_markup(session, &self.config.detection, &self.lazy).await);
        }

        Ok(())
    }

    /// Process `urls` with bounded concurrency; results come back in input order
    pub async fn run_batch(
        &self,
        urls: &[String],
        overrides: Overrides,
    ) -> Vec<std::result::Result<RunReport, RunFailure>> {
        let concurrency = self.config.output.batch_concurrency.max(1);
        info!("Processing {} URLs, {} at a time", urls.len(), concurrency);

        let mut results: Vec<_> = stream::iter(urls.iter().enumerate())
            .map(|(index, url)| async move { (index, self.detect_and_segment(url, overrides).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }
}
