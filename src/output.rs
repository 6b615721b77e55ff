//! Output layout, artifacts and the run manifest

use chrono::{DateTime, Local, Utc};
use image::DynamicImage;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::detect::DetectionOutcome;
use crate::error::{MeasurementState, PipelineStage, RunFailure};
use crate::segment::{encode_png, RegionBoundaries};
use crate::{Error, Result};

pub const MANIFEST_FILE: &str = "segmentation.json";

/// Host part of `url` with every non-alphanumeric character replaced by `_`
pub fn sanitize_host(url: &str) -> String {
    let host = match reqwest::Url::parse(url) {
        Ok(parsed) => match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => url.to_string(),
        },
        Err(_) => url.to_string(),
    };

    host.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Root under which every run gets its own directory
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create `<root>/<host>_<YYYYmmdd_HHMMSS>`, adding `_1`, `_2`, ... when taken
    pub async fn create_run_dir(&self, url: &str, now: DateTime<Local>) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;

        let base = format!("{}_{}", sanitize_host(url), now.format("%Y%m%d_%H%M%S"));
        let mut suffix = 0u32;
        loop {
            let name = if suffix == 0 {
                base.clone()
            } else {
                format!("{}_{}", base, suffix)
            };
            let dir = self.root.join(name);

            match tokio::fs::create_dir(&dir).await {
                Ok(()) => {
                    debug!("Output directory {}", dir.display());
                    return Ok(dir);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Writes artifacts into one run directory and remembers what was written
#[derive(Debug)]
pub struct ArtifactWriter {
    dir: PathBuf,
    files: Vec<String>,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub async fn write_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::write(self.dir.join(name), bytes).await?;
        if !self.files.iter().any(|f| f == name) {
            self.files.push(name.to_string());
        }
        Ok(())
    }

    pub async fn write_text(&mut self, name: &str, text: &str) -> Result<()> {
        self.write_bytes(name, text.as_bytes()).await
    }

    /// PNG-encode and write; zero-height crops are skipped
    pub async fn write_image(&mut self, name: &str, image: &DynamicImage) -> Result<()> {
        if image.width() == 0 || image.height() == 0 {
            warn!("{} is empty, not written", name);
            return Ok(());
        }
        let png = encode_png(image)?;
        self.write_bytes(name, &png).await
    }

    pub async fn write_manifest(&mut self, manifest: &Manifest) -> Result<()> {
        let json = serde_json::to_vec_pretty(manifest)?;
        self.write_bytes(MANIFEST_FILE, &json).await
    }
}

/// Where a region's height came from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum RegionSource {
    Detected(DetectionOutcome),
    Override { height: u32 },
}

impl RegionSource {
    pub fn height(&self) -> u32 {
        match self {
            RegionSource::Detected(outcome) => outcome.height,
            RegionSource::Override { height } => *height,
        }
    }

    /// Stage label for logs and failure reports
    pub fn label(&self) -> String {
        match self {
            RegionSource::Detected(outcome) => outcome.stage.to_string(),
            RegionSource::Override { .. } => "override".to_string(),
        }
    }
}

/// Result of one successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub url: String,
    pub output_dir: PathBuf,
    pub boundaries: RegionBoundaries,
    pub header: RegionSource,
    pub footer: RegionSource,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Complete,
    Incomplete,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestError {
    pub stage: PipelineStage,
    pub message: String,
    pub measurements: MeasurementState,
}

/// Contents of `segmentation.json`
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub status: RunStatus,
    pub url: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boundaries: Option<RegionBoundaries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<RegionSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<RegionSource>,
    pub files: Vec<String>,
    /// Stage a still-running run had reached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<PipelineStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ManifestError>,
}

impl Manifest {
    pub fn complete(report: &RunReport) -> Self {
        Self {
            status: RunStatus::Complete,
            url: report.url.clone(),
            created_at: Utc::now(),
            boundaries: Some(report.boundaries),
            header: Some(report.header.clone()),
            footer: Some(report.footer.clone()),
            files: report.files.clone(),
            stage: None,
            error: None,
        }
    }

    /// Marker left in the run directory until the run completes or fails
    pub fn in_progress(
        url: &str,
        stage: PipelineStage,
        header: Option<RegionSource>,
        footer: Option<RegionSource>,
        files: &[String],
    ) -> Self {
        Self {
            status: RunStatus::Incomplete,
            url: url.to_string(),
            created_at: Utc::now(),
            boundaries: None,
            header,
            footer,
            files: files.to_vec(),
            stage: Some(stage),
            error: None,
        }
    }

    pub fn incomplete(
        failure: &RunFailure,
        header: Option<RegionSource>,
        footer: Option<RegionSource>,
        files: &[String],
    ) -> Self {
        Self {
            status: RunStatus::Incomplete,
            url: failure.url.clone(),
            created_at: Utc::now(),
            boundaries: None,
            header,
            footer,
            files: files.to_vec(),
            stage: None,
            error: Some(ManifestError {
                stage: failure.stage,
                message: failure.source.to_string(),
                measurements: failure.measurements.clone(),
            }),
        }
    }
}

/// Read a manifest back as JSON
pub async fn read_manifest(dir: &Path) -> Result<serde_json::Value> {
    let bytes = tokio::fs::read(dir.join(MANIFEST_FILE)).await?;
    serde_json::from_slice(&bytes).map_err(Error::from)
}
