//! Audio download: tiered strategies producing one normalized audio file

pub mod cipher;
pub mod direct;
pub mod extraction;

pub use direct::DirectStreamTier;
pub use extraction::{AudioTarget, ExtractionAudioTier};

use anyhow::{anyhow, Result as AnyResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Config, OutputConfig};
use crate::error::{Result, SplitterError};
use crate::extractor::{DownloadProgress, ExtractionOptions, ExtractionTool, ProgressCallback};
use crate::metadata::MediaMetadata;
use crate::session::SessionArtifact;
use crate::source::SourceRef;
use crate::throttle::RateLimiter;
use crate::transcoder::{TranscodeJob, Transcoder};

/// File stem every tier downloads to
pub const RAW_STEM: &str = "source_audio";
/// File stem of the normalized result
pub const NORMALIZED_STEM: &str = "full_audio";
/// Task subfolder holding the raw and normalized audio until segmentation
/// has consumed it. Sanitized output names never contain a separator, so no
/// chapter file can land on the intermediate one.
pub const WORK_DIR: &str = ".work";

/// Intermediate folder inside a task's output folder
pub fn work_dir(task_dir: &Path) -> PathBuf {
    task_dir.join(WORK_DIR)
}

/// One local audio file and its codec tag
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub path: PathBuf,
    pub codec: String,
}

impl FetchResult {
    /// Codec tag taken from the file extension
    pub fn from_path(path: PathBuf) -> AnyResult<Self> {
        let codec = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .filter(|ext| !ext.is_empty())
            .ok_or_else(|| anyhow!("downloaded file {} has no extension", path.display()))?;
        Ok(Self { path, codec })
    }
}

/// Inputs shared by every audio tier
pub struct FetchRequest<'a> {
    pub source: &'a SourceRef,
    pub metadata: &'a MediaMetadata,
    pub session: Option<&'a SessionArtifact>,
    pub dest_dir: &'a Path,
}

/// One download strategy in the fetcher's ordered chain
#[async_trait]
pub trait AudioTier: Send + Sync {
    fn name(&self) -> &str;

    /// Download raw audio into `request.dest_dir` as `RAW_STEM.<ext>`
    async fn attempt(&self, request: &FetchRequest<'_>, progress: ProgressCallback<'_>) -> AnyResult<FetchResult>;
}

/// Slice of the overall task percent a phase reports into
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRange {
    pub start: f64,
    pub end: f64,
}

impl ProgressRange {
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Percent for a completed fraction; unknown totals hold at `start`
    pub fn map(&self, fraction: Option<f64>) -> f64 {
        match fraction {
            Some(f) => self.start + f.clamp(0.0, 1.0) * (self.end - self.start),
            None => self.start,
        }
    }
}

/// Tiered audio fetcher; normalizes whatever a tier produced to the target codec
pub struct AudioFetcher {
    tiers: Vec<Arc<dyn AudioTier>>,
    transcoder: Arc<dyn Transcoder>,
    output: OutputConfig,
    range: ProgressRange,
}

impl AudioFetcher {
    pub fn new(tiers: Vec<Arc<dyn AudioTier>>, transcoder: Arc<dyn Transcoder>, output: OutputConfig) -> Self {
        Self {
            tiers,
            transcoder,
            output,
            range: ProgressRange::new(5.0, 50.0),
        }
    }

    pub fn with_progress_range(mut self, range: ProgressRange) -> Self {
        self.range = range;
        self
    }

    /// Direct stream, authenticated extraction, anonymous extraction, mirror
    pub fn from_config(
        config: &Config,
        tool: Arc<dyn ExtractionTool>,
        transcoder: Arc<dyn Transcoder>,
        limiter: Arc<RateLimiter>,
    ) -> AnyResult<Self> {
        let options = ExtractionOptions::from_config(&config.extraction, &config.http);
        let mirror = config.metadata.mirror_endpoint.clone();

        let tiers: Vec<Arc<dyn AudioTier>> = vec![
            Arc::new(DirectStreamTier::new(
                &config.direct,
                &config.http,
                limiter,
                config.extraction.retry_policy(),
            )?),
            Arc::new(ExtractionAudioTier::new(Arc::clone(&tool), options.clone(), AudioTarget::Authenticated)),
            Arc::new(ExtractionAudioTier::new(Arc::clone(&tool), options.clone(), AudioTarget::Anonymous)),
            Arc::new(ExtractionAudioTier::new(tool, options, AudioTarget::Mirror(mirror))),
        ];

        Ok(Self::new(tiers, transcoder, config.output.clone()))
    }

    pub fn progress_range(&self) -> ProgressRange {
        self.range
    }

    /// First tier to produce a normalized file wins. Fails with `FetchFailed`
    /// only once every tier has failed.
    pub async fn fetch(
        &self,
        source: &SourceRef,
        metadata: &MediaMetadata,
        session: Option<&SessionArtifact>,
        dest_dir: &Path,
        on_percent: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<FetchResult> {
        tokio::fs::create_dir_all(dest_dir).await?;

        let request = FetchRequest {
            source,
            metadata,
            session,
            dest_dir,
        };
        let range = self.range;
        let report = move |update: DownloadProgress| on_percent(range.map(update.fraction()));

        let mut failures = Vec::new();
        for tier in &self.tiers {
            debug!("Trying audio tier {}", tier.name());
            let outcome = match tier.attempt(&request, &report).await {
                Ok(raw) => self.normalize(raw, dest_dir).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(result) => {
                    info!("🎧 Audio from {} at {}", tier.name(), result.path.display());
                    on_percent(range.end);
                    return Ok(result);
                }
                Err(e) => {
                    warn!("⚠️ Audio tier {} failed: {}", tier.name(), e);
                    remove_leftovers(dest_dir).await;
                    failures.push((tier.name().to_string(), e));
                }
            }
        }

        Err(SplitterError::FetchFailed(SplitterError::summarize_attempts(&failures)))
    }

    /// Re-encode to the target codec unless the file already has it; the raw
    /// file is removed either way
    async fn normalize(&self, raw: FetchResult, dest_dir: &Path) -> AnyResult<FetchResult> {
        let target = self.output.target_codec.to_lowercase();
        let output = dest_dir.join(format!("{}.{}", NORMALIZED_STEM, target));

        if raw.codec == target {
            tokio::fs::rename(&raw.path, &output).await?;
            return Ok(FetchResult { path: output, codec: target });
        }

        info!("🔄 Normalizing {} to {} at {}k", raw.codec, target, self.output.target_bitrate_kbps);
        let job = TranscodeJob::encode(&raw.path, &output, &target, self.output.target_bitrate_kbps);
        self.transcoder.run(&job).await?;
        tokio::fs::remove_file(&raw.path).await?;

        Ok(FetchResult { path: output, codec: target })
    }
}

/// Drop partial output from a failed tier so the next one starts clean
async fn remove_leftovers(dest_dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(dest_dir).await else {
        return;
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(RAW_STEM) || name.starts_with(NORMALIZED_STEM) {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                debug!("Could not remove {}: {}", name, e);
            }
        }
    }
}
