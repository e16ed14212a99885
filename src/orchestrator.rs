use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Result, SplitterError};
use crate::extractor::{ExtractionTool, YtDlp};
use crate::fetch::{self, AudioFetcher};
use crate::metadata::MetadataResolver;
use crate::segment::ChapterSegmenter;
use crate::session::{HeadlessBrowser, SessionProvider};
use crate::source::SourceRef;
use crate::task::{RegistryStats, TaskHandle, TaskId, TaskOutcome, TaskProgress, TaskRegistry, TaskResult, TaskState};
use crate::throttle::RateLimiter;
use crate::transcoder::{Ffmpeg, Transcoder};

/// Percent reported when metadata resolution starts
const METADATA_START: f64 = 1.0;

/// The phases one worker runs, shared by all workers
pub struct Pipeline {
    session: Arc<SessionProvider>,
    resolver: MetadataResolver,
    fetcher: AudioFetcher,
    segmenter: ChapterSegmenter,
    base_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        session: Arc<SessionProvider>,
        resolver: MetadataResolver,
        fetcher: AudioFetcher,
        segmenter: ChapterSegmenter,
        base_dir: PathBuf,
    ) -> Self {
        Self {
            session,
            resolver,
            fetcher,
            segmenter,
            base_dir,
        }
    }

    /// Run one task to a terminal state
    async fn run(&self, handle: TaskHandle, source: SourceRef) {
        let started = Instant::now();
        let dest_dir = self.base_dir.join(handle.id().as_str());

        match self.execute(&handle, &source, &dest_dir, started).await {
            Ok(outcome) => {
                info!(
                    "🎉 Task finished in {:.1}s: {} files, {:.2} MB",
                    outcome.elapsed_seconds,
                    outcome.files.len(),
                    outcome.total_output_size_mb
                );
                handle.complete(outcome);
            }
            Err(e) => {
                error!("❌ Task failed: {}", e);
                if let Err(cleanup) = tokio::fs::remove_dir_all(&dest_dir).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not clean up {}: {}", dest_dir.display(), cleanup);
                    }
                }
                handle.fail(e.to_string());
            }
        }
    }

    async fn execute(
        &self,
        handle: &TaskHandle,
        source: &SourceRef,
        dest_dir: &Path,
        started: Instant,
    ) -> Result<TaskOutcome> {
        let report = |percent: f64| handle.report_percent(percent);

        handle.advance(TaskState::ResolvingMetadata, METADATA_START);
        let session = match self.session.get_valid_session(Some(source)).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("⚠️ Continuing without session: {}", e);
                None
            }
        };
        let metadata = self.resolver.resolve(source, session.as_deref()).await?;

        let work_dir = fetch::work_dir(dest_dir);
        handle.advance(TaskState::FetchingAudio, self.fetcher.progress_range().start);
        let audio = self
            .fetcher
            .fetch(source, &metadata, session.as_deref(), &work_dir, &report)
            .await?;

        handle.advance(TaskState::Segmenting, self.fetcher.progress_range().end);
        let files = self
            .segmenter
            .segment(audio, &metadata.title, &metadata.chapters, dest_dir, &report)
            .await?;
        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            debug!("Could not remove {}: {}", work_dir.display(), e);
        }

        Ok(TaskOutcome {
            video_title: metadata.title,
            directory: handle.id().to_string(),
            files,
            duration_seconds: metadata.duration_seconds,
            chapters: metadata.chapters,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            total_output_size_mb: folder_size_mb(dest_dir).await,
        })
    }
}

/// Recursive size of a folder in MiB, walked on the blocking pool
pub async fn folder_size_mb(path: &Path) -> f64 {
    let path = path.to_path_buf();
    match tokio::task::spawn_blocking(move || folder_size_bytes(&path)).await {
        Ok(bytes) => bytes as f64 / (1024.0 * 1024.0),
        Err(e) => {
            warn!("Folder size walk failed: {}", e);
            0.0
        }
    }
}

fn folder_size_bytes(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

/// Accepts submissions, runs one worker per task and answers queries
pub struct TaskOrchestrator {
    pipeline: Arc<Pipeline>,
    registry: Arc<TaskRegistry>,
}

impl TaskOrchestrator {
    pub fn new(pipeline: Pipeline, registry: Arc<TaskRegistry>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            registry,
        }
    }

    /// Wire the external tools named in `config`
    pub async fn from_config(config: &Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| SplitterError::Configuration(e.to_string()))?;

        let tool: Arc<dyn ExtractionTool> = Arc::new(YtDlp::new(config.extraction.program.clone()));
        let transcoder: Arc<dyn Transcoder> =
            Arc::new(Ffmpeg::new(config.transcoder.program.clone(), config.transcoder.timeout()));
        let browser = Arc::new(HeadlessBrowser::new(
            config.session.browser_command.clone(),
            config.session.timeout(),
        ));
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(config.extraction.sleep_interval_seconds)));

        let session = SessionProvider::with_seed(config.session.clone(), &config.http, browser).await;
        let resolver = MetadataResolver::from_config(config, Arc::clone(&tool), Arc::clone(&limiter))
            .map_err(|e| SplitterError::Configuration(e.to_string()))?;
        let fetcher = AudioFetcher::from_config(config, tool, Arc::clone(&transcoder), limiter)
            .map_err(|e| SplitterError::Configuration(e.to_string()))?;
        let segmenter = ChapterSegmenter::new(transcoder);

        let pipeline = Pipeline::new(
            Arc::new(session),
            resolver,
            fetcher,
            segmenter,
            config.output.base_dir.clone(),
        );
        Ok(Self::new(pipeline, TaskRegistry::new(config.registry.retention())))
    }

    /// Validate `input`, create a queued task and start its worker.
    ///
    /// Malformed input is rejected here and never becomes a task. Workers are
    /// spawned on the current Tokio runtime; called outside one, this returns
    /// `Configuration` without creating a task.
    pub fn submit(&self, input: &str) -> Result<TaskId> {
        let source = SourceRef::parse(input)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SplitterError::Configuration(format!("submit needs a Tokio runtime: {}", e)))?;
        self.registry.purge_expired();

        let handle = self.registry.create();
        let id = handle.id().clone();
        info!("📥 Task {} submitted for {}", id, source.content_id());

        let pipeline = Arc::clone(&self.pipeline);
        let span = info_span!("task", id = %id);
        let worker = runtime.spawn(async move { pipeline.run(handle, source).await }.instrument(span));
        self.registry.track_worker(id.clone(), worker);

        Ok(id)
    }

    pub fn progress(&self, id: &TaskId) -> Option<TaskProgress> {
        self.registry.progress(id)
    }

    /// Result or error of a terminal task; `Pending` otherwise
    pub fn result(&self, id: &TaskId) -> Option<TaskResult> {
        self.registry.result(id)
    }

    pub fn statistics(&self) -> RegistryStats {
        self.registry.statistics()
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Let every running worker finish
    pub async fn shutdown(&self) {
        let stats = self.registry.statistics();
        if stats.live_workers > 0 {
            info!("⏳ Waiting for {} running tasks", stats.live_workers);
        }
        self.registry.join_workers().await;
    }
}
