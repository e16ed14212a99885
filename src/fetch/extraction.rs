use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::{AudioTier, FetchRequest, FetchResult, RAW_STEM};
use crate::extractor::{ExtractionOptions, ExtractionTool, ProgressCallback};

/// Where the extraction tool is pointed and with which credentials
#[derive(Debug, Clone, PartialEq)]
pub enum AudioTarget {
    /// Platform watch URL with the session cookie file
    Authenticated,
    /// Platform watch URL without a session
    Anonymous,
    /// Mirror playback page for the content id
    Mirror(Option<String>),
}

/// Download through the extraction tool
pub struct ExtractionAudioTier {
    tool: Arc<dyn ExtractionTool>,
    options: ExtractionOptions,
    target: AudioTarget,
}

impl ExtractionAudioTier {
    pub fn new(tool: Arc<dyn ExtractionTool>, options: ExtractionOptions, target: AudioTarget) -> Self {
        Self { tool, options, target }
    }

    fn target_and_options(&self, request: &FetchRequest<'_>) -> Result<(String, ExtractionOptions)> {
        match &self.target {
            AudioTarget::Authenticated => {
                let cookie_file = request
                    .session
                    .and_then(|s| s.cookie_file())
                    .ok_or_else(|| anyhow!("no session available"))?;
                let options = self.options.clone().with_cookie_file(Some(cookie_file.to_path_buf()));
                Ok((request.source.watch_url(), options))
            }
            AudioTarget::Anonymous => Ok((request.source.watch_url(), self.options.clone().with_cookie_file(None))),
            AudioTarget::Mirror(endpoint) => {
                let endpoint = endpoint.as_deref().ok_or_else(|| anyhow!("no mirror configured"))?;
                let url = format!("{}/watch?v={}", endpoint.trim_end_matches('/'), request.source.content_id());
                Ok((url, self.options.clone().with_cookie_file(None)))
            }
        }
    }
}

#[async_trait]
impl AudioTier for ExtractionAudioTier {
    fn name(&self) -> &str {
        match self.target {
            AudioTarget::Authenticated => "extraction-authenticated",
            AudioTarget::Anonymous => "extraction-anonymous",
            AudioTarget::Mirror(_) => "mirror",
        }
    }

    async fn attempt(&self, request: &FetchRequest<'_>, progress: ProgressCallback<'_>) -> Result<FetchResult> {
        let (target, options) = self.target_and_options(request)?;
        let path = self
            .tool
            .download(&target, &options, request.dest_dir, RAW_STEM, progress)
            .await?;
        FetchResult::from_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::extractor::DownloadProgress;
    use crate::metadata::MediaMetadata;
    use crate::session::SessionArtifact;
    use crate::source::SourceRef;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingTool {
        calls: Mutex<Vec<(String, Option<PathBuf>)>>,
    }

    #[async_trait]
    impl ExtractionTool for RecordingTool {
        async fn extract_info(&self, _target: &str, _options: &ExtractionOptions) -> Result<MediaMetadata> {
            Err(anyhow!("not used"))
        }

        async fn download(
            &self,
            target: &str,
            options: &ExtractionOptions,
            dest_dir: &Path,
            stem: &str,
            _progress: ProgressCallback<'_>,
        ) -> Result<PathBuf> {
            self.calls.lock().unwrap().push((target.to_string(), options.cookie_file.clone()));
            let path = dest_dir.join(format!("{}.webm", stem));
            tokio::fs::write(&path, b"audio").await?;
            Ok(path)
        }
    }

    fn tier(tool: Arc<RecordingTool>, target: AudioTarget) -> ExtractionAudioTier {
        let config = Config::default();
        ExtractionAudioTier::new(tool, ExtractionOptions::from_config(&config.extraction, &config.http), target)
    }

    #[tokio::test]
    async fn test_targets() {
        let dir = TempDir::new().unwrap();
        let tool = Arc::new(RecordingTool::default());
        let source = SourceRef::parse("https://youtu.be/AAAAAAAAAAA").unwrap();
        let metadata = MediaMetadata { title: "t".to_string(), duration_seconds: 1.0, chapters: vec![] };
        let session = SessionArtifact::new(vec![], Duration::from_secs(60)).persisted_at(PathBuf::from("/tmp/c.txt"));
        let request = FetchRequest { source: &source, metadata: &metadata, session: Some(&session), dest_dir: dir.path() };
        let noop = |_: DownloadProgress| {};

        let result = tier(tool.clone(), AudioTarget::Authenticated).attempt(&request, &noop).await.unwrap();
        assert_eq!(result.codec, "webm");
        tier(tool.clone(), AudioTarget::Anonymous).attempt(&request, &noop).await.unwrap();
        tier(tool.clone(), AudioTarget::Mirror(Some("https://mirror.example/".to_string())))
            .attempt(&request, &noop)
            .await
            .unwrap();
        assert!(tier(tool.clone(), AudioTarget::Mirror(None)).attempt(&request, &noop).await.is_err());

        let calls = tool.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                ("https://www.youtube.com/watch?v=AAAAAAAAAAA".to_string(), Some(PathBuf::from("/tmp/c.txt"))),
                ("https://www.youtube.com/watch?v=AAAAAAAAAAA".to_string(), None),
                ("https://mirror.example/watch?v=AAAAAAAAAAA".to_string(), None),
            ]
        );
    }

    #[tokio::test]
    async fn test_authenticated_needs_session() {
        let dir = TempDir::new().unwrap();
        let tool = Arc::new(RecordingTool::default());
        let source = SourceRef::parse("https://youtu.be/AAAAAAAAAAA").unwrap();
        let metadata = MediaMetadata { title: "t".to_string(), duration_seconds: 1.0, chapters: vec![] };
        let request = FetchRequest { source: &source, metadata: &metadata, session: None, dest_dir: dir.path() };

        let err = tier(tool.clone(), AudioTarget::Authenticated)
            .attempt(&request, &|_: DownloadProgress| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no session"));
        assert!(tool.calls.lock().unwrap().is_empty());
    }
}
