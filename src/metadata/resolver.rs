use anyhow::Result as AnyResult;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{DataApiTier, ExtractionMetadataTier, MediaMetadata, MetadataTier, MirrorMetadataTier};
use crate::config::Config;
use crate::error::{Result, SplitterError};
use crate::extractor::{ExtractionOptions, ExtractionTool};
use crate::session::SessionArtifact;
use crate::source::SourceRef;
use crate::throttle::RateLimiter;

/// Ordered metadata tiers with a chapters-only second pass
pub struct MetadataResolver {
    tiers: Vec<Arc<dyn MetadataTier>>,
    /// Consulted for chapters when the first tier succeeds without any
    chapter_sources: Vec<Arc<dyn MetadataTier>>,
}

impl MetadataResolver {
    pub fn new(tiers: Vec<Arc<dyn MetadataTier>>) -> Self {
        Self {
            tiers,
            chapter_sources: Vec::new(),
        }
    }

    pub fn with_chapter_sources(mut self, sources: Vec<Arc<dyn MetadataTier>>) -> Self {
        self.chapter_sources = sources;
        self
    }

    /// Data API, authenticated extraction, anonymous extraction, mirror.
    /// Both extraction tiers double as chapter sources.
    pub fn from_config(
        config: &Config,
        tool: Arc<dyn ExtractionTool>,
        limiter: Arc<RateLimiter>,
    ) -> AnyResult<Self> {
        let retry = config.extraction.retry_policy();
        let options = ExtractionOptions::from_config(&config.extraction, &config.http);

        let authenticated: Arc<dyn MetadataTier> =
            Arc::new(ExtractionMetadataTier::authenticated(Arc::clone(&tool), options.clone()));
        let anonymous: Arc<dyn MetadataTier> = Arc::new(ExtractionMetadataTier::anonymous(tool, options));

        let tiers: Vec<Arc<dyn MetadataTier>> = vec![
            Arc::new(DataApiTier::new(&config.metadata, &config.http, retry)?),
            Arc::clone(&authenticated),
            Arc::clone(&anonymous),
            Arc::new(MirrorMetadataTier::new(&config.metadata, &config.http, limiter, retry)?),
        ];

        Ok(Self::new(tiers).with_chapter_sources(vec![authenticated, anonymous]))
    }

    /// First tier to succeed wins. Fails with `ResolutionFailed` only once
    /// every tier has failed.
    pub async fn resolve(&self, source: &SourceRef, session: Option<&SessionArtifact>) -> Result<MediaMetadata> {
        let mut failures = Vec::new();

        for (index, tier) in self.tiers.iter().enumerate() {
            debug!("Trying metadata tier {}", tier.name());
            match tier.attempt(source, session).await {
                Ok(metadata) => {
                    info!(
                        "📋 Metadata from {}: '{}' ({:.0}s, {} chapters)",
                        tier.name(),
                        metadata.title,
                        metadata.duration_seconds,
                        metadata.chapters.len()
                    );
                    if index == 0 && !metadata.has_chapters() {
                        return Ok(self.fill_chapters(metadata, source, session).await);
                    }
                    return Ok(metadata);
                }
                Err(e) => {
                    warn!("⚠️ Metadata tier {} failed: {}", tier.name(), e);
                    failures.push((tier.name().to_string(), e));
                }
            }
        }

        Err(SplitterError::ResolutionFailed(SplitterError::summarize_attempts(&failures)))
    }

    /// Keep the structured title, borrow chapters from the first source that has any
    async fn fill_chapters(
        &self,
        metadata: MediaMetadata,
        source: &SourceRef,
        session: Option<&SessionArtifact>,
    ) -> MediaMetadata {
        for tier in &self.chapter_sources {
            match tier.attempt(source, session).await {
                Ok(other) if other.has_chapters() => {
                    let merged = metadata.with_chapters_from(&other);
                    if merged.has_chapters() {
                        info!("📑 Chapters from {} ({} marks)", tier.name(), merged.chapters.len());
                        return merged;
                    }
                }
                Ok(_) => debug!("{} has no chapters either", tier.name()),
                Err(e) => debug!("Chapter lookup via {} failed: {}", tier.name(), e),
            }
        }

        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapters::{chapters_from_description, ChapterMark};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeTier {
        name: &'static str,
        outcome: Option<MediaMetadata>,
        calls: AtomicUsize,
    }

    impl FakeTier {
        fn ok(name: &'static str, metadata: MediaMetadata) -> Arc<Self> {
            Arc::new(Self { name, outcome: Some(metadata), calls: AtomicUsize::new(0) })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, outcome: None, calls: AtomicUsize::new(0) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MetadataTier for FakeTier {
        fn name(&self) -> &str {
            self.name
        }

        async fn attempt(&self, _source: &SourceRef, _session: Option<&SessionArtifact>) -> AnyResult<MediaMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone().ok_or_else(|| anyhow!("{} blocked", self.name))
        }
    }

    fn metadata(title: &str, duration: f64, chapters: Vec<ChapterMark>) -> MediaMetadata {
        MediaMetadata {
            title: title.to_string(),
            duration_seconds: duration,
            chapters,
        }
    }

    fn source() -> SourceRef {
        SourceRef::parse("https://youtu.be/AAAAAAAAAAA").unwrap()
    }

    #[tokio::test]
    async fn test_description_timestamp_from_first_tier() {
        let api = FakeTier::ok(
            "api",
            metadata("Talk", 300.0, chapters_from_description("Welcome!\n1:05 Intro", 300.0)),
        );
        let resolver = MetadataResolver::new(vec![api]);

        let resolved = resolver.resolve(&source(), None).await.unwrap();
        assert_eq!(resolved.chapters[0].title, "Intro");
        assert_eq!(resolved.chapters[0].start_time, 65.0);
    }

    #[tokio::test]
    async fn test_falls_through_to_next_tier() {
        let first = FakeTier::failing("api");
        let second = FakeTier::ok("extraction", metadata("Scraped", 60.0, vec![]));
        let resolver = MetadataResolver::new(vec![first.clone(), second.clone()]);

        let resolved = resolver.resolve(&source(), None).await.unwrap();
        assert_eq!(resolved.title, "Scraped");
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_tiers_failing_is_resolution_failed() {
        let tiers: Vec<Arc<dyn MetadataTier>> = vec![
            FakeTier::failing("api"),
            FakeTier::failing("authenticated"),
            FakeTier::failing("anonymous"),
            FakeTier::failing("mirror"),
        ];
        let resolver = MetadataResolver::new(tiers);

        let err = resolver.resolve(&source(), None).await.unwrap_err();
        match err {
            SplitterError::ResolutionFailed(message) => {
                assert!(message.contains("api: api blocked"));
                assert!(message.contains("mirror: mirror blocked"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chapters_only_fallback_keeps_structured_title() {
        let api = FakeTier::ok("api", metadata("Structured", 120.0, vec![]));
        let scraped = FakeTier::ok(
            "extraction",
            metadata(
                "scraped title",
                120.0,
                vec![
                    ChapterMark { title: "A".to_string(), start_time: 0.0, end_time: 50.0 },
                    ChapterMark { title: "B".to_string(), start_time: 50.0, end_time: 120.0 },
                ],
            ),
        );
        let resolver = MetadataResolver::new(vec![api, scraped.clone()]).with_chapter_sources(vec![scraped]);

        let resolved = resolver.resolve(&source(), None).await.unwrap();
        assert_eq!(resolved.title, "Structured");
        assert_eq!(resolved.chapters.len(), 2);
        assert_eq!(resolved.chapters[1].end_time, 120.0);
    }

    #[tokio::test]
    async fn test_chapter_source_outside_duration_moves_to_next_source() {
        let api = FakeTier::ok("api", metadata("Structured", 120.0, vec![]));
        let stale = FakeTier::ok(
            "authenticated",
            metadata(
                "longer upload",
                900.0,
                vec![
                    ChapterMark { title: "Late".to_string(), start_time: 300.0, end_time: 600.0 },
                    ChapterMark { title: "Later".to_string(), start_time: 600.0, end_time: 900.0 },
                ],
            ),
        );
        let fresh = FakeTier::ok(
            "anonymous",
            metadata(
                "scraped title",
                120.0,
                vec![
                    ChapterMark { title: "Intro".to_string(), start_time: 0.0, end_time: 40.0 },
                    ChapterMark { title: "Body".to_string(), start_time: 40.0, end_time: 120.0 },
                ],
            ),
        );
        let resolver =
            MetadataResolver::new(vec![api]).with_chapter_sources(vec![stale.clone(), fresh.clone()]);

        let resolved = resolver.resolve(&source(), None).await.unwrap();
        assert_eq!(resolved.title, "Structured");
        assert_eq!(resolved.duration_seconds, 120.0);
        let titles: Vec<&str> = resolved.chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Intro", "Body"]);
        assert_eq!(stale.calls(), 1);
        assert_eq!(fresh.calls(), 1);
    }

    #[tokio::test]
    async fn test_chapters_only_fallback_failure_keeps_first_result() {
        let api = FakeTier::ok("api", metadata("Structured", 120.0, vec![]));
        let broken = FakeTier::failing("extraction");
        let resolver = MetadataResolver::new(vec![api]).with_chapter_sources(vec![broken.clone()]);

        let resolved = resolver.resolve(&source(), None).await.unwrap();
        assert_eq!(resolved.title, "Structured");
        assert!(resolved.chapters.is_empty());
        assert_eq!(broken.calls(), 1);
    }

    #[tokio::test]
    async fn test_later_tier_without_chapters_skips_second_pass() {
        let first = FakeTier::failing("api");
        let second = FakeTier::ok("extraction", metadata("Scraped", 60.0, vec![]));
        let chapter_source = FakeTier::failing("chapters");
        let resolver =
            MetadataResolver::new(vec![first, second]).with_chapter_sources(vec![chapter_source.clone()]);

        resolver.resolve(&source(), None).await.unwrap();
        assert_eq!(chapter_source.calls(), 0);
    }
}
