//! Metadata resolution: title, duration and chapter marks for a source

pub mod resolver;
pub mod tiers;

pub use resolver::MetadataResolver;
pub use tiers::{DataApiTier, ExtractionMetadataTier, MirrorMetadataTier};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chapters::{marks_from_starts, ChapterMark};
use crate::session::SessionArtifact;
use crate::source::SourceRef;

/// Resolved description of one media source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaMetadata {
    pub title: String,
    pub duration_seconds: f64,
    /// Ordered, non-overlapping; may be empty
    pub chapters: Vec<ChapterMark>,
}

impl MediaMetadata {
    pub fn has_chapters(&self) -> bool {
        !self.chapters.is_empty()
    }

    /// Keep this title and duration, take chapter starts from `other`.
    ///
    /// Ends are re-derived against this duration so the last mark still ends
    /// at `duration_seconds`.
    pub fn with_chapters_from(&self, other: &MediaMetadata) -> Self {
        let starts = other
            .chapters
            .iter()
            .map(|mark| (mark.title.clone(), mark.start_time))
            .collect();
        Self {
            title: self.title.clone(),
            duration_seconds: self.duration_seconds,
            chapters: marks_from_starts(starts, self.duration_seconds),
        }
    }
}

/// One metadata strategy in the resolver's ordered chain
#[async_trait]
pub trait MetadataTier: Send + Sync {
    /// Short name used in logs and failure summaries
    fn name(&self) -> &str;

    async fn attempt(&self, source: &SourceRef, session: Option<&SessionArtifact>) -> Result<MediaMetadata>;
}
