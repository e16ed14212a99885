/// Chapter Splitter
///
/// Resolves a video's metadata and chapter marks, downloads its audio through
/// a chain of fallback tiers and splits it into one file per chapter, while
/// exposing task progress to a polling client.

pub mod chapters;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fetch;
pub mod http;
pub mod metadata;
pub mod orchestrator;
pub mod segment;
pub mod session;
pub mod source;
pub mod task;
pub mod throttle;
pub mod transcoder;

// Re-export main types for easy access
pub use crate::chapters::ChapterMark;
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{Result, SplitterError};
pub use crate::fetch::{AudioFetcher, AudioTier, FetchResult};
pub use crate::metadata::{MediaMetadata, MetadataResolver, MetadataTier};
pub use crate::orchestrator::{Pipeline, TaskOrchestrator};
pub use crate::segment::{sanitize_filename, ChapterSegmenter};
pub use crate::session::{SessionArtifact, SessionProvider};
pub use crate::source::SourceRef;
pub use crate::task::{TaskId, TaskOutcome, TaskProgress, TaskRegistry, TaskResult, TaskState};
