//! Source reference validation and content-ID extraction

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::error::{Result, SplitterError};

/// Length of a platform content ID
pub const CONTENT_ID_LEN: usize = 11;

fn source_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?:https?://)?(?:www\.)?(?:youtube\.com/watch\?(?:[^#\s]*&)?v=|youtu\.be/)([A-Za-z0-9_-]{11})(?:[&?#/][^\s]*)?$",
        )
        .expect("static source pattern")
    })
}

/// A validated reference to one video on the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    original: String,
    content_id: String,
}

impl SourceRef {
    /// Validate a submitted reference; malformed input never becomes a task
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SplitterError::InvalidInput("empty source reference".to_string()));
        }

        let captures = source_pattern()
            .captures(trimmed)
            .ok_or_else(|| SplitterError::InvalidInput(format!("not a video URL: {}", trimmed)))?;

        let content_id = captures
            .get(1)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| SplitterError::InvalidInput(format!("missing content id: {}", trimmed)))?;

        Ok(Self {
            original: trimmed.to_string(),
            content_id,
        })
    }

    /// The reference as submitted (trimmed)
    pub fn as_str(&self) -> &str {
        &self.original
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    /// Canonical watch URL for this content
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.content_id)
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_link() {
        let source = SourceRef::parse("https://youtu.be/AAAAAAAAAAA").unwrap();
        assert_eq!(source.content_id(), "AAAAAAAAAAA");
        assert_eq!(source.watch_url(), "https://www.youtube.com/watch?v=AAAAAAAAAAA");
    }

    #[test]
    fn test_watch_url_variants() {
        for input in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "http://youtube.com/watch?v=dQw4w9WgXcQ&t=42",
            "youtube.com/watch?v=dQw4w9WgXcQ",
            "  www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ  ",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
        ] {
            let source = SourceRef::parse(input).unwrap();
            assert_eq!(source.content_id(), "dQw4w9WgXcQ", "input: {}", input);
        }
    }

    #[test]
    fn test_rejects_malformed_references() {
        for input in [
            "",
            "   ",
            "https://vimeo.com/123456",
            "https://youtu.be/short",
            "https://www.youtube.com/watch?v=",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQextra",
            "not a url",
        ] {
            let err = SourceRef::parse(input).unwrap_err();
            assert!(matches!(err, SplitterError::InvalidInput(_)), "input: {:?}", input);
        }
    }
}
