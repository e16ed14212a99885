//! Error taxonomy for the fetch-and-segment pipeline

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, SplitterError>;

/// Error types surfaced by the pipeline
///
/// Tier-internal failures never appear here; they are logged and trigger the
/// next tier. Only phase exhaustion and segmentation failures reach a task.
#[derive(thiserror::Error, Debug)]
pub enum SplitterError {
    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Metadata resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("Audio fetch failed: {0}")]
    FetchFailed(String),

    #[error("Segmentation failed: {0}")]
    SegmentationFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SplitterError {
    /// Build a phase-exhaustion message listing every tier failure in order
    pub fn summarize_attempts(attempts: &[(String, anyhow::Error)]) -> String {
        if attempts.is_empty() {
            return "no tiers configured".to_string();
        }
        attempts
            .iter()
            .map(|(tier, err)| format!("{}: {}", tier, err))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_attempts_keeps_tier_order() {
        let attempts = vec![
            ("data-api".to_string(), anyhow::anyhow!("no api key")),
            ("mirror".to_string(), anyhow::anyhow!("HTTP 503")),
        ];
        let summary = SplitterError::summarize_attempts(&attempts);
        assert_eq!(summary, "data-api: no api key; mirror: HTTP 503");
    }

    #[test]
    fn test_error_display() {
        let err = SplitterError::ResolutionFailed("all tiers failed".to_string());
        assert_eq!(err.to_string(), "Metadata resolution failed: all tiers failed");
    }
}
