/// Chapter marks and the description timestamp grammar
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

/// A labeled time range within the source audio
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChapterMark {
    /// Chapter title as published
    pub title: String,
    /// Start offset in seconds
    pub start_time: f64,
    /// End offset in seconds (next chapter's start, or total duration)
    pub end_time: f64,
}

impl ChapterMark {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Build ordered, non-overlapping marks from `(title, start)` pairs.
///
/// Starts are sorted ascending; a start repeated at the same offset keeps the
/// first title; starts at or beyond `duration` are dropped. Each end is the
/// following start, the last one ends at `duration`.
pub fn marks_from_starts(starts: Vec<(String, f64)>, duration: f64) -> Vec<ChapterMark> {
    let mut starts: Vec<(String, f64)> = starts
        .into_iter()
        .filter(|(_, start)| start.is_finite() && *start >= 0.0 && *start < duration)
        .collect();
    starts.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    starts.dedup_by(|later, earlier| later.1 == earlier.1);

    let mut marks = Vec::with_capacity(starts.len());
    for (i, (title, start)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map(|(_, next)| *next).unwrap_or(duration);
        marks.push(ChapterMark {
            title: title.clone(),
            start_time: *start,
            end_time: end,
        });
    }
    marks
}

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:^|[^\d:])((?:(\d{1,2}):)?(\d{1,2}):(\d{2}))(?:[^\d:]|$)")
            .expect("static timestamp pattern")
    })
}

/// Parse `H:MM:SS` / `MM:SS` / `M:SS` into seconds
pub fn parse_timestamp(text: &str) -> Option<f64> {
    let parts: Vec<&str> = text.trim().split(':').collect();
    let numbers: Option<Vec<u32>> = parts.iter().map(|p| p.parse::<u32>().ok()).collect();
    let numbers = numbers?;

    match numbers.as_slice() {
        [minutes, seconds] if *seconds < 60 => Some((minutes * 60 + seconds) as f64),
        [hours, minutes, seconds] if *minutes < 60 && *seconds < 60 => {
            Some((hours * 3600 + minutes * 60 + seconds) as f64)
        }
        _ => None,
    }
}

/// Clean and normalize a chapter title
pub fn clean_chapter_title(title: &str) -> String {
    title
        .trim()
        .trim_matches(|c: char| c == '-' || c == '–' || c == '—' || c == '|' || c == ':')
        .trim()
        .to_string()
}

/// Extract `(title, start)` pairs from a free-text description.
///
/// Only the first timestamp on a line counts; lines without one are ignored.
/// The label is the text following the timestamp, or the text before it when
/// nothing follows.
pub fn parse_description_starts(description: &str) -> Vec<(String, f64)> {
    let mut starts = Vec::new();

    for line in description.lines() {
        let Some(captures) = timestamp_pattern().captures(line) else {
            continue;
        };
        let Some(stamp) = captures.get(1) else {
            continue;
        };
        let Some(seconds) = parse_timestamp(stamp.as_str()) else {
            continue;
        };

        let after = clean_chapter_title(&line[stamp.end()..]);
        let title = if after.is_empty() {
            clean_chapter_title(&line[..stamp.start()])
        } else {
            after
        };
        let title = if title.is_empty() {
            format!("Chapter {}", starts.len() + 1)
        } else {
            title
        };

        debug!("Description timestamp {} -> '{}' @ {}s", stamp.as_str(), title, seconds);
        starts.push((title, seconds));
    }

    starts
}

/// Parse chapter marks out of a description for a video of `duration` seconds
pub fn chapters_from_description(description: &str, duration: f64) -> Vec<ChapterMark> {
    marks_from_starts(parse_description_starts(description), duration)
}
