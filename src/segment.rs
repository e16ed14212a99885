/// Chapter segmentation of a fetched audio file
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::chapters::ChapterMark;
use crate::error::{Result, SplitterError};
use crate::fetch::{FetchResult, ProgressRange};
use crate::transcoder::{OutputMode, TranscodeJob, Transcoder};

const ILLEGAL_FILENAME_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Replace characters illegal in file names with `_`.
///
/// Deterministic and not collision-free: titles differing only in illegal
/// characters map to the same name and the later output overwrites the earlier.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if ILLEGAL_FILENAME_CHARS.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    let trimmed = sanitized.trim();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Splits one audio file along chapter marks
pub struct ChapterSegmenter {
    transcoder: Arc<dyn Transcoder>,
    range: ProgressRange,
}

impl ChapterSegmenter {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            transcoder,
            range: ProgressRange::new(50.0, 95.0),
        }
    }

    pub fn with_progress_range(mut self, range: ProgressRange) -> Self {
        self.range = range;
        self
    }

    /// Produce the output files, in chapter order, and consume `audio`.
    ///
    /// `audio` is expected outside `dest_dir` (see [`crate::fetch::WORK_DIR`]),
    /// so a chapter titled like the intermediate file cannot clobber it.
    /// Without chapters the file is moved to `<sanitized title>.<codec>`.
    /// With chapters every mark is cut by stream copy and the whole file is
    /// removed afterwards.
    pub async fn segment(
        &self,
        audio: FetchResult,
        title: &str,
        chapters: &[ChapterMark],
        dest_dir: &Path,
        on_percent: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<Vec<String>> {
        tokio::fs::create_dir_all(dest_dir).await?;

        if chapters.is_empty() {
            let name = format!("{}.{}", sanitize_filename(title), audio.codec);
            let target = dest_dir.join(&name);
            tokio::fs::rename(&audio.path, &target).await.map_err(|e| {
                SplitterError::SegmentationFailed(format!("cannot move {}: {}", audio.path.display(), e))
            })?;
            info!("📁 No chapters, saved single file {}", name);
            on_percent(self.range.end);
            return Ok(vec![name]);
        }

        let total = chapters.len();
        let mut files = Vec::with_capacity(total);

        for (index, chapter) in chapters.iter().enumerate() {
            let name = format!("{}.{}", sanitize_filename(&chapter.title), audio.codec);
            let job = TranscodeJob::cut(
                &audio.path,
                &dest_dir.join(&name),
                chapter.start_time,
                chapter.end_time,
                OutputMode::StreamCopy,
            );

            debug!(
                "✂️ Chapter {}/{}: '{}' [{:.1}s, {:.1}s)",
                index + 1,
                total,
                chapter.title,
                chapter.start_time,
                chapter.end_time
            );
            self.transcoder.run(&job).await.map_err(|e| {
                SplitterError::SegmentationFailed(format!("chapter '{}': {}", chapter.title, e))
            })?;

            files.push(name);
            on_percent(self.range.map(Some((index + 1) as f64 / total as f64)));
        }

        tokio::fs::remove_file(&audio.path).await?;
        info!("✂️ Split into {} chapter files", files.len());
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeTranscoder {
        fail_on: Option<&'static str>,
        jobs: Mutex<Vec<TranscodeJob>>,
    }

    impl FakeTranscoder {
        fn new() -> Arc<Self> {
            Arc::new(Self { fail_on: None, jobs: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn run(&self, job: &TranscodeJob) -> anyhow::Result<()> {
            if let Some(fail) = self.fail_on {
                if job.output.to_string_lossy().contains(fail) {
                    return Err(anyhow!("ffmpeg exited with 1"));
                }
            }
            tokio::fs::write(&job.output, b"cut").await?;
            self.jobs.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    async fn audio_in(dir: &TempDir) -> FetchResult {
        let work = crate::fetch::work_dir(dir.path());
        tokio::fs::create_dir_all(&work).await.unwrap();
        let path = work.join("full_audio.mp3");
        tokio::fs::write(&path, b"audio").await.unwrap();
        FetchResult { path, codec: "mp3".to_string() }
    }

    fn mark(title: &str, start: f64, end: f64) -> ChapterMark {
        ChapterMark { title: title.to_string(), start_time: start, end_time: end }
    }

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().is_file())
            .count()
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("My Video?"), "My_Video_");
        assert_eq!(sanitize_filename(r#"a\b/c*d?e:f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_filename("Intro (part 1)"), "Intro (part 1)");
        assert_eq!(sanitize_filename("   "), "untitled");
    }

    #[tokio::test]
    async fn test_no_chapters_yields_single_renamed_file() {
        let dir = TempDir::new().unwrap();
        let transcoder = FakeTranscoder::new();
        let segmenter = ChapterSegmenter::new(transcoder.clone());

        let files = segmenter
            .segment(audio_in(&dir).await, "My Video?", &[], dir.path(), &|_: f64| {})
            .await
            .unwrap();

        assert_eq!(files, vec!["My_Video_.mp3"]);
        assert!(dir.path().join("My_Video_.mp3").exists());
        assert_eq!(file_count(dir.path()), 1);
        assert!(transcoder.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chapters_are_cut_in_order_and_source_removed() {
        let dir = TempDir::new().unwrap();
        let transcoder = FakeTranscoder::new();
        let segmenter = ChapterSegmenter::new(transcoder.clone());
        let chapters = vec![mark("Intro", 0.0, 65.0), mark("Q&A: part 1", 65.0, 200.0), mark("Outro", 200.0, 240.0)];

        let percents = Mutex::new(Vec::new());
        let record = |p: f64| percents.lock().unwrap().push(p);
        let files = segmenter
            .segment(audio_in(&dir).await, "Talk", &chapters, dir.path(), &record)
            .await
            .unwrap();

        assert_eq!(files, vec!["Intro.mp3", "Q&A_ part 1.mp3", "Outro.mp3"]);
        assert!(!dir.path().join(".work").join("full_audio.mp3").exists());
        assert_eq!(file_count(dir.path()), 3);

        let jobs = transcoder.jobs.lock().unwrap();
        assert_eq!(jobs[1].range, Some((65.0, 200.0)));
        assert!(jobs.iter().all(|j| j.mode == OutputMode::StreamCopy));

        let percents = percents.lock().unwrap();
        assert_eq!(percents.len(), 3);
        for (got, want) in percents.iter().zip([65.0, 80.0, 95.0]) {
            assert!((got - want).abs() < 1e-9, "{got} != {want}");
        }
    }

    /// Reads the input like a real cutter, so overwriting it mid-split shows up
    struct ReadingTranscoder;

    #[async_trait]
    impl Transcoder for ReadingTranscoder {
        async fn run(&self, job: &TranscodeJob) -> anyhow::Result<()> {
            if job.input == job.output {
                return Err(anyhow!("output {} is the input", job.output.display()));
            }
            let audio = tokio::fs::read(&job.input).await?;
            tokio::fs::write(&job.output, audio).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_chapter_named_like_intermediate_file() {
        let dir = TempDir::new().unwrap();
        let segmenter = ChapterSegmenter::new(Arc::new(ReadingTranscoder));
        let chapters = vec![mark("full_audio", 0.0, 10.0), mark("Intro", 10.0, 20.0)];

        let files = segmenter
            .segment(audio_in(&dir).await, "Talk", &chapters, dir.path(), &|_: f64| {})
            .await
            .unwrap();

        assert_eq!(files, vec!["full_audio.mp3", "Intro.mp3"]);
        assert_eq!(std::fs::read(dir.path().join("full_audio.mp3")).unwrap(), b"audio");
        assert_eq!(std::fs::read(dir.path().join("Intro.mp3")).unwrap(), b"audio");
        assert!(!dir.path().join(".work").join("full_audio.mp3").exists());
    }

    #[tokio::test]
    async fn test_duplicate_sanitized_titles_overwrite() {
        let dir = TempDir::new().unwrap();
        let segmenter = ChapterSegmenter::new(FakeTranscoder::new());
        let chapters = vec![mark("Part?", 0.0, 10.0), mark("Part*", 10.0, 20.0)];

        let files = segmenter
            .segment(audio_in(&dir).await, "Talk", &chapters, dir.path(), &|_: f64| {})
            .await
            .unwrap();

        assert_eq!(files, vec!["Part_.mp3", "Part_.mp3"]);
        assert_eq!(file_count(dir.path()), 1);
    }

    #[tokio::test]
    async fn test_transcoder_failure_is_segmentation_failed() {
        let dir = TempDir::new().unwrap();
        let transcoder = Arc::new(FakeTranscoder { fail_on: Some("Outro"), jobs: Mutex::new(Vec::new()) });
        let segmenter = ChapterSegmenter::new(transcoder);
        let chapters = vec![mark("Intro", 0.0, 10.0), mark("Outro", 10.0, 20.0)];

        let err = segmenter
            .segment(audio_in(&dir).await, "Talk", &chapters, dir.path(), &|_: f64| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SplitterError::SegmentationFailed(ref m) if m.contains("Outro")));
    }
}
