use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::chapters::marks_from_starts;
use crate::config::{ExtractionConfig, HttpConfig};
use crate::metadata::MediaMetadata;
use crate::throttle::{retry_rate_limited, RetryPolicy};

/// Options passed to the extraction tool for one invocation
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    /// Format selector, most preferred first
    pub format: String,
    /// Extra request headers
    pub headers: Vec<(String, String)>,
    pub user_agent: String,
    /// Netscape cookie file from the session artifact
    pub cookie_file: Option<PathBuf>,
    pub player_client: String,
    pub rate_limit: String,
    pub sleep_interval: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub timeout: Duration,
}

impl ExtractionOptions {
    /// Conservative defaults from configuration, without a session
    pub fn from_config(config: &ExtractionConfig, http: &HttpConfig) -> Self {
        Self {
            format: config.format.clone(),
            headers: vec![
                ("Accept-Language".to_string(), http.accept_language.clone()),
                ("Referer".to_string(), http.referer.clone()),
            ],
            user_agent: http.user_agent.clone(),
            cookie_file: None,
            player_client: config.player_client.clone(),
            rate_limit: config.rate_limit.clone(),
            sleep_interval: Duration::from_secs(config.sleep_interval_seconds),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            timeout: config.timeout(),
        }
    }

    /// Same options using the given cookie file
    pub fn with_cookie_file(mut self, cookie_file: Option<PathBuf>) -> Self {
        self.cookie_file = cookie_file;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_backoff)
    }
}

/// Transfer state reported by the extraction tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Downloading,
    Finished,
}

/// One progress callback payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    pub status: TransferStatus,
}

impl DownloadProgress {
    /// Fraction complete, when the total size is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => Some((self.bytes_downloaded as f64 / total as f64).clamp(0.0, 1.0)),
            _ => None,
        }
    }
}

/// Callback invoked with transfer progress
pub type ProgressCallback<'a> = &'a (dyn Fn(DownloadProgress) + Send + Sync);

/// Generic metadata/download extraction tool
#[async_trait]
pub trait ExtractionTool: Send + Sync {
    /// Resolve title, duration and chapters without downloading
    async fn extract_info(&self, target: &str, options: &ExtractionOptions) -> Result<MediaMetadata>;

    /// Download the best matching audio into `dest_dir` as `<stem>.<ext>`
    async fn download(
        &self,
        target: &str,
        options: &ExtractionOptions,
        dest_dir: &Path,
        stem: &str,
        progress: ProgressCallback<'_>,
    ) -> Result<PathBuf>;
}

/// `yt-dlp` driven as an external process
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    chapters: Option<Vec<YtDlpChapter>>,
}

#[derive(Debug, Deserialize)]
struct YtDlpChapter {
    title: Option<String>,
    start_time: f64,
}

const PROGRESS_PREFIX: &str = "[progress]";

impl YtDlp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn common_args(options: &ExtractionOptions) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--geo-bypass".to_string(),
            "--no-check-certificates".to_string(),
            "--user-agent".to_string(),
            options.user_agent.clone(),
            "--extractor-args".to_string(),
            format!("youtube:player_client={}", options.player_client),
            "--limit-rate".to_string(),
            options.rate_limit.clone(),
            "--sleep-requests".to_string(),
            options.sleep_interval.as_secs().to_string(),
            "--retries".to_string(),
            options.max_retries.to_string(),
            "--extractor-retries".to_string(),
            options.max_retries.to_string(),
            "--retry-sleep".to_string(),
            "http:exp=1:30".to_string(),
        ];

        for (name, value) in &options.headers {
            args.push("--add-header".to_string());
            args.push(format!("{}:{}", name, value));
        }

        if let Some(cookie_file) = &options.cookie_file {
            args.push("--cookies".to_string());
            args.push(cookie_file.to_string_lossy().to_string());
        }

        args
    }

    fn parse_info(json: &[u8], target: &str) -> Result<MediaMetadata> {
        let info: YtDlpInfo = serde_json::from_slice(json)
            .map_err(|e| anyhow!("invalid extraction JSON: {}", e))?;

        let duration = info.duration.unwrap_or(0.0);
        if duration <= 0.0 {
            return Err(anyhow!("extraction returned no duration for {}", target));
        }

        let starts = info
            .chapters
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, ch)| {
                let title = ch
                    .title
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| format!("Chapter {}", i + 1));
                (title, ch.start_time)
            })
            .collect();

        Ok(MediaMetadata {
            title: info.title.unwrap_or_else(|| target.to_string()),
            duration_seconds: duration,
            chapters: marks_from_starts(starts, duration),
        })
    }

    /// Parse a `--progress-template` line: `[progress] downloaded/total/estimate/status`
    pub fn parse_progress_line(line: &str) -> Option<DownloadProgress> {
        let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?.trim();
        let fields: Vec<&str> = rest.split('/').collect();
        if fields.len() != 4 {
            return None;
        }

        let number = |s: &str| s.trim().parse::<f64>().ok().filter(|n| *n >= 0.0).map(|n| n as u64);
        let bytes_downloaded = number(fields[0])?;
        let total_bytes = number(fields[1]).or_else(|| number(fields[2]));
        let status = match fields[3].trim() {
            "finished" => TransferStatus::Finished,
            _ => TransferStatus::Downloading,
        };

        Some(DownloadProgress {
            bytes_downloaded,
            total_bytes,
            status,
        })
    }

    async fn run_once(
        &self,
        args: &[String],
        timeout: Duration,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow!("failed to spawn {}: {}", self.program, e))?;

        let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout from {}", self.program))?;
        let mut stderr = child.stderr.take().ok_or_else(|| anyhow!("no stderr from {}", self.program))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let run = async {
            let mut collected = Vec::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(update) = Self::parse_progress_line(&line) {
                    if let Some(callback) = progress {
                        callback(update);
                    }
                } else {
                    collected.extend_from_slice(line.as_bytes());
                    collected.push(b'\n');
                }
            }
            let status = child.wait().await?;
            Ok::<_, anyhow::Error>((status, collected))
        };

        let (status, collected) = match tokio::time::timeout(timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(anyhow!("{} timed out after {}s", self.program, timeout.as_secs()));
            }
        };

        let stderr_text = stderr_task.await.unwrap_or_default();
        if !status.success() {
            let last_line = stderr_text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            return Err(anyhow!("{} exited with {}: {}", self.program, status, last_line.trim()));
        }
        if !stderr_text.trim().is_empty() {
            debug!("{} stderr: {}", self.program, stderr_text.trim());
        }

        Ok(collected)
    }
}

#[async_trait]
impl ExtractionTool for YtDlp {
    async fn extract_info(&self, target: &str, options: &ExtractionOptions) -> Result<MediaMetadata> {
        let mut args = Self::common_args(options);
        args.extend(["--dump-single-json".to_string(), "--skip-download".to_string(), target.to_string()]);

        debug!("Extracting info for {} (cookies: {})", target, options.cookie_file.is_some());
        let json = retry_rate_limited("extract_info", options.retry_policy(), || {
            self.run_once(&args, options.timeout, None)
        })
        .await?;

        Self::parse_info(&json, target)
    }

    async fn download(
        &self,
        target: &str,
        options: &ExtractionOptions,
        dest_dir: &Path,
        stem: &str,
        progress: ProgressCallback<'_>,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let template = dest_dir.join(format!("{}.%(ext)s", stem));

        let mut args = Self::common_args(options);
        args.extend([
            "--format".to_string(),
            options.format.clone(),
            "--output".to_string(),
            template.to_string_lossy().to_string(),
            "--sleep-interval".to_string(),
            options.sleep_interval.as_secs().to_string(),
            "--newline".to_string(),
            "--progress".to_string(),
            "--progress-template".to_string(),
            format!(
                "download:{} %(progress.downloaded_bytes)s/%(progress.total_bytes)s/%(progress.total_bytes_estimate)s/%(progress.status)s",
                PROGRESS_PREFIX
            ),
            target.to_string(),
        ]);

        info!("⬇️ Downloading audio from {} (cookies: {})", target, options.cookie_file.is_some());
        retry_rate_limited("download", options.retry_policy(), || {
            self.run_once(&args, options.timeout, Some(progress))
        })
        .await?;

        find_downloaded(dest_dir, stem).await
    }
}

/// Locate the finished `<stem>.<ext>` file, ignoring partial downloads
pub async fn find_downloaded(dest_dir: &Path, stem: &str) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(dest_dir).await?;
    let prefix = format!("{}.", stem);

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let partial = name.ends_with(".part") || name.ends_with(".ytdl") || name.contains(".part-");
        if name.starts_with(&prefix) && !partial && path.is_file() {
            return Ok(path);
        }
    }

    warn!("No finished download named {}.* in {}", stem, dest_dir.display());
    Err(anyhow!("download finished but no {}.* file in {}", stem, dest_dir.display()))
}
