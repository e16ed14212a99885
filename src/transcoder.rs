use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// How the output stream is produced
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMode {
    /// Re-encode audio to `codec` at `bitrate_kbps`
    Encode { codec: String, bitrate_kbps: u32 },
    /// Copy the audio stream without re-encoding
    StreamCopy,
}

/// One transcoder invocation
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// `[start, end)` in seconds
    pub range: Option<(f64, f64)>,
    pub mode: OutputMode,
}

impl TranscodeJob {
    pub fn encode(input: &Path, output: &Path, codec: &str, bitrate_kbps: u32) -> Self {
        Self {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            range: None,
            mode: OutputMode::Encode {
                codec: codec.to_string(),
                bitrate_kbps,
            },
        }
    }

    pub fn cut(input: &Path, output: &Path, start: f64, end: f64, mode: OutputMode) -> Self {
        Self {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            range: Some((start, end)),
            mode,
        }
    }
}

/// External audio transcoder, invoked synchronously per job
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn run(&self, job: &TranscodeJob) -> Result<()>;
}

/// `ffmpeg` driven as an external process
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: String,
    timeout: Duration,
}

impl Ffmpeg {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Encoder name for a codec tag
    fn encoder_for(codec: &str) -> &str {
        match codec {
            "mp3" => "libmp3lame",
            "m4a" | "aac" => "aac",
            "opus" | "webm" => "libopus",
            "ogg" | "vorbis" => "libvorbis",
            other => other,
        }
    }

    pub fn build_args(job: &TranscodeJob) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            job.input.to_string_lossy().to_string(),
        ];

        if let Some((start, end)) = job.range {
            args.extend([
                "-ss".to_string(),
                format!("{:.3}", start),
                "-to".to_string(),
                format!("{:.3}", end),
            ]);
        }

        match &job.mode {
            OutputMode::StreamCopy => {
                args.extend(["-vn".to_string(), "-c".to_string(), "copy".to_string()]);
            }
            OutputMode::Encode { codec, bitrate_kbps } => {
                args.extend([
                    "-vn".to_string(),
                    "-acodec".to_string(),
                    Self::encoder_for(codec).to_string(),
                    "-b:a".to_string(),
                    format!("{}k", bitrate_kbps),
                ]);
            }
        }

        args.push(job.output.to_string_lossy().to_string());
        args
    }
}

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn run(&self, job: &TranscodeJob) -> Result<()> {
        let args = Self::build_args(job);
        debug!("{} {}", self.program, args.join(" "));

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow!("{} timed out after {}s", self.program, self.timeout.as_secs()))?
            .map_err(|e| anyhow!("failed to spawn {}: {}", self.program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} failed for {} ({}): {}",
                self.program,
                job.output.display(),
                output.status,
                stderr.trim()
            ));
        }

        info!("🎵 Wrote {}", job.output.display());
        Ok(())
    }
}
