use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::throttle::RetryPolicy;

/// Configuration for the chapter splitter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Output location and audio format
    pub output: OutputConfig,

    /// Headers sent with every platform request
    pub http: HttpConfig,

    /// Session harvesting settings
    pub session: SessionConfig,

    /// Metadata API and mirror settings
    pub metadata: MetadataConfig,

    /// Extraction tool settings
    pub extraction: ExtractionConfig,

    /// Direct stream download settings
    pub direct: DirectStreamConfig,

    /// Transcoder settings
    pub transcoder: TranscoderConfig,

    /// Task registry settings
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Base directory for per-task output folders
    pub base_dir: PathBuf,

    /// Codec every fetched file is normalized to
    pub target_codec: String,

    /// Bitrate used when normalizing
    pub target_bitrate_kbps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub user_agent: String,
    pub accept_language: String,
    pub referer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Lifetime of a harvested session in seconds
    pub ttl_seconds: u64,

    /// Netscape cookie file handed to the extraction tool
    pub cookie_file: PathBuf,

    /// Headless browser helper; prints the harvested cookies as JSON on stdout
    pub browser_command: String,

    /// Page loaded to let the anti-bot challenge run
    pub landing_url: String,

    /// Upper bound for one automation run
    pub timeout_seconds: u64,

    /// Base64 encoded Netscape cookie file used as the initial session
    pub seed_cookies_b64: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Structured metadata API endpoint
    pub api_endpoint: String,

    /// Key for the structured metadata API
    pub api_key: Option<String>,

    /// Base URL of the mirror service
    pub mirror_endpoint: Option<String>,

    /// HTTP request timeout in seconds
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Extraction tool executable
    pub program: String,

    /// Format selector, compact codecs first
    pub format: String,

    /// Player client the tool should impersonate
    pub player_client: String,

    /// Bounded transfer rate, tool syntax (e.g. "2M")
    pub rate_limit: String,

    /// Sleep between requests in seconds
    pub sleep_interval_seconds: u64,

    /// Retries on rate-limit responses
    pub max_retries: u32,

    /// Initial backoff between retries in milliseconds
    pub retry_backoff_ms: u64,

    /// Upper bound for one tool invocation in seconds
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectStreamConfig {
    /// Enable the direct stream-URL tier
    pub enabled: bool,

    /// Platform-internal player endpoint returning the stream manifest
    pub player_endpoint: String,

    /// Client identity sent with the manifest request
    pub client_name: String,
    pub client_version: String,

    /// Upper bound for manifest fetch plus download in seconds
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Transcoder executable
    pub program: String,

    /// Upper bound for one invocation in seconds
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How long terminal tasks stay queryable
    pub retention_seconds: u64,
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl MetadataConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl ExtractionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_backoff_ms))
    }
}

impl DirectStreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl TranscoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl RegistryConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let config_paths = [
            "chapter-splitter.toml",
            "config/chapter-splitter.toml",
            "/etc/chapter-splitter/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config.with_env_overrides());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Load configuration from an explicit file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read config {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&config_str)?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config.with_env_overrides())
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        Ok(Self::default().with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(output_dir) = std::env::var("CHAPTER_SPLITTER_OUTPUT_DIR") {
            self.output.base_dir = PathBuf::from(output_dir);
        }

        if let Ok(api_key) = std::env::var("CHAPTER_SPLITTER_API_KEY") {
            self.metadata.api_key = Some(api_key);
        }

        if let Ok(mirror) = std::env::var("CHAPTER_SPLITTER_MIRROR") {
            self.metadata.mirror_endpoint = Some(mirror);
        }

        // YT_COOKIES_B64 is accepted for deployments that already export it
        if let Ok(cookies) = std::env::var("CHAPTER_SPLITTER_COOKIES_B64")
            .or_else(|_| std::env::var("YT_COOKIES_B64"))
        {
            if !cookies.trim().is_empty() {
                self.session.seed_cookies_b64 = Some(cookies);
            }
        }

        if let Ok(retention) = std::env::var("CHAPTER_SPLITTER_RETENTION_SECONDS") {
            self.registry.retention_seconds = retention.parse().unwrap_or(3600);
        }

        self
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.output.target_codec.trim().is_empty() {
            return Err(anyhow!("target_codec must not be empty"));
        }

        if self.output.target_bitrate_kbps == 0 {
            return Err(anyhow!("target_bitrate_kbps must be greater than 0"));
        }

        if self.session.ttl_seconds == 0 {
            return Err(anyhow!("session ttl_seconds must be greater than 0"));
        }

        // Every external call carries a bounded timeout
        let timeouts = [
            ("session.timeout_seconds", self.session.timeout_seconds),
            ("metadata.request_timeout_seconds", self.metadata.request_timeout_seconds),
            ("extraction.timeout_seconds", self.extraction.timeout_seconds),
            ("direct.timeout_seconds", self.direct.timeout_seconds),
            ("transcoder.timeout_seconds", self.transcoder.timeout_seconds),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(anyhow!("{} must be greater than 0", name));
            }
        }

        if let Some(mirror) = &self.metadata.mirror_endpoint {
            url::Url::parse(mirror).map_err(|e| anyhow!("Invalid mirror endpoint {}: {}", mirror, e))?;
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Chapter Splitter Configuration:\n\
            - Output Directory: {}\n\
            - Output Format: {} @ {}kbps\n\
            - Metadata API Key: {}\n\
            - Mirror: {}\n\
            - Extraction Tool: {} (rate limit {}, {} retries)\n\
            - Direct Streams: {}\n\
            - Seeded Session: {}\n\
            - Task Retention: {}s",
            self.output.base_dir.display(),
            self.output.target_codec,
            self.output.target_bitrate_kbps,
            if self.metadata.api_key.is_some() { "configured" } else { "none" },
            self.metadata.mirror_endpoint.as_deref().unwrap_or("none"),
            self.extraction.program,
            self.extraction.rate_limit,
            self.extraction.max_retries,
            self.direct.enabled,
            self.session.seed_cookies_b64.is_some(),
            self.registry.retention_seconds,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output: OutputConfig {
                base_dir: PathBuf::from("./downloads"),
                target_codec: "mp3".to_string(),
                target_bitrate_kbps: 192,
            },
            http: HttpConfig {
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36".to_string(),
                accept_language: "en-US,en;q=0.9".to_string(),
                referer: "https://www.youtube.com".to_string(),
            },
            session: SessionConfig {
                ttl_seconds: 1800, // 30 minutes
                cookie_file: std::env::temp_dir().join("chapter-splitter").join("cookies.txt"),
                browser_command: "chapter-splitter-browser".to_string(),
                landing_url: "https://www.youtube.com".to_string(),
                timeout_seconds: 60,
                seed_cookies_b64: None,
            },
            metadata: MetadataConfig {
                api_endpoint: "https://www.googleapis.com/youtube/v3/videos".to_string(),
                api_key: None,
                mirror_endpoint: None,
                request_timeout_seconds: 30,
            },
            extraction: ExtractionConfig {
                program: "yt-dlp".to_string(),
                format: "bestaudio[ext=m4a]/bestaudio[ext=webm]/bestaudio/best".to_string(),
                player_client: "android".to_string(),
                rate_limit: "2M".to_string(),
                sleep_interval_seconds: 3,
                max_retries: 3,
                retry_backoff_ms: 2000,
                timeout_seconds: 1800, // 30 minutes for long videos
            },
            direct: DirectStreamConfig {
                enabled: true,
                player_endpoint: "https://www.youtube.com/youtubei/v1/player".to_string(),
                client_name: "ANDROID".to_string(),
                client_version: "19.09.37".to_string(),
                timeout_seconds: 900,
            },
            transcoder: TranscoderConfig {
                program: "ffmpeg".to_string(),
                timeout_seconds: 900,
            },
            registry: RegistryConfig {
                retention_seconds: 3600, // 1 hour after terminal state
            },
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.base_dir = dir;
        self
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.config.metadata.api_key = Some(api_key);
        self
    }

    pub fn with_mirror(mut self, endpoint: String) -> Self {
        self.config.metadata.mirror_endpoint = Some(endpoint);
        self
    }

    pub fn with_cookie_file(mut self, path: PathBuf) -> Self {
        self.config.session.cookie_file = path;
        self
    }

    pub fn with_retention_seconds(mut self, seconds: u64) -> Self {
        self.config.registry.retention_seconds = seconds;
        self
    }

    pub fn enable_direct_streams(mut self, enable: bool) -> Self {
        self.config.direct.enabled = enable;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
