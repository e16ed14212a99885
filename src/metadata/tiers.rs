use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use super::{MediaMetadata, MetadataTier};
use crate::chapters::chapters_from_description;
use crate::config::{HttpConfig, MetadataConfig};
use crate::extractor::{ExtractionOptions, ExtractionTool};
use crate::http::{build_client, send_json};
use crate::session::SessionArtifact;
use crate::source::SourceRef;
use crate::throttle::{RateLimiter, RetryPolicy};

/// Structured metadata API keyed by content id
pub struct DataApiTier {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    snippet: Snippet,
    #[serde(rename = "contentDetails")]
    content_details: ContentDetails,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: String,
}

impl DataApiTier {
    pub fn new(config: &MetadataConfig, http: &HttpConfig, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: build_client(http, config.request_timeout())?,
            endpoint: config.api_endpoint.clone(),
            api_key: config.api_key.clone(),
            retry,
        })
    }

    fn metadata_from(response: VideoListResponse, content_id: &str) -> Result<MediaMetadata> {
        let item = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no video found for id {}", content_id))?;

        let duration = parse_iso8601_duration(&item.content_details.duration)
            .ok_or_else(|| anyhow!("unparseable duration '{}'", item.content_details.duration))?;
        if duration <= 0.0 {
            return Err(anyhow!("zero duration for id {}", content_id));
        }

        Ok(MediaMetadata {
            title: item.snippet.title,
            duration_seconds: duration,
            chapters: chapters_from_description(&item.snippet.description, duration),
        })
    }
}

#[async_trait]
impl MetadataTier for DataApiTier {
    fn name(&self) -> &str {
        "data-api"
    }

    async fn attempt(&self, source: &SourceRef, _session: Option<&SessionArtifact>) -> Result<MediaMetadata> {
        let api_key = self.api_key.as_deref().ok_or_else(|| anyhow!("no API key configured"))?;
        let id = source.content_id();

        let response: VideoListResponse = send_json("data-api", self.retry, || {
            self.client
                .get(&self.endpoint)
                .query(&[("part", "snippet,contentDetails"), ("id", id), ("key", api_key)])
        })
        .await?;

        Self::metadata_from(response, id)
    }
}

/// Parse an ISO 8601 duration such as `PT1H2M3S` into seconds
pub fn parse_iso8601_duration(text: &str) -> Option<f64> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$")
            .expect("valid duration regex")
    });

    let caps = re.captures(text.trim())?;
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok()).unwrap_or(0.0);
    Some(part(1) * 86_400.0 + part(2) * 3_600.0 + part(3) * 60.0 + part(4))
}

/// Player data via the extraction tool, with or without the session
pub struct ExtractionMetadataTier {
    tool: Arc<dyn ExtractionTool>,
    options: ExtractionOptions,
    authenticated: bool,
}

impl ExtractionMetadataTier {
    pub fn authenticated(tool: Arc<dyn ExtractionTool>, options: ExtractionOptions) -> Self {
        Self {
            tool,
            options,
            authenticated: true,
        }
    }

    pub fn anonymous(tool: Arc<dyn ExtractionTool>, options: ExtractionOptions) -> Self {
        Self {
            tool,
            options,
            authenticated: false,
        }
    }
}

#[async_trait]
impl MetadataTier for ExtractionMetadataTier {
    fn name(&self) -> &str {
        if self.authenticated {
            "extraction-authenticated"
        } else {
            "extraction-anonymous"
        }
    }

    async fn attempt(&self, source: &SourceRef, session: Option<&SessionArtifact>) -> Result<MediaMetadata> {
        let cookie_file = if self.authenticated {
            let file = session
                .and_then(|s| s.cookie_file())
                .ok_or_else(|| anyhow!("no session available"))?;
            Some(file.to_path_buf())
        } else {
            None
        };

        let options = self.options.clone().with_cookie_file(cookie_file);
        self.tool.extract_info(&source.watch_url(), &options).await
    }
}

/// Third-party mirror API (Invidious-compatible `/api/v1/videos/<id>`)
pub struct MirrorMetadataTier {
    client: Client,
    endpoint: Option<String>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MirrorVideo {
    title: String,
    length_seconds: f64,
    #[serde(default)]
    description: String,
}

impl MirrorMetadataTier {
    pub fn new(
        config: &MetadataConfig,
        http: &HttpConfig,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(http, config.request_timeout())?,
            endpoint: config.mirror_endpoint.clone(),
            limiter,
            retry,
        })
    }
}

#[async_trait]
impl MetadataTier for MirrorMetadataTier {
    fn name(&self) -> &str {
        "mirror"
    }

    async fn attempt(&self, source: &SourceRef, _session: Option<&SessionArtifact>) -> Result<MediaMetadata> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| anyhow!("no mirror configured"))?;
        let url = format!("{}/api/v1/videos/{}", endpoint.trim_end_matches('/'), source.content_id());
        debug!("Querying mirror {}", url);

        self.limiter.wait().await;
        let video: MirrorVideo = send_json("mirror", self.retry, || self.client.get(&url))
            .await
            .context("mirror lookup failed")?;

        if video.length_seconds <= 0.0 {
            return Err(anyhow!("mirror reported no duration"));
        }

        Ok(MediaMetadata {
            chapters: chapters_from_description(&video.description, video.length_seconds),
            title: video.title,
            duration_seconds: video.length_seconds,
        })
    }
}
