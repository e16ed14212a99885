use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::COOKIE;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::cipher::{find_player_script_url, CipheredUrl, SignatureCipher};
use super::{AudioTier, FetchRequest, FetchResult, RAW_STEM};
use crate::config::{DirectStreamConfig, HttpConfig};
use crate::extractor::{DownloadProgress, ProgressCallback, TransferStatus};
use crate::http::{build_client, send_json};
use crate::session::SessionArtifact;
use crate::source::SourceRef;
use crate::throttle::{RateLimiter, RetryPolicy};

/// Streams the best audio-only format straight from the platform's player manifest.
///
/// Only the `s` signature is deciphered. The `n` throttling parameter is
/// passed through as served, so the CDN may throttle or reject the stream;
/// a failed or stalled download falls through to the extraction tiers.
pub struct DirectStreamTier {
    client: Client,
    config: DirectStreamConfig,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    /// Last recovered cipher, keyed by player script URL
    cipher_cache: Mutex<Option<(String, SignatureCipher)>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
    playability_status: Option<PlayabilityStatus>,
    streaming_data: Option<StreamingData>,
}

#[derive(Debug, Deserialize)]
struct PlayabilityStatus {
    status: String,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamingData {
    #[serde(default)]
    adaptive_formats: Vec<StreamFormat>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFormat {
    pub itag: u32,
    pub mime_type: String,
    #[serde(default)]
    pub bitrate: u64,
    pub url: Option<String>,
    pub signature_cipher: Option<String>,
    pub content_length: Option<String>,
}

impl StreamFormat {
    /// Container extension from the MIME type
    pub fn extension(&self) -> &'static str {
        let essence = self.mime_type.split(';').next().unwrap_or("").trim();
        match essence {
            "audio/mp4" => "m4a",
            "audio/webm" => "webm",
            "audio/mpeg" => "mp3",
            "audio/ogg" => "ogg",
            _ => "audio",
        }
    }

    fn expected_size(&self) -> Option<u64> {
        self.content_length.as_deref().and_then(|len| len.parse().ok())
    }
}

/// Audio-only entries, highest bitrate first
pub fn audio_candidates(formats: &[StreamFormat]) -> Vec<StreamFormat> {
    let mut audio: Vec<StreamFormat> = formats
        .iter()
        .filter(|f| f.mime_type.starts_with("audio/"))
        .filter(|f| f.url.is_some() || f.signature_cipher.is_some())
        .cloned()
        .collect();
    audio.sort_by(|a, b| b.bitrate.cmp(&a.bitrate));
    audio
}

impl DirectStreamTier {
    pub fn new(
        config: &DirectStreamConfig,
        http: &HttpConfig,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(http, config.timeout())?,
            config: config.clone(),
            limiter,
            retry,
            cipher_cache: Mutex::new(None),
        })
    }

    async fn manifest(&self, source: &SourceRef, session: Option<&SessionArtifact>) -> Result<Vec<StreamFormat>> {
        let body = json!({
            "videoId": source.content_id(),
            "context": {
                "client": {
                    "clientName": self.config.client_name,
                    "clientVersion": self.config.client_version,
                    "hl": "en",
                }
            },
            "contentCheckOk": true,
            "racyCheckOk": true,
        });
        let cookies = session.map(|s| s.cookie_header()).filter(|h| !h.is_empty());

        self.limiter.wait().await;
        let response: PlayerResponse = send_json("player manifest", self.retry, || {
            let request = self.client.post(&self.config.player_endpoint).json(&body);
            match &cookies {
                Some(header) => request.header(COOKIE, header.as_str()),
                None => request,
            }
        })
        .await?;

        if let Some(status) = &response.playability_status {
            if status.status != "OK" {
                return Err(anyhow!(
                    "not playable: {} ({})",
                    status.status,
                    status.reason.as_deref().unwrap_or("no reason given")
                ));
            }
        }

        let formats = response
            .streaming_data
            .map(|data| data.adaptive_formats)
            .unwrap_or_default();
        Ok(formats)
    }

    /// Recover the signature routine, reusing it while the player script is unchanged
    async fn cipher_for(&self, source: &SourceRef) -> Result<SignatureCipher> {
        self.limiter.wait().await;
        let page = self.client.get(source.watch_url()).send().await?.error_for_status()?.text().await?;
        let script_url =
            find_player_script_url(&page).ok_or_else(|| anyhow!("player script not referenced by watch page"))?;

        let mut cache = self.cipher_cache.lock().await;
        if let Some((url, cipher)) = cache.as_ref() {
            if *url == script_url {
                return Ok(cipher.clone());
            }
        }

        debug!("Loading player script {}", script_url);
        let js = self.client.get(&script_url).send().await?.error_for_status()?.text().await?;
        let cipher = SignatureCipher::from_player_js(&js)?;
        *cache = Some((script_url, cipher.clone()));
        Ok(cipher)
    }

    async fn playable_url(
        &self,
        format: &StreamFormat,
        source: &SourceRef,
        cipher: &mut Option<SignatureCipher>,
    ) -> Result<String> {
        if let Some(url) = &format.url {
            return Ok(url.clone());
        }

        let raw = format
            .signature_cipher
            .as_deref()
            .ok_or_else(|| anyhow!("format {} has neither url nor cipher", format.itag))?;
        let ciphered = CipheredUrl::parse(raw)?;

        if cipher.is_none() {
            *cipher = Some(self.cipher_for(source).await?);
        }
        let routine = cipher.as_ref().ok_or_else(|| anyhow!("signature routine unavailable"))?;
        Ok(routine.resolve(&ciphered))
    }

    async fn stream_to_file(
        &self,
        url: &str,
        dest: &Path,
        expected: Option<u64>,
        progress: ProgressCallback<'_>,
    ) -> Result<u64> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let total = response.content_length().or(expected);

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("stream interrupted")?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress(DownloadProgress {
                bytes_downloaded: downloaded,
                total_bytes: total,
                status: TransferStatus::Downloading,
            });
        }
        file.flush().await?;

        if downloaded == 0 {
            return Err(anyhow!("empty stream"));
        }
        progress(DownloadProgress {
            bytes_downloaded: downloaded,
            total_bytes: Some(downloaded),
            status: TransferStatus::Finished,
        });
        Ok(downloaded)
    }
}

#[async_trait]
impl AudioTier for DirectStreamTier {
    fn name(&self) -> &str {
        "direct-stream"
    }

    async fn attempt(&self, request: &FetchRequest<'_>, progress: ProgressCallback<'_>) -> Result<FetchResult> {
        if !self.config.enabled {
            return Err(anyhow!("direct streams disabled"));
        }

        let formats = self.manifest(request.source, request.session).await?;
        let candidates = audio_candidates(&formats);
        if candidates.is_empty() {
            return Err(anyhow!("manifest has no audio-only formats"));
        }

        let mut cipher = None;
        let mut chosen = None;
        for format in &candidates {
            match self.playable_url(format, request.source, &mut cipher).await {
                Ok(url) => {
                    chosen = Some((format, url));
                    break;
                }
                Err(e) => debug!("Skipping itag {}: {}", format.itag, e),
            }
        }
        let (format, url) = chosen.ok_or_else(|| anyhow!("no audio format could be resolved"))?;

        info!("⬇️ Streaming itag {} ({} bps, {})", format.itag, format.bitrate, format.mime_type);
        let dest = request.dest_dir.join(format!("{}.{}", RAW_STEM, format.extension()));
        let bytes = self.stream_to_file(&url, &dest, format.expected_size(), progress).await?;
        debug!("Streamed {} bytes to {}", bytes, dest.display());

        FetchResult::from_path(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;

    fn format(itag: u32, mime: &str, bitrate: u64, url: Option<&str>) -> StreamFormat {
        StreamFormat {
            itag,
            mime_type: mime.to_string(),
            bitrate,
            url: url.map(str::to_string),
            signature_cipher: None,
            content_length: None,
        }
    }

    #[test]
    fn test_audio_candidates_sorted_by_bitrate() {
        let formats = vec![
            format(137, "video/mp4; codecs=\"avc1\"", 4_000_000, Some("v")),
            format(140, "audio/mp4; codecs=\"mp4a.40.2\"", 130_000, Some("a")),
            format(251, "audio/webm; codecs=\"opus\"", 160_000, Some("b")),
            format(249, "audio/webm; codecs=\"opus\"", 50_000, None),
        ];

        let candidates = audio_candidates(&formats);
        let itags: Vec<u32> = candidates.iter().map(|f| f.itag).collect();
        assert_eq!(itags, vec![251, 140]);
        assert_eq!(candidates[0].extension(), "webm");
        assert_eq!(candidates[1].extension(), "m4a");
    }

    #[test]
    fn test_player_response_parsing() {
        let json = r#"{
            "playabilityStatus": {"status": "OK"},
            "streamingData": {"adaptiveFormats": [
                {"itag": 140, "mimeType": "audio/mp4; codecs=\"mp4a.40.2\"", "bitrate": 130000,
                 "signatureCipher": "s=abc&sp=sig&url=https%3A%2F%2Fcdn.example%2Fx", "contentLength": "1024"}
            ]}
        }"#;
        let response: PlayerResponse = serde_json::from_str(json).unwrap();
        let formats = response.streaming_data.unwrap().adaptive_formats;
        assert_eq!(formats[0].expected_size(), Some(1024));
        assert!(formats[0].signature_cipher.is_some());
    }

    #[tokio::test]
    async fn test_disabled_tier_fails_fast() {
        let config = Config::default();
        let mut direct = config.direct.clone();
        direct.enabled = false;
        let tier = DirectStreamTier::new(
            &direct,
            &config.http,
            Arc::new(RateLimiter::new(Duration::ZERO)),
            RetryPolicy::new(0, Duration::ZERO),
        )
        .unwrap();

        let source = SourceRef::parse("https://youtu.be/AAAAAAAAAAA").unwrap();
        let metadata = crate::metadata::MediaMetadata {
            title: "t".to_string(),
            duration_seconds: 1.0,
            chapters: vec![],
        };
        let dir = tempfile::TempDir::new().unwrap();
        let request = FetchRequest { source: &source, metadata: &metadata, session: None, dest_dir: dir.path() };

        let err = tier.attempt(&request, &|_: DownloadProgress| {}).await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }
}
