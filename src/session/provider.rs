/// Process-wide session cache with single-flight refresh
use anyhow::{anyhow, Result as AnyResult};
use base64::{engine::general_purpose, Engine as _};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::browser::{BrowserAutomation, HarvestRequest};
use super::SessionArtifact;
use crate::config::{HttpConfig, SessionConfig};
use crate::error::{Result, SplitterError};
use crate::source::SourceRef;

/// Obtains and caches the session artifact shared by all workers
pub struct SessionProvider {
    config: SessionConfig,
    user_agent: String,
    browser: Arc<dyn BrowserAutomation>,
    cache: RwLock<Option<Arc<SessionArtifact>>>,
    /// Serializes refreshes so concurrent callers never race on the cache slot
    refresh_lock: Mutex<()>,
}

impl SessionProvider {
    pub fn new(config: SessionConfig, http: &HttpConfig, browser: Arc<dyn BrowserAutomation>) -> Self {
        Self {
            config,
            user_agent: http.user_agent.clone(),
            browser,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Create a provider and install the seeded cookie jar, if one is configured
    pub async fn with_seed(
        config: SessionConfig,
        http: &HttpConfig,
        browser: Arc<dyn BrowserAutomation>,
    ) -> Self {
        let provider = Self::new(config, http, browser);

        if let Some(encoded) = provider.config.seed_cookies_b64.clone() {
            match provider.install_seed(&encoded).await {
                Ok(count) => info!("🍪 Seeded session with {} cookies", count),
                Err(e) => warn!("Ignoring seeded cookies: {}", e),
            }
        }

        provider
    }

    async fn install_seed(&self, encoded: &str) -> AnyResult<usize> {
        let decoded = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| anyhow!("invalid base64: {}", e))?;
        let content = String::from_utf8(decoded)?;
        let artifact = SessionArtifact::from_netscape(&content, self.config.ttl())?;
        let count = artifact.cookies().len();

        let artifact = self.persist(artifact).await?;
        *self.cache.write().await = Some(Arc::new(artifact));
        Ok(count)
    }

    /// Cached session if still valid, otherwise one refresh attempt.
    ///
    /// Fails with `SessionUnavailable` when the refresh fails or times out;
    /// callers continue with anonymous tiers.
    pub async fn get_valid_session(&self, hint: Option<&SourceRef>) -> Result<Arc<SessionArtifact>> {
        if let Some(session) = self.cached().await {
            debug!("Using cached session created at {}", session.created_at());
            return Ok(session);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(session) = self.cached().await {
            debug!("Session refreshed by a concurrent caller");
            return Ok(session);
        }

        match self.refresh(hint).await {
            Ok(session) => Ok(session),
            Err(e) => {
                warn!("⚠️ Session refresh failed: {}", e);
                Err(SplitterError::SessionUnavailable(e.to_string()))
            }
        }
    }

    /// Currently cached, unexpired session
    pub async fn cached(&self) -> Option<Arc<SessionArtifact>> {
        let cache = self.cache.read().await;
        cache.as_ref().filter(|s| !s.is_expired()).cloned()
    }

    async fn refresh(&self, hint: Option<&SourceRef>) -> AnyResult<Arc<SessionArtifact>> {
        let request = HarvestRequest {
            landing_url: self.config.landing_url.clone(),
            content_url: hint.map(|s| s.watch_url()),
            user_agent: self.user_agent.clone(),
        };

        info!("🔄 Refreshing session via headless browser");
        let timeout = self.config.timeout();
        let cookies = tokio::time::timeout(timeout, self.browser.harvest(&request))
            .await
            .map_err(|_| anyhow!("session refresh timed out after {}s", timeout.as_secs()))??;

        if cookies.is_empty() {
            return Err(anyhow!("browser returned no cookies"));
        }

        let artifact = self.persist(SessionArtifact::new(cookies, self.config.ttl())).await?;
        let artifact = Arc::new(artifact);
        *self.cache.write().await = Some(Arc::clone(&artifact));

        info!("✅ Session refreshed with {} cookies", artifact.cookies().len());
        Ok(artifact)
    }

    /// Write the jar for the extraction tool; a temporary sibling plus rename
    /// keeps concurrent readers from seeing a half-written file
    async fn persist(&self, artifact: SessionArtifact) -> AnyResult<SessionArtifact> {
        let path = self.config.cookie_file.clone();
        write_atomically(&path, artifact.to_netscape().as_bytes()).await?;
        debug!("💾 Session written to {}", path.display());
        Ok(artifact.persisted_at(path))
    }
}

async fn write_atomically(path: &Path, content: &[u8]) -> AnyResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
