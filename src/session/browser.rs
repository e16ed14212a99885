/// Headless browser automation seam
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::Cookie;

/// Pages a harvest should load, in order
#[derive(Debug, Clone)]
pub struct HarvestRequest {
    /// Landing page that triggers the client-side challenge
    pub landing_url: String,
    /// Content page, loaded after the landing page when present
    pub content_url: Option<String>,
    /// User agent the browser should present
    pub user_agent: String,
}

impl HarvestRequest {
    pub fn urls(&self) -> Vec<&str> {
        let mut urls = vec![self.landing_url.as_str()];
        if let Some(content) = &self.content_url {
            urls.push(content.as_str());
        }
        urls
    }
}

/// Loads pages in a real browser engine and returns the resulting cookies
#[async_trait]
pub trait BrowserAutomation: Send + Sync {
    async fn harvest(&self, request: &HarvestRequest) -> Result<Vec<Cookie>>;
}

/// Drives an external headless-browser helper.
///
/// The helper receives `--user-agent <ua>` followed by the URLs to load and
/// prints the final cookie jar as a JSON array on stdout.
#[derive(Debug, Clone)]
pub struct HeadlessBrowser {
    command: String,
    timeout: Duration,
}

impl HeadlessBrowser {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl BrowserAutomation for HeadlessBrowser {
    async fn harvest(&self, request: &HarvestRequest) -> Result<Vec<Cookie>> {
        info!("🌐 Launching headless browser for {}", request.landing_url);

        let mut cmd = Command::new(&self.command);
        cmd.arg("--user-agent")
            .arg(&request.user_agent)
            .args(request.urls())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow!("browser automation timed out after {}s", self.timeout.as_secs()))?
            .map_err(|e| anyhow!("failed to spawn {}: {}", self.command, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "browser automation exited with {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        let cookies: Vec<Cookie> = serde_json::from_slice(&output.stdout)
            .map_err(|e| anyhow!("browser automation returned invalid cookie JSON: {}", e))?;
        debug!("Browser harvested {} cookies", cookies.len());

        Ok(cookies)
    }
}
