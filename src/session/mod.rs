/// Session harvesting and caching
///
/// A session is the cookie set a real browser ends up with after the
/// platform's client-side challenge has run. Later tiers hand it to the
/// extraction tool to reduce anti-bot friction.

pub mod browser;
pub mod provider;

pub use browser::{BrowserAutomation, HarvestRequest, HeadlessBrowser};
pub use provider::SessionProvider;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One browser cookie
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    /// Unix expiry; zero or negative means a browser-session cookie
    #[serde(default)]
    pub expires: f64,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

impl Cookie {
    /// Render as one line of a Netscape cookie jar
    pub fn to_netscape_line(&self) -> String {
        let include_subdomains = if self.domain.starts_with('.') { "TRUE" } else { "FALSE" };
        let secure = if self.secure { "TRUE" } else { "FALSE" };
        let expires = if self.expires > 0.0 { self.expires as i64 } else { 0 };
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.domain, include_subdomains, self.path, secure, expires, self.name, self.value
        )
    }

    /// Parse one Netscape cookie jar line; comments and blanks yield `None`
    pub fn from_netscape_line(line: &str) -> Option<Self> {
        // "#HttpOnly_" prefixed lines are real cookies
        let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
        if line.trim().is_empty() || line.starts_with('#') {
            return None;
        }

        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        if fields.len() < 7 {
            return None;
        }

        Some(Self {
            domain: fields[0].to_string(),
            path: fields[2].to_string(),
            secure: fields[3].eq_ignore_ascii_case("TRUE"),
            expires: fields[4].parse().unwrap_or(0.0),
            name: fields[5].to_string(),
            value: fields[6..].join("\t"),
        })
    }
}

/// Immutable authentication material with a fixed time-to-live.
///
/// Refreshing replaces the artifact wholesale; nothing mutates it in place.
#[derive(Debug, Clone)]
pub struct SessionArtifact {
    cookies: Vec<Cookie>,
    created_at: DateTime<Utc>,
    ttl: Duration,
    cookie_file: Option<PathBuf>,
}

impl SessionArtifact {
    pub fn new(cookies: Vec<Cookie>, ttl: Duration) -> Self {
        Self {
            cookies,
            created_at: Utc::now(),
            ttl,
            cookie_file: None,
        }
    }

    /// Same artifact, recorded as persisted at `path`
    pub fn persisted_at(self, path: PathBuf) -> Self {
        Self {
            cookie_file: Some(path),
            ..self
        }
    }

    /// Same artifact with an explicit creation time
    pub fn created(self, created_at: DateTime<Utc>) -> Self {
        Self { created_at, ..self }
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// Value of the named cookie, if the session carries it
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        self.created_at + ttl
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Netscape cookie file the extraction tool can read
    pub fn cookie_file(&self) -> Option<&Path> {
        self.cookie_file.as_deref()
    }

    /// `Cookie` header value for direct HTTP requests
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Render the whole jar in Netscape format
    pub fn to_netscape(&self) -> String {
        let mut content = String::from("# Netscape HTTP Cookie File\n");
        for cookie in &self.cookies {
            content.push_str(&cookie.to_netscape_line());
            content.push('\n');
        }
        content
    }

    /// Parse a Netscape cookie jar
    pub fn from_netscape(content: &str, ttl: Duration) -> Result<Self> {
        let cookies: Vec<Cookie> = content.lines().filter_map(Cookie::from_netscape_line).collect();
        if cookies.is_empty() {
            return Err(anyhow!("cookie jar contains no cookies"));
        }
        Ok(Self::new(cookies, ttl))
    }
}
