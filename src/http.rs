//! Shared HTTP client setup for platform, API and mirror requests

use anyhow::{anyhow, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, REFERER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::config::HttpConfig;
use crate::throttle::{retry_rate_limited, RetryPolicy};

/// Client carrying the common header set and a bounded timeout
pub fn build_client(http: &HttpConfig, timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_str(&http.accept_language)?);
    headers.insert(REFERER, HeaderValue::from_str(&http.referer)?);

    let client = Client::builder()
        .timeout(timeout)
        .user_agent(http.user_agent.clone())
        .default_headers(headers)
        .build()?;
    Ok(client)
}

/// Send a request and decode a JSON body, retrying rate-limit responses.
///
/// `make_request` is called once per attempt since builders are single-use.
pub async fn send_json<T, F>(operation: &str, policy: RetryPolicy, make_request: F) -> Result<T>
where
    T: DeserializeOwned,
    F: Fn() -> RequestBuilder,
{
    let make_request = &make_request;
    retry_rate_limited(operation, policy, || async move {
        let response = make_request().send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(anyhow!("HTTP 429 Too Many Requests from {}", operation));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(anyhow!("HTTP error {} from {}: {}", status, operation, snippet));
        }

        debug!("{} responded {}", operation, status);
        Ok(response.json::<T>().await?)
    })
    .await
}
