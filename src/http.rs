//! Shared HTTP plumbing for the serving endpoint.
//!
//! Retry strategy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry with backoff
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - timeout or connection failure → fail immediately; the caller decides
//!   whether the turn is retried
//! - Backoff: 1s, 2s, 4s, … (capped at 2^5)

use std::time::Duration;
use tracing::warn;

use crate::error::{RagError, Result};

pub(crate) fn build_client(endpoint: &str, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RagError::EndpointUnavailable {
            endpoint: endpoint.to_string(),
            reason: format!("cannot build HTTP client: {}", e),
        })
}

/// Send the request produced by `make_request` until it succeeds, fails
/// permanently, or `max_retries` retries are used up.
pub(crate) async fn send_with_retry<F>(
    endpoint: &str,
    timeout: Duration,
    max_retries: u32,
    make_request: F,
) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let response = make_request()
            .send()
            .await
            .map_err(|e| RagError::from_transport(endpoint, timeout, e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = RagError::EndpointRejected {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        };
        if status.as_u16() == 429 || status.is_server_error() {
            warn!(endpoint, status = status.as_u16(), attempt, "retryable endpoint error");
            last_err = Some(err);
            continue;
        }
        return Err(err);
    }

    Err(last_err.unwrap_or_else(|| RagError::EndpointUnavailable {
        endpoint: endpoint.to_string(),
        reason: "retries exhausted".to_string(),
    }))
}

/// Check that the serving endpoint at `base_url` answers at all.
pub async fn server_version(base_url: &str, timeout: Duration) -> Result<String> {
    let endpoint = format!("{}/api/version", base_url.trim_end_matches('/'));
    let client = build_client(&endpoint, timeout)?;
    let response = send_with_retry(&endpoint, timeout, 0, || client.get(&endpoint)).await?;
    let json: serde_json::Value = response
        .json()
        .await
        .map_err(|e| RagError::from_transport(&endpoint, timeout, e))?;
    Ok(json
        .get("version")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string())
}
