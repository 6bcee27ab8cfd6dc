//! HTTP client for downloading guide assets and room data.
//!
//! Thin wrapper over `reqwest` that captures the response content type
//! alongside the body and retries politely when the asset host rate-limits.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client};
use tracing::warn;

use super::FetchError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// Generous enough for audio tracks on a slow museum WiFi while still
/// failing fast enough for the gateway's fallback tiers.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// A fetched response body with the content type the server reported.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl FetchedBody {
    pub fn is_json(&self) -> bool {
        self.content_type.starts_with("application/json")
    }
}

/// HTTP client for the guide's asset host.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct NetClient {
    client: Client,
}

impl NetClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self { client })
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit
    /// (should retry), or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            // Rate limited - signal to retry
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::from_status(status, &body).into())
        }
    }

    /// GET a URL and return its body bytes with the reported content type.
    ///
    /// Retries on 429 with exponential backoff; the reported content type
    /// falls back to an extension-based guess when the header is absent.
    pub async fn get_bytes(&self, url: &str) -> Result<FetchedBody> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .with_context(|| format!("Failed to send GET request to {}", url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let content_type = response
                        .headers()
                        .get(header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| content_type_for_path(url).to_string());

                    let bytes = response
                        .bytes()
                        .await
                        .with_context(|| format!("Failed to read response body from {}", url))?;

                    return Ok(FetchedBody {
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
                None => {
                    // Rate limited
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(FetchError::RateLimited.into());
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    /// GET a URL and return its body as UTF-8 text.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let body = self.get_bytes(url).await?;
        String::from_utf8(body.bytes)
            .with_context(|| format!("Response from {} is not valid UTF-8", url))
    }
}

/// Best-effort content type from a URL's file extension.
///
/// Used when the server omits the header and for offline placeholders.
pub fn content_type_for_path(path: &str) -> &'static str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    match path.rsplit('.').next() {
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("json") => "application/json",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("woff2") => "font/woff2",
        Some("html") => "text/html",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for_path() {
        assert_eq!(content_type_for_path("/audio/fr.room1.mp3"), "audio/mpeg");
        assert_eq!(content_type_for_path("/images/lilies.jpg"), "image/jpeg");
        assert_eq!(content_type_for_path("/data/fr_rooms.json"), "application/json");
        assert_eq!(content_type_for_path("/static/chunk.js?v=3"), "application/javascript");
        assert_eq!(content_type_for_path("/whatever"), "application/octet-stream");
    }

    #[test]
    fn test_fetched_body_is_json() {
        let body = FetchedBody {
            content_type: "application/json; charset=utf-8".to_string(),
            bytes: b"{}".to_vec(),
        };
        assert!(body.is_json());

        let audio = FetchedBody {
            content_type: "audio/mpeg".to_string(),
            bytes: vec![],
        };
        assert!(!audio.is_json());
    }
}
