//! HTTP leg: POSTs JSON-RPC envelopes to the relay

use async_trait::async_trait;
use markitdown_core::{MarkitdownError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{preview, MessagePoster};

/// Build the shared HTTP client with the configured default headers.
///
/// No overall request timeout is set here since the SSE subscription is
/// long-lived; POSTs carry their own deadline.
pub fn build_http_client(headers: &HashMap<String, String>) -> Result<reqwest::Client> {
    let mut default_headers = HeaderMap::new();
    for (key, value) in headers {
        let header_name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| MarkitdownError::ConfigError(format!("Invalid header name '{}': {}", key, e)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| MarkitdownError::ConfigError(format!("Invalid header value for '{}': {}", key, e)))?;
        default_headers.insert(header_name, header_value);
    }

    reqwest::Client::builder()
        .default_headers(default_headers)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| MarkitdownError::Transport(format!("Failed to build HTTP client: {}", e)))
}

#[derive(Debug, Clone)]
pub struct HttpPoster {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpPoster {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl MessagePoster for HttpPoster {
    async fn post(&self, url: &str, body: String) -> Result<()> {
        debug!("POST {}: {}", url, preview(&body));

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| MarkitdownError::Transport(format!("Failed to send HTTP request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MarkitdownError::Transport(format!(
                "HTTP request failed with status {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_header_name_is_rejected() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let err = build_http_client(&headers).unwrap_err();
        assert!(matches!(err, MarkitdownError::ConfigError(_)));
    }

    #[test]
    fn test_valid_headers_build() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());
        assert!(build_http_client(&headers).is_ok());
    }
}
