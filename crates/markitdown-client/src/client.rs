//! Conversion client for the markitdown relay

use markitdown_config::MarkitdownConfig;
use markitdown_core::{MarkitdownError, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::session::{Session, SessionState};
use crate::transport::{build_http_client, EventChannel, HttpPoster, MessagePoster, SseEventChannel};
use crate::types::{ListToolsResult, McpTool, ToolCallResult};

pub const CONVERT_TOOL: &str = "convert_to_markdown";

/// Client for the upstream markitdown tool.
///
/// Cheap to share behind an `Arc`; calls may run concurrently and are
/// matched to responses by id.
pub struct ConversionClient {
    config: Arc<MarkitdownConfig>,
    session: Arc<Session>,
}

impl ConversionClient {
    /// Subscribe to the relay's event stream and start the session.
    ///
    /// Returns once the subscription is spawned; use
    /// [`wait_ready`](Self::wait_ready) to wait for the handshake.
    pub async fn connect(config: MarkitdownConfig) -> Result<Self> {
        let http = build_http_client(&config.headers)?;
        let channel = SseEventChannel::connect(&http, &config.sse_url(), config.event_buffer)?;
        let poster = HttpPoster::new(http, Duration::from_millis(config.request_timeout_ms));

        Ok(Self::with_channel(config, channel, Arc::new(poster)))
    }

    /// Build a client over an arbitrary event channel and poster.
    pub fn with_channel(
        config: MarkitdownConfig,
        channel: EventChannel,
        poster: Arc<dyn MessagePoster>,
    ) -> Self {
        let config = Arc::new(config);
        let session = Session::start(Arc::clone(&config), channel, poster);
        Self { config, session }
    }

    /// Wait for the handshake, bounded by `handshake_timeout_ms`.
    pub async fn wait_ready(&self) -> Result<()> {
        self.session
            .wait_ready(Duration::from_millis(self.config.handshake_timeout_ms))
            .await
    }

    /// Convert the document at `uri` to markdown.
    ///
    /// Fails immediately, without touching the network, when the session
    /// has not finished its handshake.
    pub async fn convert_to_markdown(&self, uri: &str) -> Result<String> {
        self.session.ensure_ready()?;
        info!("Converting {} to markdown", uri);

        let result = self
            .session
            .call_with("tools/call", |id| {
                Some(json!({
                    "name": CONVERT_TOOL,
                    "arguments": { "uri": uri },
                    "_meta": { "progressToken": id }
                }))
            })
            .await?;

        let markdown = markdown_from_result(result)?;
        debug!("Converted {} ({} bytes of markdown)", uri, markdown.len());
        Ok(markdown)
    }

    /// Raw correlated call against the ready session.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.session.ensure_ready()?;
        self.session.call(method, params).await
    }

    /// Tools advertised by the upstream server.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let result = self.call("tools/list", None).await?;
        let listed: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| MarkitdownError::Protocol(format!("Malformed tools/list result: {}", e)))?;

        info!("Upstream advertises {} tools", listed.tools.len());
        Ok(listed.tools)
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub async fn endpoint(&self) -> Option<String> {
        self.session.endpoint().await
    }

    pub async fn pending_calls(&self) -> usize {
        self.session.pending_calls().await
    }

    /// Close the event channel and reject all in-flight calls. Idempotent.
    pub async fn close(&self) {
        self.session.close().await;
    }
}

/// Accepts either a bare markdown string or an MCP tool result.
fn markdown_from_result(result: Value) -> Result<String> {
    match result {
        Value::String(markdown) => Ok(markdown),
        Value::Object(_) => {
            let parsed: ToolCallResult = serde_json::from_value(result).map_err(|e| {
                MarkitdownError::Protocol(format!("Malformed {} result: {}", CONVERT_TOOL, e))
            })?;

            if parsed.is_error.unwrap_or(false) {
                return Err(MarkitdownError::ToolError {
                    tool: CONVERT_TOOL.to_string(),
                    message: parsed.text(),
                });
            }
            Ok(parsed.text())
        }
        other => Err(MarkitdownError::Protocol(format!(
            "Unexpected {} result: {}",
            CONVERT_TOOL, other
        ))),
    }
}
