//! Transport layer for the markitdown relay
//!
//! Traffic is split across two legs:
//! - an SSE subscription delivering `endpoint` and `message` events
//! - HTTP POSTs carrying JSON-RPC envelopes to the session endpoint

use async_trait::async_trait;
use markitdown_core::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub mod http;
pub mod sse;

pub use http::{build_http_client, HttpPoster};
pub use sse::SseEventChannel;

/// Events forwarded from the push channel to the session dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Session-specific path to POST requests to
    Endpoint(String),
    /// Raw JSON payload of a `message` event
    Message(String),
}

/// Outbound leg: delivers one serialized envelope to a URL
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagePoster: Send + Sync {
    async fn post(&self, url: &str, body: String) -> Result<()>;
}

/// Inbound leg: a stream of push events plus the task producing them, if any.
///
/// Dropping the receiver or aborting the reader closes the connection.
pub struct EventChannel {
    events: mpsc::Receiver<ChannelEvent>,
    reader: Option<JoinHandle<()>>,
}

impl EventChannel {
    pub(crate) fn new(events: mpsc::Receiver<ChannelEvent>, reader: JoinHandle<()>) -> Self {
        Self {
            events,
            reader: Some(reader),
        }
    }

    /// Wrap a receiver fed by something other than an SSE connection.
    pub fn from_receiver(events: mpsc::Receiver<ChannelEvent>) -> Self {
        Self { events, reader: None }
    }

    pub(crate) fn into_parts(self) -> (mpsc::Receiver<ChannelEvent>, Option<JoinHandle<()>>) {
        (self.events, self.reader)
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("has_reader", &self.reader.is_some())
            .finish()
    }
}

/// Shorten a payload for log output without splitting a character.
pub(crate) fn preview(data: &str) -> String {
    const LIMIT: usize = 100;
    match data.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &data[..cut]),
        None => data.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(150);
        let shortened = preview(&long);
        assert!(shortened.ends_with("..."));
        assert_eq!(shortened.chars().count(), 103);
        assert_eq!(preview("short"), "short");
    }
}
