//! Client for the markitdown document-conversion tool behind the Learnify
//! backend relay.
//!
//! The relay exposes a JSON-RPC session over two legs: an SSE stream that
//! announces the session `endpoint` and carries every response as a
//! `message` event, and HTTP POSTs that carry requests to that endpoint.
//! Responses are correlated to calls by numeric id.

pub mod client;
pub mod correlator;
pub mod session;
pub mod transport;
pub mod types;

pub use client::{ConversionClient, CONVERT_TOOL};
pub use correlator::RequestCorrelator;
pub use session::{Session, SessionState};
pub use transport::{ChannelEvent, EventChannel, HttpPoster, MessagePoster, SseEventChannel};
pub use types::{JsonRpcError, JsonRpcResponse, McpTool};
