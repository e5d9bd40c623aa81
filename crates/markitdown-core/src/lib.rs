use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarkitdownError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("No active session: the markitdown endpoint has not been received yet")]
    NoActiveSession,

    #[error("Session is not ready: handshake still in progress")]
    SessionNotReady,

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// Error object returned by the upstream server. Displays the server's
    /// message unchanged.
    #[error("{message}")]
    Rpc { code: Option<i64>, message: String },

    #[error("Tool '{tool}' failed: {message}")]
    ToolError { tool: String, message: String },

    #[error("Request {id} timed out after {timeout_ms}ms")]
    Timeout { id: u64, timeout_ms: u64 },

    #[error("Client closed")]
    Closed,

    #[error("Event stream connection lost")]
    ConnectionLost,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl MarkitdownError {
    /// True for failures that a fresh client could plausibly recover from.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MarkitdownError::Transport(_)
                | MarkitdownError::Timeout { .. }
                | MarkitdownError::ConnectionLost
        )
    }
}

pub type Result<T> = std::result::Result<T, MarkitdownError>;
