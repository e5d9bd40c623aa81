//! Session lifecycle: endpoint discovery, handshake and correlated calls
//!
//! ```text
//! Connecting --endpoint event--> Handshaking --initialize ok--> Ready
//!                                     |
//!                                     +--initialize error--> Failed
//! any live state --stream ended--> Disconnected
//! any state --close()--> Closed
//! ```

use markitdown_config::MarkitdownConfig;
use markitdown_core::{MarkitdownError, Result};
use serde_json::Value;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::correlator::RequestCorrelator;
use crate::transport::{preview, ChannelEvent, EventChannel, MessagePoster};
use crate::types::{
    parse_incoming, ClientCapabilities, ClientInfo, IncomingMessage, InitializeParams,
    InitializeResult, JsonRpcNotification, JsonRpcRequest,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the `endpoint` event
    Connecting,
    /// Endpoint known, `initialize` in flight
    Handshaking,
    Ready,
    /// Handshake rejected. Permanent; build a new client to retry.
    Failed(String),
    /// Event stream ended underneath the session
    Disconnected,
    Closed,
}

impl SessionState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Failed(_) | SessionState::Disconnected | SessionState::Closed
        )
    }

    /// The error a caller gets for attempting a tool call in this state.
    fn unavailable(&self) -> Option<MarkitdownError> {
        match self {
            SessionState::Ready => None,
            SessionState::Connecting => Some(MarkitdownError::NoActiveSession),
            SessionState::Handshaking => Some(MarkitdownError::SessionNotReady),
            SessionState::Failed(reason) => Some(MarkitdownError::HandshakeFailed(reason.clone())),
            SessionState::Disconnected => Some(MarkitdownError::ConnectionLost),
            SessionState::Closed => Some(MarkitdownError::Closed),
        }
    }

    /// Set once the pending map has been (or is being) drained for good.
    fn closed_reason(&self) -> Option<MarkitdownError> {
        match self {
            SessionState::Disconnected => Some(MarkitdownError::ConnectionLost),
            SessionState::Closed => Some(MarkitdownError::Closed),
            _ => None,
        }
    }
}

pub struct Session {
    config: Arc<MarkitdownConfig>,
    poster: Arc<dyn MessagePoster>,
    correlator: RequestCorrelator,
    endpoint: RwLock<Option<String>>,
    state: watch::Sender<SessionState>,
    reader: Option<JoinHandle<()>>,
    dispatcher: OnceLock<JoinHandle<()>>,
}

impl Session {
    /// Start consuming `channel`. The dispatcher only holds a weak reference,
    /// so dropping the last `Arc` tears everything down.
    pub fn start(
        config: Arc<MarkitdownConfig>,
        channel: EventChannel,
        poster: Arc<dyn MessagePoster>,
    ) -> Arc<Self> {
        let (events, reader) = channel.into_parts();
        let (state, _) = watch::channel(SessionState::Connecting);

        let session = Arc::new(Self {
            config,
            poster,
            correlator: RequestCorrelator::new(),
            endpoint: RwLock::new(None),
            state,
            reader,
            dispatcher: OnceLock::new(),
        });

        let dispatcher = tokio::spawn(run_dispatcher(Arc::downgrade(&session), events));
        let _ = session.dispatcher.set(dispatcher);
        session
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub async fn endpoint(&self) -> Option<String> {
        self.endpoint.read().await.clone()
    }

    pub async fn pending_calls(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Fails fast unless the handshake has completed.
    pub fn ensure_ready(&self) -> Result<()> {
        match self.state.borrow().unavailable() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Wait until the session is `Ready`, or report why it never will be.
    pub async fn wait_ready(&self, limit: Duration) -> Result<()> {
        let mut rx = self.state.subscribe();
        let wait = async move {
            loop {
                {
                    let state = rx.borrow_and_update();
                    match &*state {
                        SessionState::Ready => return Ok(()),
                        SessionState::Connecting | SessionState::Handshaking => {}
                        other => {
                            return Err(other.unavailable().unwrap_or(MarkitdownError::Closed));
                        }
                    }
                }
                if rx.changed().await.is_err() {
                    return Err(MarkitdownError::Closed);
                }
            }
        };

        timeout(limit, wait).await.map_err(|_| {
            MarkitdownError::HandshakeFailed(format!(
                "session not ready after {}ms",
                limit.as_millis()
            ))
        })?
    }

    /// Issue a correlated call whose params do not depend on the request id.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.call_with(method, |_| params).await
    }

    /// Issue a correlated call. `build_params` receives the allocated id.
    ///
    /// Requires an endpoint but not a finished handshake, since `initialize`
    /// itself goes through here. No request is sent without an endpoint.
    pub async fn call_with<F>(&self, method: &str, build_params: F) -> Result<Value>
    where
        F: FnOnce(u64) -> Option<Value>,
    {
        let endpoint = self
            .endpoint
            .read()
            .await
            .clone()
            .ok_or(MarkitdownError::NoActiveSession)?;

        let id = self.correlator.next_id();
        let request = JsonRpcRequest::new(id, method, build_params(id));
        let body = serde_json::to_string(&request)?;
        let url = self.config.post_url(&endpoint);

        // Dropping `call` removes the entry, including when the caller's
        // future is cancelled mid-flight.
        let mut call = self.correlator.register(id);

        // `close()` and stream loss publish their state before draining the
        // pending map, so a registration that raced them is caught here.
        if let Some(err) = self.state.borrow().closed_reason() {
            return Err(err);
        }

        debug!("Sending '{}' as request {}", method, id);
        self.poster.post(&url, body).await?;

        let timeout_ms = self.config.request_timeout_ms;
        match timeout(Duration::from_millis(timeout_ms), call.response()).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(MarkitdownError::Closed),
            Err(_) => {
                warn!("Request {} ('{}') timed out after {}ms", id, method, timeout_ms);
                Err(MarkitdownError::Timeout { id, timeout_ms })
            }
        }
    }

    /// Send a notification. Never fails: problems are logged and dropped.
    pub async fn notify_best_effort(&self, method: &str, params: Option<Value>) {
        let Some(endpoint) = self.endpoint().await else {
            warn!("Dropping notification '{}': no active session", method);
            return;
        };

        let body = match serde_json::to_string(&JsonRpcNotification::new(method, params)) {
            Ok(body) => body,
            Err(e) => {
                warn!("Dropping notification '{}': {}", method, e);
                return;
            }
        };

        if let Err(e) = self.poster.post(&self.config.post_url(&endpoint), body).await {
            warn!("Best-effort notification '{}' failed: {}", method, e);
        }
    }

    /// Tear down the channel and reject everything still in flight.
    pub async fn close(&self) {
        if let Some(reader) = &self.reader {
            reader.abort();
        }
        if let Some(dispatcher) = self.dispatcher.get() {
            dispatcher.abort();
        }

        self.state.send_replace(SessionState::Closed);
        *self.endpoint.write().await = None;

        let rejected = self.correlator.fail_all(|| MarkitdownError::Closed);
        info!("Markitdown session closed ({} pending calls rejected)", rejected);
    }

    async fn handle_event(self: &Arc<Self>, event: ChannelEvent) {
        match event {
            ChannelEvent::Endpoint(endpoint) => self.on_endpoint(endpoint).await,
            ChannelEvent::Message(data) => match parse_incoming(&data) {
                Ok(IncomingMessage::Response(response)) => {
                    self.correlator.dispatch(response);
                }
                Ok(IncomingMessage::Notification { method, params }) => {
                    debug!("Ignoring server notification '{}': {:?}", method, params);
                }
                Err(e) => {
                    warn!("Discarding malformed message ({}): {}", e, preview(&data));
                }
            },
        }
    }

    async fn on_endpoint(self: &Arc<Self>, endpoint: String) {
        let previous = self.endpoint.write().await.replace(endpoint.clone());
        if let Some(previous) = previous {
            warn!(
                "Received another endpoint event; replacing '{}' with '{}'",
                previous, endpoint
            );
            return;
        }

        info!("Discovered markitdown endpoint: {}", endpoint);
        if !self.transition(SessionState::Handshaking) {
            return;
        }

        // The initialize response arrives on the event stream, so the
        // dispatcher must keep running while the handshake waits.
        let session = Arc::clone(self);
        tokio::spawn(async move { session.handshake().await });
    }

    async fn handshake(&self) {
        let params = InitializeParams {
            protocol_version: self.config.protocol_version.clone(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: self.config.client_info.name.clone(),
                version: self.config.client_info.version.clone(),
            },
        };

        let outcome = match serde_json::to_value(params) {
            Ok(params) => self.call("initialize", Some(params)).await,
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(result) => {
                let info: InitializeResult = serde_json::from_value(result).unwrap_or_default();
                match info.server_info {
                    Some(server) => info!(
                        "Connected to markitdown server {} v{} (protocol {})",
                        server.name,
                        server.version,
                        info.protocol_version.as_deref().unwrap_or("unknown")
                    ),
                    None => info!("Markitdown session initialized"),
                }

                self.notify_best_effort("notifications/initialized", None).await;
                self.transition(SessionState::Ready);
            }
            Err(e) => {
                error!("Markitdown handshake failed: {}", e);
                self.transition(SessionState::Failed(e.to_string()));
            }
        }
    }

    async fn on_stream_ended(&self) {
        if self.transition(SessionState::Disconnected) {
            warn!("Markitdown event stream ended");
            let rejected = self.correlator.fail_all(|| MarkitdownError::ConnectionLost);
            if rejected > 0 {
                warn!("Rejected {} pending calls after losing the event stream", rejected);
            }
        }
    }

    /// Move to `next` unless already in a terminal state.
    fn transition(&self, next: SessionState) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            debug!("Session state {:?} -> {:?}", current, next);
            *current = next;
            true
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(reader) = &self.reader {
            reader.abort();
        }
        if let Some(dispatcher) = self.dispatcher.get() {
            dispatcher.abort();
        }
    }
}

async fn run_dispatcher(weak: Weak<Session>, mut events: mpsc::Receiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        let Some(session) = weak.upgrade() else {
            return;
        };
        session.handle_event(event).await;
    }

    if let Some(session) = weak.upgrade() {
        session.on_stream_ended().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockMessagePoster;

    fn test_config() -> Arc<MarkitdownConfig> {
        Arc::new(MarkitdownConfig {
            request_timeout_ms: 200,
            handshake_timeout_ms: 200,
            ..MarkitdownConfig::default()
        })
    }

    #[tokio::test]
    async fn test_call_without_endpoint_sends_nothing() {
        let mut poster = MockMessagePoster::new();
        poster.expect_post().times(0);

        let (_tx, rx) = mpsc::channel(8);
        let session = Session::start(test_config(), EventChannel::from_receiver(rx), Arc::new(poster));

        let err = session.call("tools/list", None).await.unwrap_err();
        assert!(matches!(err, MarkitdownError::NoActiveSession));
        assert!(matches!(session.ensure_ready(), Err(MarkitdownError::NoActiveSession)));
        assert_eq!(session.pending_calls().await, 0);
    }

    #[tokio::test]
    async fn test_post_failure_fails_handshake_without_leaking() {
        let mut poster = MockMessagePoster::new();
        poster
            .expect_post()
            .times(1)
            .returning(|_, _| Err(MarkitdownError::Transport("connection refused".into())));

        let (tx, rx) = mpsc::channel(8);
        let session = Session::start(test_config(), EventChannel::from_receiver(rx), Arc::new(poster));
        tx.send(ChannelEvent::Endpoint("/messages?sessionId=abc".into()))
            .await
            .unwrap();

        let err = session.wait_ready(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, MarkitdownError::HandshakeFailed(ref m) if m.contains("connection refused")));
        assert!(matches!(session.state(), SessionState::Failed(_)));
        assert_eq!(session.pending_calls().await, 0);
        assert_eq!(session.endpoint().await.as_deref(), Some("/messages?sessionId=abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_handshake_times_out_and_frees_entry() {
        let mut poster = MockMessagePoster::new();
        poster.expect_post().returning(|_, _| Ok(()));

        let (tx, rx) = mpsc::channel(8);
        let session = Session::start(test_config(), EventChannel::from_receiver(rx), Arc::new(poster));
        tx.send(ChannelEvent::Endpoint("/s".into())).await.unwrap();

        let err = session.wait_ready(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, MarkitdownError::HandshakeFailed(ref m) if m.contains("timed out")));
        assert_eq!(session.pending_calls().await, 0);
    }

    #[tokio::test]
    async fn test_stream_end_marks_disconnected() {
        let poster = MockMessagePoster::new();
        let (tx, rx) = mpsc::channel(8);
        let session = Session::start(test_config(), EventChannel::from_receiver(rx), Arc::new(poster));

        drop(tx);
        let err = session.wait_ready(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, MarkitdownError::ConnectionLost));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_call_racing_close_is_rejected_without_posting() {
        let mut poster = MockMessagePoster::new();
        poster.expect_post().times(0);

        let (_tx, rx) = mpsc::channel(8);
        let session = Session::start(test_config(), EventChannel::from_receiver(rx), Arc::new(poster));

        // Endpoint read already succeeded when close() lands
        *session.endpoint.write().await = Some("/s".into());
        session.state.send_replace(SessionState::Closed);

        let err = session.call("tools/list", None).await.unwrap_err();
        assert!(matches!(err, MarkitdownError::Closed));
        assert_eq!(session.pending_calls().await, 0);

        session.state.send_replace(SessionState::Disconnected);
        let err = session.call("tools/list", None).await.unwrap_err();
        assert!(matches!(err, MarkitdownError::ConnectionLost));
        assert_eq!(session.pending_calls().await, 0);
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let poster = MockMessagePoster::new();
        let (_tx, rx) = mpsc::channel(8);
        let session = Session::start(test_config(), EventChannel::from_receiver(rx), Arc::new(poster));

        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.transition(SessionState::Ready));
        assert!(matches!(session.ensure_ready(), Err(MarkitdownError::Closed)));
    }
}
