//! SSE leg: owns the push-event connection to the relay

use futures::StreamExt;
use markitdown_core::{MarkitdownError, Result};
use reqwest_eventsource::{Event, EventSource};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{preview, ChannelEvent, EventChannel};

/// Opens the SSE subscription and forwards events to the dispatcher.
///
/// There is no reconnection: the first stream error ends the channel.
pub struct SseEventChannel;

impl SseEventChannel {
    pub fn connect(client: &reqwest::Client, sse_url: &str, buffer: usize) -> Result<EventChannel> {
        if !sse_url.starts_with("http://") && !sse_url.starts_with("https://") {
            return Err(MarkitdownError::ConfigError(
                "SSE URL must start with http:// or https://".into(),
            ));
        }

        info!("Subscribing to markitdown events at {}", sse_url);

        let event_source = EventSource::new(client.get(sse_url))
            .map_err(|e| MarkitdownError::Transport(format!("Failed to create EventSource: {}", e)))?;

        let (tx, rx) = mpsc::channel(buffer);
        let reader = tokio::spawn(pump_events(event_source, tx, sse_url.to_string()));

        Ok(EventChannel::new(rx, reader))
    }
}

async fn pump_events(mut source: EventSource, tx: mpsc::Sender<ChannelEvent>, url: String) {
    while let Some(event) = source.next().await {
        match event {
            Ok(Event::Open) => {
                info!("SSE connection opened");
            }
            Ok(Event::Message(msg)) => {
                debug!("SSE Event - Type: '{}', Data: {}", msg.event, preview(&msg.data));

                let forwarded = match classify(&msg.event, msg.data) {
                    Some(event) => event,
                    None => {
                        debug!("Ignoring SSE event of type '{}'", msg.event);
                        continue;
                    }
                };

                if tx.send(forwarded).await.is_err() {
                    debug!("Dispatcher dropped, stopping SSE listener");
                    break;
                }
            }
            Err(e) => {
                error!("SSE stream error on {}: {}", url, e);
                break;
            }
        }
    }

    source.close();
    info!("SSE event listener ended");
}

fn classify(event_type: &str, data: String) -> Option<ChannelEvent> {
    match event_type {
        "endpoint" => Some(ChannelEvent::Endpoint(data)),
        "message" | "" => Some(ChannelEvent::Message(data)),
        _ => None,
    }
}
