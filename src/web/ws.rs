//! WebSocket event feed at `/api/ws`
//!
//! A client starts with no topics. Its first subscribe that leaves the filter
//! non-empty is answered with events describing the current state; live
//! events follow as they are published. Requests naming an unknown topic are
//! refused with an `error` event and change nothing.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::{SystemEvent, TopicFilter};
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

type FeedSink = SplitSink<WebSocket, Message>;

/// Requests a feed client can send
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum FeedRequest {
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    /// Resend the current state for the subscribed topics
    Snapshot,
}

/// What the connection sends back after a request
#[derive(Debug, PartialEq)]
enum FeedReply {
    Nothing,
    Snapshot,
    Rejected(String),
}

/// Per-connection feed state
#[derive(Debug, Default)]
struct FeedClient {
    filter: TopicFilter,
    snapshot_sent: bool,
}

impl FeedClient {
    fn handle(&mut self, text: &str) -> FeedReply {
        let request: FeedRequest = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(e) => return FeedReply::Rejected(format!("Invalid feed request: {}", e)),
        };

        match request {
            FeedRequest::Subscribe { topics } => match TopicFilter::parse(&topics) {
                Ok(topics) => {
                    self.filter.subscribe(topics);
                    debug!("Feed topics now {:?}", self.filter.topics());
                    if self.snapshot_sent || self.filter.is_empty() {
                        FeedReply::Nothing
                    } else {
                        self.snapshot_sent = true;
                        FeedReply::Snapshot
                    }
                }
                Err(e) => FeedReply::Rejected(e.to_string()),
            },
            FeedRequest::Unsubscribe { topics } => match TopicFilter::parse(&topics) {
                Ok(topics) => {
                    self.filter.unsubscribe(&topics);
                    debug!("Feed topics now {:?}", self.filter.topics());
                    FeedReply::Nothing
                }
                Err(e) => FeedReply::Rejected(e.to_string()),
            },
            FeedRequest::Snapshot => {
                self.snapshot_sent = true;
                FeedReply::Snapshot
            }
        }
    }

    fn wants(&self, event: &SystemEvent) -> bool {
        self.filter.matches(event)
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = state.events.subscribe();
    let mut client = FeedClient::default();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

    info!("Event feed client connected");

    loop {
        let delivered = tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => match client.handle(&text) {
                    FeedReply::Nothing => true,
                    FeedReply::Snapshot => {
                        let events = state.current_events().await;
                        send_matching(&mut sender, &client, &events).await
                    }
                    FeedReply::Rejected(message) => {
                        warn!("Feed request refused: {}", message);
                        send_event(&mut sender, &SystemEvent::Error { message }).await
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("Event feed client disconnected");
                    break;
                }
                Some(Err(e)) => {
                    warn!("Event feed receive error: {}", e);
                    break;
                }
                // Pings are answered by the socket itself
                Some(Ok(_)) => true,
            },

            event = event_rx.recv() => match event {
                Ok(event) if client.wants(&event) => send_event(&mut sender, &event).await,
                Ok(_) => true,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event feed client lagged by {} events", n);
                    let notice = SystemEvent::Error {
                        message: format!("Missed {} events, request a snapshot to resync", n),
                    };
                    send_event(&mut sender, &notice).await
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("Event bus closed");
                    break;
                }
            },

            _ = heartbeat.tick() => sender.send(Message::Ping(Vec::new())).await.is_ok(),
        };

        if !delivered {
            warn!("Event feed client unreachable, disconnecting");
            break;
        }
    }
}

/// Send the events the client listens to; false once the socket is gone
async fn send_matching(sender: &mut FeedSink, client: &FeedClient, events: &[SystemEvent]) -> bool {
    for event in events.iter().filter(|e| client.wants(e)) {
        if !send_event(sender, event).await {
            return false;
        }
    }
    true
}

async fn send_event(sender: &mut FeedSink, event: &SystemEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.event_name(), e);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_state() -> SystemEvent {
        SystemEvent::StreamStateChanged {
            state: "awaiting_answer".to_string(),
        }
    }

    fn pubsub_event() -> SystemEvent {
        SystemEvent::PubSubMessage {
            payload: "{}".to_string(),
        }
    }

    #[test]
    fn test_first_subscribe_requests_snapshot() {
        let mut client = FeedClient::default();
        assert!(!client.wants(&stream_state()));

        let reply = client.handle(r#"{"action":"subscribe","topics":["stream.*"]}"#);
        assert_eq!(reply, FeedReply::Snapshot);
        assert!(client.wants(&stream_state()));
        assert!(!client.wants(&pubsub_event()));

        let reply = client.handle(r#"{"action":"subscribe","topics":["pubsub.message"]}"#);
        assert_eq!(reply, FeedReply::Nothing);
        assert!(client.wants(&pubsub_event()));
    }

    #[test]
    fn test_empty_subscribe_waits_for_topics() {
        let mut client = FeedClient::default();
        let reply = client.handle(r#"{"action":"subscribe","topics":[]}"#);
        assert_eq!(reply, FeedReply::Nothing);

        let reply = client.handle(r#"{"action":"subscribe","topics":["*"]}"#);
        assert_eq!(reply, FeedReply::Snapshot);
    }

    #[test]
    fn test_unknown_topic_leaves_filter_unchanged() {
        let mut client = FeedClient::default();
        let reply = client.handle(r#"{"action":"subscribe","topics":["stream.*","camera.*"]}"#);
        assert!(matches!(reply, FeedReply::Rejected(ref m) if m.contains("camera.*")));
        assert!(!client.wants(&stream_state()));
        assert!(!client.snapshot_sent);
    }

    #[test]
    fn test_unsubscribe_and_resnapshot() {
        let mut client = FeedClient::default();
        client.handle(r#"{"action":"subscribe","topics":["stream.state_changed","pubsub.*"]}"#);

        let reply = client.handle(r#"{"action":"unsubscribe","topics":["stream.state_changed"]}"#);
        assert_eq!(reply, FeedReply::Nothing);
        assert!(!client.wants(&stream_state()));
        assert!(client.wants(&pubsub_event()));

        assert_eq!(client.handle(r#"{"action":"snapshot"}"#), FeedReply::Snapshot);
    }

    #[test]
    fn test_malformed_request_rejected() {
        let mut client = FeedClient::default();
        assert!(matches!(client.handle("not json"), FeedReply::Rejected(_)));
        assert!(matches!(
            client.handle(r#"{"action":"reboot"}"#),
            FeedReply::Rejected(_)
        ));
    }
}
