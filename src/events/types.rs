//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use super::topics::EventArea;
use crate::activity::LogEntry;
use crate::webrtc::AnalyticsReport;

/// System event enumeration
///
/// Serialized with an `event` tag and a `data` payload:
/// ```json
/// {
///   "event": "stream.state_changed",
///   "data": { "state": "awaiting_answer" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    /// Sign-in flag changed
    #[serde(rename = "auth.state_changed")]
    AuthStateChanged { signed_in: bool },

    /// Device directory was rebuilt or the selection changed
    #[serde(rename = "devices.updated")]
    DevicesUpdated {
        count: usize,
        selected: Option<String>,
    },

    /// Stream session moved to a new lifecycle state
    #[serde(rename = "stream.state_changed")]
    StreamStateChanged { state: String },

    /// Stream timing analytics recomputed
    #[serde(rename = "stream.analytics")]
    StreamAnalytics { analytics: AnalyticsReport },

    /// Pub/Sub subscription flag changed
    #[serde(rename = "pubsub.subscription_changed")]
    SubscriptionChanged { subscribed: bool },

    /// Decoded Pub/Sub message payload
    #[serde(rename = "pubsub.message")]
    PubSubMessage { payload: String },

    /// Activity log entry appended
    #[serde(rename = "log.appended")]
    LogAppended { entry: LogEntry },

    /// Generic error notification
    #[serde(rename = "error")]
    Error { message: String },
}

impl SystemEvent {
    /// Every event name, in declaration order
    pub const NAMES: [&'static str; 8] = [
        "auth.state_changed",
        "devices.updated",
        "stream.state_changed",
        "stream.analytics",
        "pubsub.subscription_changed",
        "pubsub.message",
        "log.appended",
        "error",
    ];

    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::AuthStateChanged { .. } => "auth.state_changed",
            Self::DevicesUpdated { .. } => "devices.updated",
            Self::StreamStateChanged { .. } => "stream.state_changed",
            Self::StreamAnalytics { .. } => "stream.analytics",
            Self::SubscriptionChanged { .. } => "pubsub.subscription_changed",
            Self::PubSubMessage { .. } => "pubsub.message",
            Self::LogAppended { .. } => "log.appended",
            Self::Error { .. } => "error",
        }
    }

    pub fn area(&self) -> EventArea {
        match self {
            Self::AuthStateChanged { .. } => EventArea::Auth,
            Self::DevicesUpdated { .. } => EventArea::Devices,
            Self::StreamStateChanged { .. } | Self::StreamAnalytics { .. } => EventArea::Stream,
            Self::SubscriptionChanged { .. } | Self::PubSubMessage { .. } => EventArea::PubSub,
            Self::LogAppended { .. } => EventArea::Log,
            Self::Error { .. } => EventArea::Error,
        }
    }
}
