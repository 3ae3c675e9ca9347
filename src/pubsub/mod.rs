//! Cloud Pub/Sub event feed

pub mod client;
pub mod credentials;
pub mod poller;

pub use client::{PubSubClient, ReceivedMessage};
pub use credentials::{sign_assertion, AssertionClaims, ServiceAccountKey};
pub use poller::{normalize_subscription_id, EventPoller, PollerSettings, PollerState, TickOutcome};
