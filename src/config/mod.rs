//! Configuration and persisted session state

pub mod kv;
mod schema;
mod store;

pub use kv::{keys, KeyValueStore, MemoryStore};
pub use schema::{
    AppConfig, CredentialsConfig, EndpointsConfig, EventsConfig, WebConfig, WebRtcSettings,
};
pub use store::ConfigStore;
