//! sdm-console - local console for the Smart Device Management API
//!
//! Links a Google account, lists and commands thermostats and cameras,
//! polls the Pub/Sub event feed and previews camera streams over WebRTC.

pub mod activity;
pub mod api;
pub mod auth;
pub mod config;
pub mod devices;
pub mod error;
pub mod events;
pub mod http;
pub mod pubsub;
pub mod state;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
