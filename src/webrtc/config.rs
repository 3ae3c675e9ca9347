//! WebRTC configuration

use serde::{Deserialize, Serialize};

use crate::config::WebRtcSettings;

/// Peer connection configuration for the stream preview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcConfig {
    /// ICE server URLs
    pub ice_servers: Vec<String>,
    /// Label of the outgoing data channel
    pub data_channel_label: String,
    /// Offer to receive one video stream
    pub receive_video: bool,
    /// Offer to receive one audio stream
    pub receive_audio: bool,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            // No ICE servers: host candidates only, the camera is expected on the local network
            ice_servers: vec![],
            data_channel_label: "dataSendChannel".to_string(),
            receive_video: true,
            receive_audio: true,
        }
    }
}

impl From<&WebRtcSettings> for WebRtcConfig {
    fn from(settings: &WebRtcSettings) -> Self {
        Self {
            ice_servers: settings.ice_servers.clone(),
            data_channel_label: settings.data_channel_label.clone(),
            ..Default::default()
        }
    }
}
