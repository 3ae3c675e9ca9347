//! WebRTC signaling types

use serde::{Deserialize, Serialize};

/// Session description kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description as exchanged with the remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: &str) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: normalize_sdp(sdp),
        }
    }

    pub fn answer(sdp: &str) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: normalize_sdp(sdp),
        }
    }
}

/// Guarantee a trailing newline; text that already ends with one is unchanged
pub fn normalize_sdp(sdp: &str) -> String {
    if sdp.ends_with('\n') {
        sdp.to_string()
    } else {
        format!("{}\n", sdp)
    }
}

/// Transport connectivity notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Live stream protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamProtocol {
    Rtsp,
    WebRtc,
}

impl std::fmt::Display for StreamProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamProtocol::Rtsp => write!(f, "RTSP"),
            StreamProtocol::WebRtc => write!(f, "WEB_RTC"),
        }
    }
}

/// Opaque value used to extend or stop a live stream
///
/// RTSP streams hand out a stream extension token, WebRTC streams a media
/// session id. Tagging keeps the two command families from being mixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalingToken {
    Rtsp(String),
    WebRtc(String),
}

impl SignalingToken {
    pub fn new(protocol: StreamProtocol, value: impl Into<String>) -> Self {
        match protocol {
            StreamProtocol::Rtsp => SignalingToken::Rtsp(value.into()),
            StreamProtocol::WebRtc => SignalingToken::WebRtc(value.into()),
        }
    }

    pub fn protocol(&self) -> StreamProtocol {
        match self {
            SignalingToken::Rtsp(_) => StreamProtocol::Rtsp,
            SignalingToken::WebRtc(_) => StreamProtocol::WebRtc,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            SignalingToken::Rtsp(v) | SignalingToken::WebRtc(v) => v,
        }
    }
}

/// A live stream: the device that serves it and the token it handed out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamBinding {
    pub device_id: String,
    pub token: SignalingToken,
}

impl StreamBinding {
    pub fn protocol(&self) -> StreamProtocol {
        self.token.protocol()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_appends_newline_once() {
        assert_eq!(normalize_sdp("v=0\r\no=- 1 1 IN IP4 0.0.0.0"), "v=0\r\no=- 1 1 IN IP4 0.0.0.0\n");
        assert_eq!(normalize_sdp("v=0\n"), "v=0\n");

        let once = normalize_sdp("v=0");
        assert_eq!(normalize_sdp(&once), once);
    }

    #[test]
    fn test_description_wire_shape() {
        let desc = SessionDescription::answer("v=0");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["type"], "answer");
        assert_eq!(json["sdp"], "v=0\n");
    }

    #[test]
    fn test_token_protocol() {
        let token = SignalingToken::new(StreamProtocol::WebRtc, "session-1");
        assert_eq!(token.protocol(), StreamProtocol::WebRtc);
        assert_eq!(token.value(), "session-1");

        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["protocol"], "WEB_RTC");
        assert_eq!(json["value"], "session-1");
    }
}
