//! Live stream preview over WebRTC
//!
//! The camera side is reached through the device API: the local offer is
//! carried out-of-band by a `GenerateWebRtcStream` command and the answer comes
//! back in its response. This module only owns the local end.
//!
//! ```text
//! StreamSession ── PeerFactory ──> PeerConnection (recvonly audio + video,
//!      │                                control data channel)
//!      │                                     │
//!      │<──────── PeerEvent (ICE state, first frame, messages)
//!      v
//! StreamTimeline -> AnalyticsReport -> EventBus
//! ```

pub mod analytics;
pub mod config;
pub mod peer;
pub mod session;
pub mod signaling;

pub use analytics::{AnalyticsReport, Milestone, Span, StreamTimeline};
pub use config::WebRtcConfig;
pub use peer::{PeerConnection, PeerEvent, PeerFactory, PeerTransport, WebRtcPeerFactory};
pub use session::{StreamSession, StreamSnapshot, StreamState};
pub use signaling::{
    normalize_sdp, ConnectionState, SdpType, SessionDescription, SignalingToken, StreamBinding,
    StreamProtocol,
};
