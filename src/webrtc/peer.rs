//! WebRTC peer connection management

use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use super::config::WebRtcConfig;
use super::signaling::ConnectionState;
use crate::error::{AppError, Result};

/// Notifications raised by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// ICE connectivity changed
    ConnectionState(ConnectionState),
    /// First inbound media packet arrived
    FirstFrame,
    /// Text received on any data channel
    DataChannelMessage(String),
}

/// Operations the stream session drives on a peer connection
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Generate an offer and return its SDP text
    async fn create_offer(&self) -> Result<String>;

    /// Apply the generated offer as the local description
    async fn set_local_description(&self, sdp: &str) -> Result<()>;

    /// Apply the remote answer
    async fn set_remote_answer(&self, sdp: &str) -> Result<()>;

    /// Tear down the connection and its data channel
    async fn close(&self) -> Result<()>;
}

/// Builds peer connections that report to an event channel
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerTransport>>;

    /// Settings for connections created from now on
    fn update_config(&self, _config: WebRtcConfig) {}
}

/// Factory producing webrtc-rs peer connections
pub struct WebRtcPeerFactory {
    config: ArcSwap<WebRtcConfig>,
}

impl WebRtcPeerFactory {
    pub fn new(config: WebRtcConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
        }
    }

    pub fn config(&self) -> Arc<WebRtcConfig> {
        self.config.load_full()
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let peer = PeerConnection::new(&self.config.load(), events).await?;
        Ok(Arc::new(peer))
    }

    fn update_config(&self, config: WebRtcConfig) {
        debug!("Peer settings updated ({} ICE servers)", config.ice_servers.len());
        self.config.store(Arc::new(config));
    }
}

/// Receive-only peer connection with a control data channel
pub struct PeerConnection {
    pc: Arc<RTCPeerConnection>,
    data_channel: Arc<RTCDataChannel>,
}

impl PeerConnection {
    /// Create a new peer connection
    pub async fn new(
        config: &WebRtcConfig,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::Negotiation(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::Negotiation(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = config
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::Negotiation(format!("Failed to create peer connection: {}", e))
        })?;
        let pc = Arc::new(pc);

        let mut kinds = vec![];
        if config.receive_video {
            kinds.push(RTPCodecType::Video);
        }
        if config.receive_audio {
            kinds.push(RTPCodecType::Audio);
        }
        for kind in kinds {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| {
                AppError::Negotiation(format!("Failed to add {} transceiver: {}", kind, e))
            })?;
        }

        let data_channel = pc
            .create_data_channel(&config.data_channel_label, None)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create data channel: {}", e)))?;
        info!("Data channel '{}' created", config.data_channel_label);

        let peer = Self { pc, data_channel };
        peer.setup_event_handlers(events);
        Ok(peer)
    }

    /// Set up peer connection event handlers
    fn setup_event_handlers(&self, events: mpsc::UnboundedSender<PeerEvent>) {
        let state_events = events.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
                let events = state_events.clone();

                Box::pin(async move {
                    let state = match s {
                        RTCIceConnectionState::New => ConnectionState::New,
                        RTCIceConnectionState::Checking => ConnectionState::Connecting,
                        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                            ConnectionState::Connected
                        }
                        RTCIceConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCIceConnectionState::Failed => ConnectionState::Failed,
                        RTCIceConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };

                    info!("ICE connection state: {}", state);
                    let _ = events.send(PeerEvent::ConnectionState(state));
                })
            }));

        let track_events = events.clone();
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_events.clone();
            info!("Received remote {} track {}", track.kind(), track.id());

            Box::pin(async move {
                tokio::spawn(async move {
                    let mut first = true;
                    loop {
                        match track.read_rtp().await {
                            Ok(_) => {
                                if first {
                                    first = false;
                                    let _ = events.send(PeerEvent::FirstFrame);
                                }
                            }
                            Err(e) => {
                                debug!("Remote track ended: {}", e);
                                break;
                            }
                        }
                    }
                });
            })
        }));

        let local_events = events.clone();
        self.data_channel
            .on_message(Box::new(move |msg: DataChannelMessage| {
                let events = local_events.clone();
                Box::pin(async move {
                    let text = String::from_utf8_lossy(&msg.data).to_string();
                    let _ = events.send(PeerEvent::DataChannelMessage(text));
                })
            }));

        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let events = events.clone();
                Box::pin(async move {
                    info!("Remote data channel opened: {}", dc.label());
                    dc.on_message(Box::new(move |msg: DataChannelMessage| {
                        let events = events.clone();
                        Box::pin(async move {
                            let text = String::from_utf8_lossy(&msg.data).to_string();
                            let _ = events.send(PeerEvent::DataChannelMessage(text));
                        })
                    }));
                })
            }));
    }
}

#[async_trait]
impl PeerTransport for PeerConnection {
    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create offer: {}", e)))?;
        Ok(offer.sdp)
    }

    async fn set_local_description(&self, sdp: &str) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| AppError::Negotiation(format!("Invalid SDP offer: {}", e)))?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| AppError::Negotiation(format!("Invalid SDP answer: {}", e)))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to set remote description: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        if let Err(e) = self.data_channel.close().await {
            warn!("Failed to close data channel: {}", e);
        }
        self.pc
            .close()
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to close peer connection: {}", e)))
    }
}
