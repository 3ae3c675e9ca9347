//! Live stream session
//!
//! One session exists per process. It owns at most one peer connection and
//! walks it through the offer/answer handshake:
//!
//! ```text
//! uninitialized -> offer_created -> local_description_set -> awaiting_answer
//!     -> remote_description_set -> ice_connected -> playing
//! ```
//!
//! Negotiation errors move the session to `failed`, and `stop` moves it to
//! `stopped`. Neither retries: the operator stops, re-arms and initializes
//! again. Peer notifications are tagged with the generation of the peer that
//! raised them, so a torn-down connection can never move a newer session.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::analytics::{AnalyticsReport, Milestone, StreamTimeline};
use super::config::WebRtcConfig;
use super::peer::{PeerEvent, PeerFactory, PeerTransport};
use super::signaling::{ConnectionState, SessionDescription, SignalingToken, StreamBinding};
use crate::activity::{ActivityLog, LogKind};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};

/// Stream session lifecycle state
///
/// Variants are declared in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Uninitialized,
    OfferCreated,
    LocalDescriptionSet,
    AwaitingAnswer,
    RemoteDescriptionSet,
    IceConnected,
    Playing,
    Failed,
    Stopped,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StreamState::Uninitialized => "uninitialized",
            StreamState::OfferCreated => "offer_created",
            StreamState::LocalDescriptionSet => "local_description_set",
            StreamState::AwaitingAnswer => "awaiting_answer",
            StreamState::RemoteDescriptionSet => "remote_description_set",
            StreamState::IceConnected => "ice_connected",
            StreamState::Playing => "playing",
            StreamState::Failed => "failed",
            StreamState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Read-only view of the session
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub state: StreamState,
    pub initialized: bool,
    pub offer: Option<SessionDescription>,
    pub answer: Option<SessionDescription>,
    /// Device and signaling token of the live stream, if any
    pub binding: Option<StreamBinding>,
    pub analytics: AnalyticsReport,
    pub last_error: Option<String>,
}

struct SessionInner {
    state: StreamState,
    /// Latched by `initialize`, cleared only by `rearm`
    initialized: bool,
    generation: u64,
    peer: Option<Arc<dyn PeerTransport>>,
    offer: Option<SessionDescription>,
    answer: Option<SessionDescription>,
    /// Outlives peer teardown; only `stop` and `clear_token` drop it
    binding: Option<StreamBinding>,
    timeline: StreamTimeline,
    last_error: Option<String>,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            state: StreamState::Uninitialized,
            initialized: false,
            generation: 0,
            peer: None,
            offer: None,
            answer: None,
            binding: None,
            timeline: StreamTimeline::new(),
            last_error: None,
        }
    }

    fn release(&mut self) -> Option<Arc<dyn PeerTransport>> {
        self.generation += 1;
        self.offer = None;
        self.answer = None;
        self.timeline.clear();
        self.last_error = None;
        self.peer.take()
    }
}

/// The single live stream preview
pub struct StreamSession {
    factory: Arc<dyn PeerFactory>,
    inner: Mutex<SessionInner>,
    events: Arc<EventBus>,
    log: Arc<ActivityLog>,
}

impl StreamSession {
    pub fn new(
        factory: Arc<dyn PeerFactory>,
        events: Arc<EventBus>,
        log: Arc<ActivityLog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            factory,
            inner: Mutex::new(SessionInner::new()),
            events,
            log,
        })
    }

    /// Peer settings for the next `initialize`; a live peer keeps its own
    pub fn update_peer_config(&self, config: WebRtcConfig) {
        self.factory.update_config(config);
    }

    /// Create the peer connection and a local offer
    ///
    /// Returns `Ok(false)` without side effects when the session is already
    /// initialized.
    pub async fn initialize(self: &Arc<Self>) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.initialized {
            debug!("Stream session already initialized ({})", inner.state);
            return Ok(false);
        }

        inner.initialized = true;
        if let Some(stale) = inner.release() {
            close_peer(stale).await;
        }
        inner.timeline.record(Milestone::Initialized, Instant::now());
        let generation = inner.generation;

        let (tx, rx) = mpsc::unbounded_channel();
        let peer = match self.factory.create(tx).await {
            Ok(peer) => peer,
            Err(e) => return Err(self.fail(&mut inner, e).await),
        };
        inner.peer = Some(peer.clone());
        self.spawn_event_pump(generation, rx);

        let sdp = match peer.create_offer().await {
            Ok(sdp) => sdp,
            Err(e) => return Err(self.fail(&mut inner, e).await),
        };
        inner.timeline.record(Milestone::OfferCreated, Instant::now());
        inner.offer = Some(SessionDescription::offer(&sdp));
        self.transition(&mut inner, StreamState::OfferCreated);

        if let Err(e) = peer.set_local_description(&sdp).await {
            return Err(self.fail(&mut inner, e).await);
        }
        inner
            .timeline
            .record(Milestone::LocalDescriptionSet, Instant::now());
        self.transition(&mut inner, StreamState::LocalDescriptionSet);

        info!("Stream session initialized (generation {})", generation);
        Ok(true)
    }

    /// Hand out the local offer for transmission and start waiting for an answer
    pub async fn begin_offer_exchange(&self) -> Result<String> {
        let mut inner = self.inner.lock().await;
        let offer = match (&inner.state, &inner.offer) {
            (StreamState::LocalDescriptionSet | StreamState::AwaitingAnswer, Some(offer)) => {
                offer.sdp.clone()
            }
            (state, _) => {
                let error = AppError::Negotiation(format!(
                    "No local offer available (session is {})",
                    state
                ));
                return Err(self.reject(error).await);
            }
        };

        inner.timeline.record(Milestone::OfferSent, Instant::now());
        self.transition(&mut inner, StreamState::AwaitingAnswer);
        Ok(offer)
    }

    /// Apply the remote answer
    pub async fn apply_answer(&self, sdp: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let peer = match (&inner.state, inner.peer.clone()) {
            (StreamState::AwaitingAnswer, Some(peer)) => peer,
            (state, _) => {
                let error = AppError::Negotiation(format!(
                    "Not waiting for an answer (session is {})",
                    state
                ));
                return Err(self.reject(error).await);
            }
        };

        let answer = SessionDescription::answer(sdp);
        inner.timeline.record(Milestone::AnswerReceived, Instant::now());

        if let Err(e) = peer.set_remote_answer(&answer.sdp).await {
            return Err(self.fail(&mut inner, e).await);
        }
        inner.answer = Some(answer);
        inner
            .timeline
            .record(Milestone::RemoteDescriptionSet, Instant::now());
        self.transition(&mut inner, StreamState::RemoteDescriptionSet);
        Ok(())
    }

    /// Tear down the connection and clear the signaling token
    ///
    /// The initialization latch is kept.
    pub async fn stop(&self) -> Result<()> {
        let peer = {
            let mut inner = self.inner.lock().await;
            let peer = inner.release();
            inner.binding = None;
            self.transition(&mut inner, StreamState::Stopped);
            peer
        };

        if let Some(peer) = peer {
            close_peer(peer).await;
            info!("Stream session stopped");
        }
        Ok(())
    }

    /// Clear the initialization latch so the next `initialize` starts over
    pub async fn rearm(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.peer.is_some() {
            return Err(AppError::Negotiation(
                "Stop the active stream before re-arming".to_string(),
            ));
        }
        inner.initialized = false;
        self.transition(&mut inner, StreamState::Uninitialized);
        Ok(())
    }

    /// Stop, re-arm and initialize again
    pub async fn reset(self: &Arc<Self>) -> Result<bool> {
        self.stop().await?;
        self.rearm().await?;
        self.initialize().await
    }

    /// Record the signaling token a device handed out for its stream
    pub async fn bind(&self, device_id: &str, token: SignalingToken) {
        self.inner.lock().await.binding = Some(StreamBinding {
            device_id: device_id.to_string(),
            token,
        });
    }

    pub async fn clear_token(&self) {
        self.inner.lock().await.binding = None;
    }

    pub async fn binding(&self) -> Option<StreamBinding> {
        self.inner.lock().await.binding.clone()
    }

    pub async fn state(&self) -> StreamState {
        self.inner.lock().await.state
    }

    pub async fn snapshot(&self) -> StreamSnapshot {
        let inner = self.inner.lock().await;
        StreamSnapshot {
            state: inner.state,
            initialized: inner.initialized,
            offer: inner.offer.clone(),
            answer: inner.answer.clone(),
            binding: inner.binding.clone(),
            analytics: inner.timeline.report(),
            last_error: inner.last_error.clone(),
        }
    }

    fn spawn_event_pump(
        self: &Arc<Self>,
        generation: u64,
        mut rx: mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(session) = weak.upgrade() else {
                    break;
                };
                session.handle_peer_event(generation, event).await;
            }
            debug!("Peer event pump {} finished", generation);
        });
    }

    async fn handle_peer_event(&self, generation: u64, event: PeerEvent) {
        let mut inner = self.inner.lock().await;
        if generation != inner.generation || inner.peer.is_none() {
            debug!("Ignoring event from stale peer {}: {:?}", generation, event);
            return;
        }

        match event {
            PeerEvent::ConnectionState(ConnectionState::Connected) => {
                if matches!(inner.state, StreamState::Failed | StreamState::Stopped) {
                    return;
                }
                // A first frame may already have moved the session on
                if inner.timeline.record(Milestone::IceConnected, Instant::now())
                    && inner.state < StreamState::IceConnected
                {
                    self.transition(&mut inner, StreamState::IceConnected);
                }
            }
            PeerEvent::ConnectionState(ConnectionState::Failed) => {
                if inner.state != StreamState::Failed {
                    let _ = self
                        .fail(
                            &mut inner,
                            AppError::Negotiation("ICE connection failed".to_string()),
                        )
                        .await;
                }
            }
            PeerEvent::ConnectionState(state) => {
                debug!("Peer connection state: {}", state);
            }
            PeerEvent::FirstFrame => {
                if matches!(inner.state, StreamState::Failed | StreamState::Stopped) {
                    return;
                }
                if inner.timeline.record(Milestone::FirstFrame, Instant::now()) {
                    self.transition(&mut inner, StreamState::Playing);
                }
            }
            PeerEvent::DataChannelMessage(text) => {
                self.log
                    .push(LogKind::Event, "Data Channel Message", &text)
                    .await;
            }
        }
    }

    fn transition(&self, inner: &mut SessionInner, state: StreamState) {
        if inner.state != state {
            debug!("Stream session: {} -> {}", inner.state, state);
        }
        inner.state = state;
        self.events.publish(SystemEvent::StreamStateChanged {
            state: state.to_string(),
        });
        self.events.publish(SystemEvent::StreamAnalytics {
            analytics: inner.timeline.report(),
        });
    }

    /// Terminal failure of the current attempt
    async fn fail(&self, inner: &mut SessionInner, error: AppError) -> AppError {
        inner.last_error = Some(error.to_string());
        self.transition(inner, StreamState::Failed);
        self.reject(error).await
    }

    /// Report a refused operation; the session state is left as is
    async fn reject(&self, error: AppError) -> AppError {
        self.log.report(LogKind::Action, "Stream Error", &error).await;
        error
    }
}

async fn close_peer(peer: Arc<dyn PeerTransport>) {
    if let Err(e) = peer.close().await {
        warn!("Failed to close peer connection: {}", e);
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub const FAKE_OFFER: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";

    /// Peer that accepts any answer starting with `v=0`
    #[derive(Default)]
    pub struct FakePeer {
        pub remote: SyncMutex<Option<String>>,
        pub closed: AtomicUsize,
    }

    #[async_trait]
    impl PeerTransport for FakePeer {
        async fn create_offer(&self) -> Result<String> {
            Ok(FAKE_OFFER.to_string())
        }

        async fn set_local_description(&self, _sdp: &str) -> Result<()> {
            Ok(())
        }

        async fn set_remote_answer(&self, sdp: &str) -> Result<()> {
            if !sdp.starts_with("v=0") {
                return Err(AppError::Negotiation("malformed SDP".to_string()));
            }
            *self.remote.lock() = Some(sdp.to_string());
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeFactory {
        pub created: AtomicUsize,
        pub peers: SyncMutex<Vec<Arc<FakePeer>>>,
        pub senders: SyncMutex<Vec<mpsc::UnboundedSender<PeerEvent>>>,
        pub config: SyncMutex<Option<WebRtcConfig>>,
    }

    impl FakeFactory {
        pub fn last_peer(&self) -> Arc<FakePeer> {
            self.peers.lock().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl PeerFactory for FakeFactory {
        async fn create(
            &self,
            events: mpsc::UnboundedSender<PeerEvent>,
        ) -> Result<Arc<dyn PeerTransport>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            let peer = Arc::new(FakePeer::default());
            self.peers.lock().push(peer.clone());
            self.senders.lock().push(events);
            Ok(peer)
        }

        fn update_config(&self, config: WebRtcConfig) {
            *self.config.lock() = Some(config);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;
    use crate::config::MemoryStore;
    use std::sync::atomic::Ordering;

    fn setup() -> (Arc<StreamSession>, Arc<FakeFactory>, Arc<EventBus>) {
        let events = Arc::new(EventBus::new());
        let log = Arc::new(ActivityLog::new(
            Arc::new(MemoryStore::new()),
            events.clone(),
        ));
        let factory = Arc::new(FakeFactory::default());
        let session = StreamSession::new(factory.clone(), events.clone(), log);
        (session, factory, events)
    }

    async fn generation(session: &StreamSession) -> u64 {
        session.inner.lock().await.generation
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (session, factory, _) = setup();

        assert!(session.initialize().await.unwrap());
        assert!(!session.initialize().await.unwrap());

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.state, StreamState::LocalDescriptionSet);
        assert!(snapshot.analytics.initialized.millis().is_some());
    }

    #[tokio::test]
    async fn test_offer_answer_exchange() {
        let (session, factory, _) = setup();
        session.initialize().await.unwrap();

        let offer = session.begin_offer_exchange().await.unwrap();
        assert_eq!(offer, FAKE_OFFER);
        assert_eq!(session.state().await, StreamState::AwaitingAnswer);

        session.apply_answer("v=0\r\ns=answer").await.unwrap();
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.state, StreamState::RemoteDescriptionSet);
        assert_eq!(snapshot.answer.unwrap().sdp, "v=0\r\ns=answer\n");
        assert_eq!(
            factory.last_peer().remote.lock().as_deref(),
            Some("v=0\r\ns=answer\n")
        );
        assert!(snapshot.analytics.answer_received.millis().is_some());
    }

    #[tokio::test]
    async fn test_answer_with_newline_applied_unchanged() {
        let (session, factory, _) = setup();
        session.initialize().await.unwrap();
        session.begin_offer_exchange().await.unwrap();

        session.apply_answer("v=0\n").await.unwrap();
        assert_eq!(factory.last_peer().remote.lock().as_deref(), Some("v=0\n"));
    }

    #[tokio::test]
    async fn test_malformed_answer_fails_session() {
        let (session, _, _) = setup();
        session.initialize().await.unwrap();
        session.begin_offer_exchange().await.unwrap();

        let err = session.apply_answer("garbage").await.unwrap_err();
        assert!(matches!(err, AppError::Negotiation(_)));

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.state, StreamState::Failed);
        assert!(snapshot.last_error.is_some());
        assert!(snapshot.answer.is_none());

        // No automatic retry: a second answer is rejected
        assert!(session.apply_answer("v=0").await.is_err());
        assert_eq!(session.state().await, StreamState::Failed);
    }

    #[tokio::test]
    async fn test_connected_recorded_once() {
        let (session, _, _) = setup();
        session.initialize().await.unwrap();
        session.begin_offer_exchange().await.unwrap();
        session.apply_answer("v=0").await.unwrap();
        let gen = generation(&session).await;

        session
            .handle_peer_event(gen, PeerEvent::ConnectionState(ConnectionState::Connecting))
            .await;
        session
            .handle_peer_event(gen, PeerEvent::ConnectionState(ConnectionState::Connected))
            .await;
        let first = session
            .inner
            .lock()
            .await
            .timeline
            .get(Milestone::IceConnected)
            .unwrap();

        for state in [
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Connected,
        ] {
            session
                .handle_peer_event(gen, PeerEvent::ConnectionState(state))
                .await;
        }

        let inner = session.inner.lock().await;
        assert_eq!(inner.timeline.get(Milestone::IceConnected), Some(first));
        assert_eq!(inner.state, StreamState::IceConnected);
    }

    #[tokio::test]
    async fn test_first_frame_starts_playing() {
        let (session, _, events) = setup();
        let mut rx = events.subscribe();
        session.initialize().await.unwrap();
        session.begin_offer_exchange().await.unwrap();
        session.apply_answer("v=0").await.unwrap();
        let gen = generation(&session).await;

        session
            .handle_peer_event(gen, PeerEvent::ConnectionState(ConnectionState::Connected))
            .await;
        session.handle_peer_event(gen, PeerEvent::FirstFrame).await;

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.state, StreamState::Playing);
        assert!(snapshot.analytics.playback_started.millis().is_some());

        let mut saw_playing = false;
        while let Ok(event) = rx.try_recv() {
            if let SystemEvent::StreamStateChanged { state } = event {
                saw_playing |= state == "playing";
            }
        }
        assert!(saw_playing);
    }

    #[tokio::test]
    async fn test_late_connected_keeps_playing() {
        let (session, _, _) = setup();
        session.initialize().await.unwrap();
        session.begin_offer_exchange().await.unwrap();
        session.apply_answer("v=0").await.unwrap();
        let gen = generation(&session).await;

        session.handle_peer_event(gen, PeerEvent::FirstFrame).await;
        session
            .handle_peer_event(gen, PeerEvent::ConnectionState(ConnectionState::Connected))
            .await;

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.state, StreamState::Playing);
        assert!(snapshot.analytics.connected.millis().is_some());
    }

    #[tokio::test]
    async fn test_binding_survives_initialize() {
        let (session, _, _) = setup();
        session
            .bind("c1", SignalingToken::Rtsp("x1".to_string()))
            .await;
        session.initialize().await.unwrap();

        let binding = session.binding().await.unwrap();
        assert_eq!(binding.device_id, "c1");
        assert_eq!(binding.token, SignalingToken::Rtsp("x1".to_string()));

        session.clear_token().await;
        assert!(session.binding().await.is_none());
    }

    #[tokio::test]
    async fn test_stale_events_ignored() {
        let (session, _, _) = setup();
        session.initialize().await.unwrap();
        let stale = generation(&session).await;

        session.stop().await.unwrap();
        session.rearm().await.unwrap();
        session.initialize().await.unwrap();

        session
            .handle_peer_event(stale, PeerEvent::ConnectionState(ConnectionState::Connected))
            .await;
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.state, StreamState::LocalDescriptionSet);
        assert_eq!(snapshot.analytics.connected.millis(), None);
    }

    #[tokio::test]
    async fn test_stop_keeps_latch_until_rearm() {
        let (session, factory, _) = setup();
        session.initialize().await.unwrap();
        session
            .bind("c1", SignalingToken::WebRtc("media-1".to_string()))
            .await;

        session.stop().await.unwrap();
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.state, StreamState::Stopped);
        assert!(snapshot.binding.is_none());
        assert!(snapshot.offer.is_none());
        assert_eq!(factory.last_peer().closed.load(Ordering::SeqCst), 1);

        assert!(!session.initialize().await.unwrap());
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(session.begin_offer_exchange().await.is_err());

        session.rearm().await.unwrap();
        assert!(session.initialize().await.unwrap());
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reset_after_failure() {
        let (session, factory, _) = setup();
        session.initialize().await.unwrap();
        session.begin_offer_exchange().await.unwrap();
        let _ = session.apply_answer("garbage").await;

        // Rearm alone is refused while the failed peer is still held
        assert!(session.rearm().await.is_err());

        assert!(session.reset().await.unwrap());
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(session.state().await, StreamState::LocalDescriptionSet);
    }

    #[tokio::test]
    async fn test_pump_delivers_peer_events() {
        let (session, factory, _) = setup();
        session.initialize().await.unwrap();
        session.begin_offer_exchange().await.unwrap();
        session.apply_answer("v=0").await.unwrap();

        let sender = factory.senders.lock().last().cloned().unwrap();
        sender
            .send(PeerEvent::ConnectionState(ConnectionState::Connected))
            .unwrap();

        for _ in 0..50 {
            if session.state().await == StreamState::IceConnected {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(session.state().await, StreamState::IceConnected);
    }
}
