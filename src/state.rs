use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::activity::{ActivityLog, LogKind};
use crate::api::{ApiSettings, DeviceAccessApi};
use crate::auth::{AuthFlow, AuthSettings, Navigation, TokenSet, TokenStore};
use crate::config::{AppConfig, ConfigStore, KeyValueStore};
use crate::devices::{DeviceController, DeviceDirectory};
use crate::error::Result;
use crate::events::{EventBus, SystemEvent};
use crate::http::HttpTransport;
use crate::pubsub::{normalize_subscription_id, EventPoller, PollerSettings, PollerState};
use crate::webrtc::{PeerFactory, StreamSession, WebRtcConfig};

/// Status payload for the presentation layer
#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub signed_in: bool,
    pub tokens: TokenSet,
    pub subscription: PollerState,
    pub resource_picker_url: String,
    pub redirect_uri: String,
}

/// Application-wide state shared across handlers
///
/// Every piece of session state is an explicit owned object; handlers reach
/// them through this struct only.
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Session state persistence (tokens, flags, logs)
    pub kv: Arc<dyn KeyValueStore>,
    /// Event bus for real-time notifications
    pub events: Arc<EventBus>,
    /// Activity log, the single error-reporting sink
    pub log: Arc<ActivityLog>,
    /// OAuth tokens and sign-in flag
    pub tokens: Arc<TokenStore>,
    /// Transport shared by every remote collaborator
    pub http: Arc<dyn HttpTransport>,
    /// Device directory and command dispatch
    pub devices: Arc<DeviceController>,
    /// Live stream preview
    pub stream: Arc<StreamSession>,
    /// Pub/Sub event poller
    pub poller: Arc<EventPoller>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: ConfigStore,
        kv: Arc<dyn KeyValueStore>,
        http: Arc<dyn HttpTransport>,
        peers: Arc<dyn PeerFactory>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        let current = config.get();
        let events = Arc::new(EventBus::new());
        let log = Arc::new(ActivityLog::new(kv.clone(), events.clone()));
        let tokens = Arc::new(TokenStore::new(kv.clone(), events.clone()));

        let api = Arc::new(DeviceAccessApi::new(
            ApiSettings::from_config(&current),
            http.clone(),
            tokens.clone(),
            log.clone(),
        ));
        let stream = StreamSession::new(peers, events.clone(), log.clone());
        let devices = Arc::new(DeviceController::new(
            api,
            Arc::new(DeviceDirectory::new()),
            stream.clone(),
            log.clone(),
            events.clone(),
        ));
        let poller = Arc::new(EventPoller::new(
            PollerSettings::from_config(&current),
            http.clone(),
            kv.clone(),
            log.clone(),
            events.clone(),
        ));

        Arc::new(Self {
            config,
            kv,
            events,
            log,
            tokens,
            http,
            devices,
            stream,
            poller,
            shutdown_tx,
        })
    }

    /// Subscribe to shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Load persisted session state
    pub async fn restore(&self) -> Result<()> {
        self.tokens.restore().await?;
        self.log.restore().await?;
        self.poller.restore().await?;
        Ok(())
    }

    /// Auth flow bound to the current configuration
    pub fn auth_flow(&self) -> AuthFlow {
        AuthFlow::new(
            AuthSettings::from_config(&self.config.get()),
            self.http.clone(),
            self.tokens.clone(),
            self.log.clone(),
        )
    }

    /// Page-load sequence: token steps against persisted tokens, then a
    /// listing if signed in
    pub async fn startup(&self) {
        let flow = self.auth_flow();
        flow.capture_redirect("/", None).await;
        flow.run_token_steps().await;
        self.list_if_signed_in().await;
    }

    /// OAuth redirect: capture the code, run the token steps, list devices
    pub async fn handle_auth_callback(&self, path: &str, query: Option<&str>) -> Navigation {
        let flow = self.auth_flow();
        let navigation = flow.capture_redirect(path, query).await;
        flow.run_token_steps().await;
        self.list_if_signed_in().await;
        navigation
    }

    async fn list_if_signed_in(&self) {
        if !self.tokens.signed_in() {
            return;
        }
        // Reported to the activity log by the controller
        if let Err(e) = self.devices.list_devices().await {
            debug!("Device listing failed: {}", e);
        }
    }

    pub async fn sign_out(&self) {
        self.tokens.clear().await;
        self.devices.clear();
        self.log
            .push(LogKind::Action, "Sign Out", "Signed out and cleared all tokens.")
            .await;
        info!("Signed out");
    }

    /// Persist a new configuration and push it to the running components
    pub async fn update_config(&self, config: AppConfig) -> Result<()> {
        self.config.set(config).await?;
        self.apply_config();
        Ok(())
    }

    fn apply_config(&self) {
        let config = self.config.get();
        self.devices
            .api()
            .update_settings(ApiSettings::from_config(&config));
        self.poller
            .update_settings(PollerSettings::from_config(&config));
        self.stream
            .update_peer_config(WebRtcConfig::from(&config.webrtc));
    }

    /// Start polling, storing the subscription id in its short form
    pub async fn subscribe_events(&self) -> Result<()> {
        let configured = self.config.get().events.subscription_id.clone();
        let normalized = normalize_subscription_id(&configured);
        if normalized != configured {
            self.config
                .update(|c| c.events.subscription_id = normalized)
                .await?;
            self.apply_config();
        }
        self.poller.subscribe().await;
        Ok(())
    }

    pub async fn unsubscribe_events(&self) {
        self.poller.unsubscribe().await;
    }

    /// Events describing the current state, sent to a freshly subscribed client
    pub async fn current_events(&self) -> Vec<SystemEvent> {
        let directory = self.devices.snapshot();
        vec![
            SystemEvent::AuthStateChanged {
                signed_in: self.tokens.signed_in(),
            },
            SystemEvent::DevicesUpdated {
                count: directory.devices.len(),
                selected: directory.selected.map(|d| d.id),
            },
            SystemEvent::SubscriptionChanged {
                subscribed: self.poller.state() == PollerState::Subscribed,
            },
            SystemEvent::StreamStateChanged {
                state: self.stream.state().await.to_string(),
            },
        ]
    }

    pub fn status(&self) -> StatusSnapshot {
        let config = self.config.get();
        StatusSnapshot {
            signed_in: self.tokens.signed_in(),
            tokens: self.tokens.snapshot(),
            subscription: self.poller.state(),
            resource_picker_url: config.endpoints.resource_picker_url.clone(),
            redirect_uri: config.web.redirect_uri(),
        }
    }
}
