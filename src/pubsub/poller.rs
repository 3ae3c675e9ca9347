//! Event poller
//!
//! Two states, `idle` and `subscribed`. A timer ticks forever; in
//! `idle` a tick does nothing. In `subscribed` each tick signs an assertion,
//! trades it for a bearer token, pulls queued messages and acknowledges them
//! in one batch. A tick is skipped while the previous cycle is still running.

use arc_swap::ArcSwap;
use base64::Engine;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::client::{PubSubClient, ReceivedMessage};
use super::credentials::{sign_assertion, ServiceAccountKey};
use crate::activity::{ActivityLog, LogKind};
use crate::config::{keys, AppConfig, KeyValueStore};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::http::HttpTransport;

/// Poller settings snapshot
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub subscription_id: String,
    /// Raw service account key file text
    pub service_account_key: String,
    pub pubsub_url: String,
    pub auth_endpoint: String,
    pub poll_interval: Duration,
    pub max_messages: u32,
}

impl PollerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            subscription_id: normalize_subscription_id(&config.events.subscription_id),
            service_account_key: config.events.service_account_key.clone(),
            pubsub_url: config.endpoints.pubsub_url.trim_end_matches('/').to_string(),
            auth_endpoint: config.endpoints.pubsub_auth_endpoint.clone(),
            poll_interval: Duration::from_secs(config.events.poll_interval_secs.max(1)),
            max_messages: config.events.max_messages,
        }
    }
}

/// Keep only the id of a fully qualified subscription name
pub fn normalize_subscription_id(id: &str) -> String {
    let id = id.trim();
    if id.contains("projects/") || id.contains("subscriptions/") {
        match id.rfind('/') {
            Some(idx) => id[idx + 1..].to_string(),
            None => id.to_string(),
        }
    } else {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollerState {
    Idle,
    Subscribed,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not subscribed
    Idle,
    /// Previous cycle still running
    Busy,
    /// Messages pulled and acknowledged
    Completed(usize),
    Failed,
}

/// Clears the in-flight flag when a cycle ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct EventPoller {
    settings: ArcSwap<PollerSettings>,
    client: PubSubClient,
    subscribed: AtomicBool,
    in_flight: AtomicBool,
    store: Arc<dyn KeyValueStore>,
    log: Arc<ActivityLog>,
    events: Arc<EventBus>,
}

impl EventPoller {
    pub fn new(
        settings: PollerSettings,
        http: Arc<dyn HttpTransport>,
        store: Arc<dyn KeyValueStore>,
        log: Arc<ActivityLog>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            settings: ArcSwap::from_pointee(settings),
            client: PubSubClient::new(http),
            subscribed: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            store,
            log,
            events,
        }
    }

    /// Load the persisted subscription flag
    pub async fn restore(&self) -> Result<()> {
        let subscribed = self.store.load(keys::IS_SUBSCRIBED).await?.as_deref() == Some("true");
        self.subscribed.store(subscribed, Ordering::Release);
        Ok(())
    }

    pub fn update_settings(&self, settings: PollerSettings) {
        self.settings.store(Arc::new(settings));
    }

    pub fn settings(&self) -> Arc<PollerSettings> {
        self.settings.load_full()
    }

    pub fn state(&self) -> PollerState {
        if self.subscribed.load(Ordering::Acquire) {
            PollerState::Subscribed
        } else {
            PollerState::Idle
        }
    }

    pub async fn subscribe(&self) {
        self.log
            .push(LogKind::Action, "Subscribe", "Started listening for events.")
            .await;
        self.set_subscribed(true).await;
    }

    pub async fn unsubscribe(&self) {
        self.log
            .push(LogKind::Action, "Unsubscribe", "Stopped listening for events.")
            .await;
        self.set_subscribed(false).await;
    }

    async fn set_subscribed(&self, subscribed: bool) {
        let previous = self.subscribed.swap(subscribed, Ordering::AcqRel);
        let value = if subscribed { "true" } else { "false" };
        if let Err(e) = self.store.save(keys::IS_SUBSCRIBED, value).await {
            warn!("Failed to persist subscription flag: {}", e);
        }
        if previous != subscribed {
            self.events
                .publish(SystemEvent::SubscriptionChanged { subscribed });
        }
    }

    /// Run the timer until shutdown
    ///
    /// The period is re-read after every tick, so a configuration change
    /// takes effect from the next cycle.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut period = self.settings.load().poll_interval;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Event poller started ({}s interval)", period.as_secs());

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Event poller stopped");
                    break;
                }
                _ = interval.tick() => {
                    let poller = self.clone();
                    tokio::spawn(async move {
                        let outcome = poller.tick().await;
                        if outcome == TickOutcome::Busy {
                            debug!("Previous pull still in flight, tick skipped");
                        }
                    });

                    if let Some(next) = self.period_change(period) {
                        info!("Event poller interval changed to {}s", next.as_secs());
                        period = next;
                        interval = tokio::time::interval_at(Instant::now() + period, period);
                        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    }
                }
            }
        }
    }

    /// The configured period, when it differs from the one the timer runs at
    fn period_change(&self, running: Duration) -> Option<Duration> {
        let configured = self.settings.load().poll_interval;
        (configured != running).then_some(configured)
    }

    /// One timer tick
    pub async fn tick(&self) -> TickOutcome {
        if self.state() == PollerState::Idle {
            return TickOutcome::Idle;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return TickOutcome::Busy;
        }
        let _guard = InFlight(&self.in_flight);

        match self.cycle().await {
            Ok(count) => TickOutcome::Completed(count),
            Err(AppError::Credential(message)) => {
                let title = if message.starts_with("Can't parse") {
                    "Parsing Error!"
                } else {
                    "Authentication Error!"
                };
                self.log.push_error(LogKind::Action, title, &message).await;
                self.set_subscribed(false).await;
                TickOutcome::Failed
            }
            Err(AppError::Transport { body, .. }) => {
                self.log
                    .push_error(LogKind::Action, "Error Response", &body)
                    .await;
                TickOutcome::Failed
            }
            Err(e) => {
                self.log.report(LogKind::Action, "Error Response", &e).await;
                TickOutcome::Failed
            }
        }
    }

    async fn cycle(&self) -> Result<usize> {
        let settings = self.settings.load_full();
        let key = ServiceAccountKey::parse(&settings.service_account_key)?;

        let issued_at = chrono::Utc::now().timestamp();
        let assertion = sign_assertion(&key, &settings.auth_endpoint, issued_at)?;
        let token = self
            .client
            .authenticate(&settings.auth_endpoint, &assertion)
            .await?;

        let url = format!(
            "{}/projects/{}/subscriptions/{}",
            settings.pubsub_url,
            key.project_id,
            normalize_subscription_id(&settings.subscription_id)
        );
        let messages = self
            .client
            .pull(&url, &token, settings.max_messages)
            .await?;

        let mut ack_ids = Vec::with_capacity(messages.len());
        for received in &messages {
            self.deliver(received).await;
            ack_ids.push(received.ack_id.clone());
        }

        if !ack_ids.is_empty() {
            self.client.acknowledge(&url, &token, &ack_ids).await?;
        }
        Ok(ack_ids.len())
    }

    /// Decode, log and publish one message
    async fn deliver(&self, received: &ReceivedMessage) {
        match decode_payload(&received.message.data) {
            Ok(payload) => {
                self.log
                    .push(LogKind::Event, "Event Received", &payload)
                    .await;
                self.events.publish(SystemEvent::PubSubMessage { payload });
            }
            Err(e) => {
                self.log
                    .push_error(
                        LogKind::Event,
                        "Event Decode Error",
                        &format!("{} ({})", e, received.message.message_id),
                    )
                    .await;
            }
        }
    }
}

/// Base64 JSON payload to compact JSON text
fn decode_payload(data: &str) -> Result<String> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| AppError::BadRequest(format!("Invalid base64 payload: {}", e)))?;
    let value: serde_json::Value = serde_json::from_slice(&raw)?;
    Ok(serde_json::to_string(&value)?)
}
