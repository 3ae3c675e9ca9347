//! Device command orchestration
//!
//! Issues Device Access calls for user intents and routes each response to
//! the directory or the stream session.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::commands::{
    answer_from_results, fan_command, setpoint_command, stream_argument, stream_command,
    thermostat_mode_command, token_from_results, CommandCall, FanToggle, StreamAction,
    ThermostatMode,
};
use super::directory::{DeviceDirectory, DirectorySnapshot, ListingSummary};
use super::model::{Device, TemperatureScale};
use crate::activity::{ActivityLog, LogKind};
use crate::api::{DeviceAccessApi, DeviceCommand};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::webrtc::{SignalingToken, StreamProtocol, StreamSession};

/// Setpoint request as entered by the user
#[derive(Debug, Clone, Deserialize)]
pub struct SetpointRequest {
    pub mode: String,
    #[serde(default)]
    pub heat: Option<f64>,
    #[serde(default)]
    pub cool: Option<f64>,
    /// Unit of `heat`/`cool`; defaults to the thermostat's display scale
    #[serde(default)]
    pub unit: Option<TemperatureScale>,
}

/// Result of a stream command
#[derive(Debug, Clone, Serialize)]
pub struct StreamOutcome {
    pub token: Option<SignalingToken>,
    /// Answer was applied to the stream session
    pub answer_applied: bool,
}

pub struct DeviceController {
    api: Arc<DeviceAccessApi>,
    directory: Arc<DeviceDirectory>,
    session: Arc<StreamSession>,
    log: Arc<ActivityLog>,
    events: Arc<EventBus>,
}

impl DeviceController {
    pub fn new(
        api: Arc<DeviceAccessApi>,
        directory: Arc<DeviceDirectory>,
        session: Arc<StreamSession>,
        log: Arc<ActivityLog>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            api,
            directory,
            session,
            log,
            events,
        }
    }

    pub fn api(&self) -> &Arc<DeviceAccessApi> {
        &self.api
    }

    pub fn directory(&self) -> &DeviceDirectory {
        &self.directory
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        self.directory.snapshot()
    }

    /// Rebuild the directory from a listing call
    pub async fn list_devices(&self) -> Result<ListingSummary> {
        let data = match self.api.list_devices().await {
            Ok(data) => data,
            Err(e) => return self.fail("List Devices", e).await,
        };
        let data = self.require_object(data).await?;

        let summary = match self.directory.replace_from_listing(&data) {
            Ok(summary) => summary,
            Err(e) => {
                self.publish_directory();
                return self.fail("No Devices!", e).await;
            }
        };
        self.publish_directory();

        if summary.webrtc_capable {
            // Failures are reported by the session itself
            if let Err(e) = self.session.initialize().await {
                debug!("Stream session not armed: {}", e);
            }
        }
        Ok(summary)
    }

    pub async fn list_structures(&self) -> Result<Value> {
        match self.api.list_structures().await {
            Ok(data) => self.require_object(data).await,
            Err(e) => self.fail("List Structures", e).await,
        }
    }

    pub async fn select(&self, device_id: &str) -> Result<Device> {
        let device = match self.directory.select(device_id) {
            Ok(device) => device,
            Err(e) => return self.fail("Select Device", e).await,
        };
        self.log
            .push(
                LogKind::Action,
                "Select Device",
                &format!("Device Selection changed to {}", device.name),
            )
            .await;
        self.publish_directory();
        Ok(device)
    }

    /// Drop every device (sign-out)
    pub fn clear(&self) {
        self.directory.clear();
        self.publish_directory();
    }

    /// Fan timer; `toggle` defaults to the recorded toggle label
    pub async fn set_fan(&self, device_id: &str, toggle: Option<&str>) -> Result<String> {
        let label = toggle
            .map(str::to_string)
            .unwrap_or_else(|| self.directory.fan_label());
        let command = match FanToggle::from_label(&label) {
            Ok(toggle) => fan_command(toggle),
            Err(e) => return self.fail("Error", e).await,
        };
        self.execute(device_id, CommandCall::FanMode, &command).await?;
        Ok(self.directory.toggle_fan_label())
    }

    pub async fn set_thermostat_mode(&self, device_id: &str, mode: &str) -> Result<()> {
        let mode = match mode.parse::<ThermostatMode>() {
            Ok(mode) => mode,
            Err(e) => return self.fail("Invalid Mode!", e).await,
        };
        let command = thermostat_mode_command(mode);
        self.execute(device_id, CommandCall::ThermostatMode, &command)
            .await
            .map(|_| ())
    }

    pub async fn set_temperature(&self, device_id: &str, request: &SetpointRequest) -> Result<()> {
        let scale = request
            .unit
            .unwrap_or_else(|| self.directory.display_scale());
        let command = match request
            .mode
            .parse::<ThermostatMode>()
            .and_then(|mode| setpoint_command(mode, request.heat, request.cool, scale))
        {
            Ok(command) => command,
            Err(e) => return self.fail("Invalid Mode!", e).await,
        };
        self.execute(device_id, CommandCall::TemperatureSetpoint, &command)
            .await
            .map(|_| ())
    }

    /// Generate, extend or stop a live stream
    ///
    /// The session keeps the device and token of the live stream, so extend
    /// and stop always target the device that generated it.
    pub async fn stream(
        &self,
        device_id: &str,
        action: StreamAction,
        protocol: StreamProtocol,
    ) -> Result<StreamOutcome> {
        let live = self.session.binding().await;
        let mut argument = match stream_argument(live.as_ref(), device_id, action, protocol) {
            Ok(argument) => argument,
            Err(e) => return self.fail("Error", e).await,
        };

        if action == StreamAction::Generate && protocol == StreamProtocol::WebRtc {
            // No-op while a session is latched
            self.session.initialize().await?;
            argument = Some(self.session.begin_offer_exchange().await?);
        }

        let command = match stream_command(action, protocol, argument.as_deref()) {
            Ok(command) => command,
            Err(e) => return self.fail("Error", e).await,
        };
        let data = self
            .execute(device_id, CommandCall::Stream(action, protocol), &command)
            .await?;

        let mut answer_applied = false;
        match action {
            StreamAction::Generate | StreamAction::Extend => {
                if let Some(token) = token_from_results(protocol, &data) {
                    self.session.bind(device_id, token).await;
                }
                if action == StreamAction::Generate {
                    if let Some(answer) = answer_from_results(&data) {
                        self.session.apply_answer(answer).await?;
                        self.log.push(LogKind::Action, "[Video Stream]", "").await;
                        answer_applied = true;
                    }
                }
            }
            StreamAction::Stop => match protocol {
                StreamProtocol::WebRtc => self.session.stop().await?,
                StreamProtocol::Rtsp => self.session.clear_token().await,
            },
        }

        Ok(StreamOutcome {
            token: self.session.binding().await.map(|live| live.token),
            answer_applied,
        })
    }

    /// Ask the device to stop the live stream and forget its token
    ///
    /// The token is dropped even when the device refuses; the failure is in
    /// the activity log.
    pub async fn stop_live_stream(&self) {
        let Some(live) = self.session.binding().await else {
            return;
        };
        let protocol = live.protocol();
        match stream_command(StreamAction::Stop, protocol, Some(live.token.value())) {
            Ok(command) => {
                let call = CommandCall::Stream(StreamAction::Stop, protocol);
                if let Err(e) = self.execute(&live.device_id, call, &command).await {
                    debug!("Stop of {} stream on {} failed: {}", protocol, live.device_id, e);
                }
            }
            Err(e) => debug!("Cannot build stop command: {}", e),
        }
        self.session.clear_token().await;
    }

    /// Stop any live stream, then stop, re-arm and initialize the preview
    pub async fn reset_stream(&self) -> Result<bool> {
        self.stop_live_stream().await;
        self.session.reset().await
    }

    async fn execute(
        &self,
        device_id: &str,
        call: CommandCall,
        command: &DeviceCommand,
    ) -> Result<Value> {
        debug!("Executing {:?} on {}", call, device_id);
        match self.api.execute_command(device_id, command).await {
            Ok(data) => self.require_object(data).await,
            Err(e) => self.fail("Execute Command", e).await,
        }
    }

    async fn require_object(&self, data: Value) -> Result<Value> {
        if data.is_object() {
            Ok(data)
        } else {
            let e = AppError::Validation(
                "Device Access response contains empty response!".to_string(),
            );
            self.fail("Empty Response!", e).await
        }
    }

    /// Report to the activity log and hand the error back
    ///
    /// Transport errors were already logged with their response body.
    async fn fail<T>(&self, title: &str, error: AppError) -> Result<T> {
        if !matches!(error, AppError::Transport { .. }) {
            self.log.report(LogKind::Action, title, &error).await;
        }
        Err(error)
    }

    fn publish_directory(&self) {
        self.events.publish(SystemEvent::DevicesUpdated {
            count: self.directory.len(),
            selected: self.directory.selected().map(|d| d.id),
        });
    }
}
