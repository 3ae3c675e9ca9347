//! Command dispatcher
//!
//! Turns a user intent into a vendor command envelope. Invalid selections
//! are rejected here, before anything is sent.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::directory::{FAN_ACTIVATE, FAN_DEACTIVATE};
use super::model::TemperatureScale;
use crate::api::DeviceCommand;
use crate::error::{AppError, Result};
use crate::webrtc::{SignalingToken, StreamBinding, StreamProtocol};

const COMMAND_PREFIX: &str = "sdm.devices.commands";

/// Fan timer duration when switching the fan on
pub const FAN_DURATION: &str = "3600s";

/// Fan timer mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FanToggle {
    On,
    Off,
}

impl FanToggle {
    /// Resolve a toggle label (`Activate Fan` / `Deactivate Fan`, or `ON` / `OFF`)
    pub fn from_label(label: &str) -> Result<Self> {
        match label.trim() {
            FAN_ACTIVATE | "ON" => Ok(FanToggle::On),
            FAN_DEACTIVATE | "OFF" => Ok(FanToggle::Off),
            other => Err(AppError::Validation(format!(
                "Button Mode not recognized: {}",
                other
            ))),
        }
    }
}

/// Thermostat operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThermostatMode {
    #[serde(rename = "HEAT")]
    Heat,
    #[serde(rename = "COOL")]
    Cool,
    #[serde(rename = "HEATCOOL")]
    HeatCool,
    #[serde(rename = "OFF")]
    Off,
    #[serde(rename = "ECO")]
    Eco,
}

impl fmt::Display for ThermostatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThermostatMode::Heat => write!(f, "HEAT"),
            ThermostatMode::Cool => write!(f, "COOL"),
            ThermostatMode::HeatCool => write!(f, "HEATCOOL"),
            ThermostatMode::Off => write!(f, "OFF"),
            ThermostatMode::Eco => write!(f, "ECO"),
        }
    }
}

impl FromStr for ThermostatMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HEAT" => Ok(ThermostatMode::Heat),
            "COOL" => Ok(ThermostatMode::Cool),
            "HEATCOOL" => Ok(ThermostatMode::HeatCool),
            "OFF" => Ok(ThermostatMode::Off),
            "ECO" => Ok(ThermostatMode::Eco),
            other => Err(AppError::Validation(format!(
                "Unknown thermostat mode: {}",
                other
            ))),
        }
    }
}

/// Stream command kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamAction {
    Generate,
    Extend,
    Stop,
}

impl fmt::Display for StreamAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamAction::Generate => write!(f, "generate"),
            StreamAction::Extend => write!(f, "extend"),
            StreamAction::Stop => write!(f, "stop"),
        }
    }
}

/// Which response handler a command's answer goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCall {
    FanMode,
    ThermostatMode,
    TemperatureSetpoint,
    Stream(StreamAction, StreamProtocol),
}

/// Fan timer command for the given toggle
pub fn fan_command(toggle: FanToggle) -> DeviceCommand {
    let command = DeviceCommand::new(format!("{}.Fan.SetTimer", COMMAND_PREFIX));
    match toggle {
        FanToggle::On => command
            .param("timerMode", "ON")
            .param("duration", FAN_DURATION),
        FanToggle::Off => command.param("timerMode", "OFF"),
    }
}

pub fn thermostat_mode_command(mode: ThermostatMode) -> DeviceCommand {
    DeviceCommand::new(format!("{}.ThermostatMode.SetMode", COMMAND_PREFIX))
        .param("mode", mode.to_string())
}

/// Setpoint command; temperatures are given in `scale` and sent in Celsius
pub fn setpoint_command(
    mode: ThermostatMode,
    heat: Option<f64>,
    cool: Option<f64>,
    scale: TemperatureScale,
) -> Result<DeviceCommand> {
    let require = |value: Option<f64>, name: &str| {
        value.map(|v| scale.to_celsius(v)).ok_or_else(|| {
            AppError::Validation(format!("{} temperature is required in {} mode", name, mode))
        })
    };

    let prefix = format!("{}.ThermostatTemperatureSetpoint", COMMAND_PREFIX);
    match mode {
        ThermostatMode::Heat => Ok(DeviceCommand::new(format!("{}.SetHeat", prefix))
            .param("heatCelsius", require(heat, "Heat")?)),
        ThermostatMode::Cool => Ok(DeviceCommand::new(format!("{}.SetCool", prefix))
            .param("coolCelsius", require(cool, "Cool")?)),
        ThermostatMode::HeatCool => Ok(DeviceCommand::new(format!("{}.SetRange", prefix))
            .param("heatCelsius", require(heat, "Heat")?)
            .param("coolCelsius", require(cool, "Cool")?)),
        ThermostatMode::Off | ThermostatMode::Eco => Err(AppError::Validation(
            "Off and Eco modes don't allow this function! (Try changing the Thermostat Mode to some other value)"
                .to_string(),
        )),
    }
}

/// Live stream command for one protocol family
pub fn stream_command(
    action: StreamAction,
    protocol: StreamProtocol,
    argument: Option<&str>,
) -> Result<DeviceCommand> {
    let family = match protocol {
        StreamProtocol::Rtsp => "RtspStream",
        StreamProtocol::WebRtc => "WebRtcStream",
    };
    let verb = match action {
        StreamAction::Generate => "Generate",
        StreamAction::Extend => "Extend",
        StreamAction::Stop => "Stop",
    };
    let command = DeviceCommand::new(format!(
        "{}.CameraLiveStream.{}{}",
        COMMAND_PREFIX, verb, family
    ));

    let key = match (action, protocol) {
        (StreamAction::Generate, StreamProtocol::Rtsp) => return Ok(command),
        (StreamAction::Generate, StreamProtocol::WebRtc) => "offerSdp",
        (_, StreamProtocol::Rtsp) => "streamExtensionToken",
        (_, StreamProtocol::WebRtc) => "mediaSessionId",
    };
    let value = argument.ok_or_else(|| {
        AppError::Validation(format!("{} {} stream requires {}", action, protocol, key))
    })?;
    Ok(command.param(key, value))
}

/// Signaling token carried by a generate/extend response
pub fn token_from_results(protocol: StreamProtocol, data: &Value) -> Option<SignalingToken> {
    let results = data.get("results")?;
    let value = results
        .get("streamExtensionToken")
        .or_else(|| results.get("mediaSessionId"))
        .and_then(Value::as_str)?;
    Some(SignalingToken::new(protocol, value))
}

/// Answer SDP carried by a WebRTC generate response
pub fn answer_from_results(data: &Value) -> Option<&str> {
    data.get("results")?.get("answerSdp")?.as_str()
}

/// Check a stream command against the live stream, if any
///
/// Only one stream is live at a time and it stays with the device that
/// generated it. Returns the token value extend and stop are keyed by.
pub fn stream_argument(
    live: Option<&StreamBinding>,
    device_id: &str,
    action: StreamAction,
    protocol: StreamProtocol,
) -> Result<Option<String>> {
    match live {
        Some(live) if live.device_id != device_id => Err(AppError::Validation(format!(
            "A {} stream is active on {}; stop it before streaming from another device",
            live.protocol(),
            live.device_id
        ))),
        Some(live) if live.protocol() != protocol => Err(AppError::Validation(format!(
            "A {} stream is active on this device; stop it before using {} commands",
            live.protocol(),
            protocol
        ))),
        Some(live) => match action {
            StreamAction::Generate => Ok(None),
            StreamAction::Extend | StreamAction::Stop => Ok(Some(live.token.value().to_string())),
        },
        None => match action {
            StreamAction::Generate => Ok(None),
            StreamAction::Extend | StreamAction::Stop => Err(AppError::Validation(
                "No active stream token".to_string(),
            )),
        },
    }
}
