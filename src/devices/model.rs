//! Device model

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::AppError;

/// Suffix appended to the type of cameras that advertise WebRTC streaming
pub const WEBRTC_SUFFIX: &str = "-webrtc";

/// A controllable device from the directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    /// Short type (`THERMOSTAT`, `CAMERA`, `DOORBELL-webrtc`, ...)
    #[serde(rename = "type")]
    pub device_type: String,
    pub name: String,
    pub structure: String,
    /// Trait names the device advertises
    pub traits: Vec<String>,
}

impl Device {
    pub fn is_webrtc(&self) -> bool {
        self.device_type.ends_with(WEBRTC_SUFFIX)
    }

    pub fn has_trait(&self, name: &str) -> bool {
        self.traits.iter().any(|t| t == name)
    }

    pub fn control_panel(&self) -> ControlPanel {
        ControlPanel::for_type(&self.device_type)
    }
}

/// Control panel relevant to a device type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlPanel {
    Thermostat,
    Camera,
    CameraWebRtc,
    None,
}

impl ControlPanel {
    pub fn for_type(device_type: &str) -> Self {
        match device_type {
            "THERMOSTAT" => ControlPanel::Thermostat,
            "CAMERA" | "DOORBELL" => ControlPanel::Camera,
            "CAMERA-webrtc" | "DOORBELL-webrtc" => ControlPanel::CameraWebRtc,
            _ => ControlPanel::None,
        }
    }
}

/// Thermostat display scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TemperatureScale {
    #[serde(alias = "C", alias = "°C")]
    Celsius,
    #[serde(alias = "F", alias = "°F")]
    Fahrenheit,
}

impl TemperatureScale {
    /// Unit suffix shown next to setpoint inputs
    pub fn suffix(&self) -> &'static str {
        match self {
            TemperatureScale::Celsius => "°C",
            TemperatureScale::Fahrenheit => "°F",
        }
    }

    /// Convert a value in this scale to Celsius
    pub fn to_celsius(&self, value: f64) -> f64 {
        match self {
            TemperatureScale::Celsius => value,
            TemperatureScale::Fahrenheit => (value - 32.0) * 5.0 / 9.0,
        }
    }
}

impl FromStr for TemperatureScale {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "C" | "°C" | "CELSIUS" => Ok(TemperatureScale::Celsius),
            "F" | "°F" | "FAHRENHEIT" => Ok(TemperatureScale::Fahrenheit),
            other => Err(AppError::Validation(format!(
                "Unknown temperature unit: {}",
                other
            ))),
        }
    }
}

/// Title-case every word: `THERMOSTAT` -> `Thermostat`
pub fn upper_camel(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word_start = true;
    for c in text.chars() {
        if c.is_alphanumeric() || c == '_' {
            if word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            word_start = false;
        } else {
            out.push(c);
            word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_panel() {
        assert_eq!(ControlPanel::for_type("THERMOSTAT"), ControlPanel::Thermostat);
        assert_eq!(ControlPanel::for_type("DOORBELL"), ControlPanel::Camera);
        assert_eq!(ControlPanel::for_type("CAMERA-webrtc"), ControlPanel::CameraWebRtc);
        assert_eq!(ControlPanel::for_type("DISPLAY"), ControlPanel::None);
    }

    #[test]
    fn test_fahrenheit_to_celsius() {
        let scale = TemperatureScale::Fahrenheit;
        assert!((scale.to_celsius(212.0) - 100.0).abs() < 1e-9);
        assert!((scale.to_celsius(68.0) - 20.0).abs() < 1e-9);
        assert!((scale.to_celsius(-40.0) + 40.0).abs() < 1e-9);
        assert_eq!(TemperatureScale::Celsius.to_celsius(21.5), 21.5);
    }

    #[test]
    fn test_scale_parsing() {
        assert_eq!("°F".parse::<TemperatureScale>().unwrap(), TemperatureScale::Fahrenheit);
        assert_eq!("celsius".parse::<TemperatureScale>().unwrap(), TemperatureScale::Celsius);
        assert!("kelvin".parse::<TemperatureScale>().is_err());
        assert_eq!(TemperatureScale::Fahrenheit.suffix(), "°F");
    }

    #[test]
    fn test_upper_camel() {
        assert_eq!(upper_camel("THERMOSTAT"), "Thermostat");
        assert_eq!(upper_camel("SMOKE ALARM"), "Smoke Alarm");
    }
}
