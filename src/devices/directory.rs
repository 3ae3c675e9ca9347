//! Device directory
//!
//! Rebuilt from scratch on every listing; entries are never merged.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::model::{upper_camel, Device, TemperatureScale, WEBRTC_SUFFIX};
use crate::error::{AppError, Result};

const INFO_TRAIT: &str = "sdm.devices.traits.Info";
const SETTINGS_TRAIT: &str = "sdm.devices.traits.Settings";
const LIVE_STREAM_TRAIT: &str = "sdm.devices.traits.CameraLiveStream";

/// Fan toggle labels
pub const FAN_ACTIVATE: &str = "Activate Fan";
pub const FAN_DEACTIVATE: &str = "Deactivate Fan";

#[derive(Debug, Deserialize)]
struct RawDevice {
    name: String,
    #[serde(rename = "type")]
    device_type: String,
    #[serde(default)]
    assignee: String,
    #[serde(default)]
    traits: Map<String, Value>,
    #[serde(default, rename = "parentRelations")]
    parent_relations: Vec<ParentRelation>,
}

#[derive(Debug, Deserialize)]
struct ParentRelation {
    #[serde(default, rename = "displayName")]
    display_name: String,
}

/// Outcome of a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ListingSummary {
    pub count: usize,
    /// At least one device supports WebRTC streaming
    pub webrtc_capable: bool,
}

/// Directory snapshot handed to the presentation layer
#[derive(Debug, Clone, Serialize)]
pub struct DirectorySnapshot {
    pub devices: Vec<Device>,
    pub selected: Option<Device>,
    /// Unit suffix for setpoint inputs (`°F` / `°C`)
    pub temperature_unit: &'static str,
    pub fan_label: String,
}

struct DirectoryState {
    devices: Vec<Device>,
    selected: Option<String>,
    scale: TemperatureScale,
    fan_label: String,
}

impl Default for DirectoryState {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            selected: None,
            scale: TemperatureScale::Celsius,
            fan_label: FAN_ACTIVATE.to_string(),
        }
    }
}

/// In-memory set of discovered devices
#[derive(Default)]
pub struct DeviceDirectory {
    state: RwLock<DirectoryState>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the directory with the devices of a listing response
    ///
    /// The previous set is cleared first, even when the response turns out
    /// to be unusable.
    pub fn replace_from_listing(&self, data: &Value) -> Result<ListingSummary> {
        self.clear();

        let entries = data
            .get("devices")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                AppError::Validation("List Devices response contains no devices!".to_string())
            })?;

        let mut devices = Vec::with_capacity(entries.len());
        let mut scale = None;
        let mut webrtc_capable = false;

        for entry in entries {
            let raw: RawDevice = serde_json::from_value(entry.clone())?;
            let mut device_type = last_segment(&raw.device_type, '.').to_string();

            if device_type == "DISPLAY" {
                continue;
            }

            if device_type == "THERMOSTAT" {
                let fahrenheit = raw
                    .traits
                    .get(SETTINGS_TRAIT)
                    .and_then(|t| t.get("temperatureScale"))
                    .and_then(Value::as_str)
                    == Some("FAHRENHEIT");
                scale = Some(if fahrenheit {
                    TemperatureScale::Fahrenheit
                } else {
                    TemperatureScale::Celsius
                });
            }

            let custom_name = raw
                .traits
                .get(INFO_TRAIT)
                .and_then(|t| t.get("customName"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let name = if custom_name.is_empty() {
                let room = raw
                    .parent_relations
                    .first()
                    .map(|r| r.display_name.as_str())
                    .unwrap_or_default();
                format!("{} {}", room, upper_camel(&device_type))
            } else {
                custom_name.to_string()
            };

            let supports_webrtc = raw
                .traits
                .get(LIVE_STREAM_TRAIT)
                .and_then(|t| t.get("supportedProtocols"))
                .and_then(Value::as_array)
                .map(|protocols| protocols.iter().any(|p| p.as_str() == Some("WEB_RTC")))
                .unwrap_or(false);
            if supports_webrtc {
                device_type.push_str(WEBRTC_SUFFIX);
                webrtc_capable = true;
            }

            devices.push(Device {
                id: last_segment(&raw.name, '/').to_string(),
                device_type,
                name,
                structure: structure_of(&raw.assignee).to_string(),
                traits: raw.traits.keys().cloned().collect(),
            });
        }

        let mut state = self.state.write();
        state.selected = devices.first().map(|d| d.id.clone());
        state.devices = devices;
        if let Some(scale) = scale {
            state.scale = scale;
        }

        Ok(ListingSummary {
            count: state.devices.len(),
            webrtc_capable,
        })
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.devices.clear();
        state.selected = None;
    }

    pub fn devices(&self) -> Vec<Device> {
        self.state.read().devices.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<Device> {
        self.state.read().devices.iter().find(|d| d.id == id).cloned()
    }

    /// Change the selected device
    pub fn select(&self, id: &str) -> Result<Device> {
        let mut state = self.state.write();
        let device = state
            .devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Device not found: {}", id)))?;
        state.selected = Some(device.id.clone());
        Ok(device)
    }

    pub fn selected(&self) -> Option<Device> {
        let state = self.state.read();
        let id = state.selected.as_ref()?;
        state.devices.iter().find(|d| &d.id == id).cloned()
    }

    /// Scale setpoints are entered in when the caller states no unit
    pub fn display_scale(&self) -> TemperatureScale {
        self.state.read().scale
    }

    pub fn fan_label(&self) -> String {
        self.state.read().fan_label.clone()
    }

    /// Flip the fan label after a successful fan command
    pub fn toggle_fan_label(&self) -> String {
        let mut state = self.state.write();
        state.fan_label = if state.fan_label == FAN_ACTIVATE {
            FAN_DEACTIVATE.to_string()
        } else {
            FAN_ACTIVATE.to_string()
        };
        state.fan_label.clone()
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        let state = self.state.read();
        let selected = state
            .selected
            .as_ref()
            .and_then(|id| state.devices.iter().find(|d| &d.id == id).cloned());
        DirectorySnapshot {
            devices: state.devices.clone(),
            selected,
            temperature_unit: state.scale.suffix(),
            fan_label: state.fan_label.clone(),
        }
    }
}

fn last_segment(text: &str, separator: char) -> &str {
    match text.rfind(separator) {
        Some(idx) => &text[idx + separator.len_utf8()..],
        None => text,
    }
}

/// Structure id between `/structures/` and `/rooms/` of an assignee name
fn structure_of(assignee: &str) -> &str {
    const MARKER: &str = "/structures/";
    let start = match assignee.rfind(MARKER) {
        Some(idx) => idx + MARKER.len(),
        None => return "",
    };
    let end = assignee
        .rfind("/rooms/")
        .filter(|&end| end >= start)
        .unwrap_or(assignee.len());
    &assignee[start..end]
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_listing_skips_displays() {
        let directory = DeviceDirectory::new();
        let data = json!({
            "devices": [thermostat("t1", "CELSIUS"), display("d1"), camera("c1", &["RTSP"]), display("d2")]
        });

        let summary = directory.replace_from_listing(&data).unwrap();
        assert_eq!(summary.count, 2);
        assert!(!summary.webrtc_capable);
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn test_listing_replaces_previous_set() {
        let directory = DeviceDirectory::new();
        directory
            .replace_from_listing(&json!({"devices": [thermostat("t1", "CELSIUS"), camera("c1", &[])]}))
            .unwrap();
        directory
            .replace_from_listing(&json!({"devices": [camera("c2", &["WEB_RTC"])]}))
            .unwrap();

        let devices = directory.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "c2");
        assert!(directory.get("t1").is_none());
    }

    #[test]
    fn test_device_fields() {
        let directory = DeviceDirectory::new();
        let summary = directory
            .replace_from_listing(&json!({"devices": [thermostat("t1", "FAHRENHEIT"), camera("c1", &["RTSP", "WEB_RTC"])]}))
            .unwrap();
        assert!(summary.webrtc_capable);

        let thermostat = directory.get("t1").unwrap();
        assert_eq!(thermostat.device_type, "THERMOSTAT");
        assert_eq!(thermostat.name, "Hallway Thermostat");
        assert_eq!(thermostat.structure, "S1");
        assert!(thermostat.has_trait("sdm.devices.traits.ThermostatMode"));

        let camera = directory.get("c1").unwrap();
        assert_eq!(camera.device_type, "CAMERA-webrtc");
        assert_eq!(camera.name, "Front Door");
        assert_eq!(camera.structure, "S2");
        assert!(camera.is_webrtc());

        assert_eq!(directory.display_scale(), TemperatureScale::Fahrenheit);
        assert_eq!(directory.snapshot().temperature_unit, "°F");
    }

    #[test]
    fn test_first_device_selected() {
        let directory = DeviceDirectory::new();
        directory
            .replace_from_listing(&json!({"devices": [display("d1"), camera("c1", &[]), thermostat("t1", "CELSIUS")]}))
            .unwrap();
        assert_eq!(directory.selected().unwrap().id, "c1");

        directory.select("t1").unwrap();
        assert_eq!(directory.selected().unwrap().id, "t1");
        assert!(matches!(directory.select("nope"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_missing_collection_is_error_and_clears() {
        let directory = DeviceDirectory::new();
        directory
            .replace_from_listing(&json!({"devices": [camera("c1", &[])]}))
            .unwrap();

        let result = directory.replace_from_listing(&json!({}));
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(directory.is_empty());
        assert!(directory.selected().is_none());
    }

    #[test]
    fn test_empty_listing() {
        let directory = DeviceDirectory::new();
        let summary = directory.replace_from_listing(&json!({"devices": []})).unwrap();
        assert_eq!(summary.count, 0);
    }

    #[test]
    fn test_fan_label_toggle() {
        let directory = DeviceDirectory::new();
        assert_eq!(directory.fan_label(), FAN_ACTIVATE);
        assert_eq!(directory.toggle_fan_label(), FAN_DEACTIVATE);
        assert_eq!(directory.toggle_fan_label(), FAN_ACTIVATE);
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(last_segment("enterprises/p/devices/abc", '/'), "abc");
        assert_eq!(last_segment("sdm.devices.types.CAMERA", '.'), "CAMERA");
        assert_eq!(structure_of("enterprises/p/structures/S1/rooms/R1"), "S1");
        assert_eq!(structure_of("enterprises/p/structures/S1"), "S1");
        assert_eq!(structure_of(""), "");
    }
}
