//! Devices: directory, command dispatch and response handling

pub mod commands;
pub mod controller;
pub mod directory;
pub mod model;

pub use commands::{stream_argument, FanToggle, StreamAction, ThermostatMode};
pub use controller::{DeviceController, SetpointRequest, StreamOutcome};
pub use directory::{DeviceDirectory, DirectorySnapshot, ListingSummary};
pub use model::{ControlPanel, Device, TemperatureScale};
