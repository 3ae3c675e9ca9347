//! Device directory and command handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ActionResponse;
use crate::devices::{Device, DirectorySnapshot, ListingSummary, SetpointRequest, StreamAction, StreamOutcome};
use crate::error::Result;
use crate::state::AppState;
use crate::webrtc::StreamProtocol;

pub async fn directory(State(state): State<Arc<AppState>>) -> Json<DirectorySnapshot> {
    Json(state.devices.snapshot())
}

pub async fn list_devices(State(state): State<Arc<AppState>>) -> Result<Json<ListingSummary>> {
    Ok(Json(state.devices.list_devices().await?))
}

pub async fn list_structures(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>> {
    Ok(Json(state.devices.list_structures().await?))
}

#[derive(Deserialize)]
pub struct SelectDeviceRequest {
    pub device_id: String,
}

pub async fn select_device(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectDeviceRequest>,
) -> Result<Json<Device>> {
    Ok(Json(state.devices.select(&req.device_id).await?))
}

#[derive(Deserialize)]
pub struct FanRequest {
    /// Toggle label; the recorded one is used when absent
    #[serde(default)]
    pub toggle: Option<String>,
}

#[derive(Serialize)]
pub struct FanResponse {
    pub success: bool,
    pub fan_label: String,
}

pub async fn set_fan(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Json(req): Json<FanRequest>,
) -> Result<Json<FanResponse>> {
    let fan_label = state
        .devices
        .set_fan(&device_id, req.toggle.as_deref())
        .await?;
    Ok(Json(FanResponse {
        success: true,
        fan_label,
    }))
}

#[derive(Deserialize)]
pub struct ThermostatModeRequest {
    pub mode: String,
}

pub async fn set_thermostat_mode(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Json(req): Json<ThermostatModeRequest>,
) -> Result<Json<ActionResponse>> {
    state
        .devices
        .set_thermostat_mode(&device_id, &req.mode)
        .await?;
    Ok(ActionResponse::ok(format!("Thermostat mode set to {}", req.mode)))
}

pub async fn set_temperature(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Json(req): Json<SetpointRequest>,
) -> Result<Json<ActionResponse>> {
    state.devices.set_temperature(&device_id, &req).await?;
    Ok(ActionResponse::ok("Temperature setpoint updated"))
}

#[derive(Deserialize)]
pub struct StreamCommandRequest {
    pub protocol: StreamProtocol,
}

/// `POST /devices/:id/stream/:action`
pub async fn stream_command(
    State(state): State<Arc<AppState>>,
    Path((device_id, action)): Path<(String, StreamAction)>,
    Json(req): Json<StreamCommandRequest>,
) -> Result<Json<StreamOutcome>> {
    let outcome = state
        .devices
        .stream(&device_id, action, req.protocol)
        .await?;
    Ok(Json(outcome))
}
