use axum::{extract::State, Json};
use std::sync::Arc;

use crate::error::Result;
use crate::state::AppState;
use crate::webrtc::StreamSnapshot;

pub async fn stream_state(State(state): State<Arc<AppState>>) -> Json<StreamSnapshot> {
    Json(state.stream.snapshot().await)
}

/// Stop any live stream, tear the preview down and prepare a fresh offer
pub async fn stream_reset(State(state): State<Arc<AppState>>) -> Result<Json<StreamSnapshot>> {
    state.devices.reset_stream().await?;
    Ok(Json(state.stream.snapshot().await))
}
