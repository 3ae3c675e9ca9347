//! Activity log handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::ActionResponse;
use crate::activity::{LogEntry, LogKind};
use crate::error::Result;
use crate::state::AppState;

#[derive(Serialize)]
pub struct LogsResponse {
    pub filter: Vec<LogKind>,
    /// Entries matching the filter, newest first
    pub entries: Vec<LogEntry>,
}

pub async fn get_logs(State(state): State<Arc<AppState>>) -> Json<LogsResponse> {
    Json(LogsResponse {
        filter: state.log.filter(),
        entries: state.log.filtered(),
    })
}

pub async fn clear_logs(State(state): State<Arc<AppState>>) -> Result<Json<ActionResponse>> {
    state.log.clear().await?;
    Ok(ActionResponse::ok("Logs cleared"))
}

pub async fn toggle_filter(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<LogsResponse>> {
    let kind: LogKind = kind.parse()?;
    let filter = state.log.toggle_filter(kind).await?;
    Ok(Json(LogsResponse {
        filter,
        entries: state.log.filtered(),
    }))
}
