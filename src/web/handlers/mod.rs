pub mod auth;
pub mod devices;
pub mod events;
pub mod logs;
pub mod stream;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::state::{AppState, StatusSnapshot};

/// Generic acknowledgment body (unified success format)
#[derive(Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message.into()),
        })
    }
}

// ============================================================================
// Health & Status
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    Json(state.status())
}

// ============================================================================
// Configuration
// ============================================================================

fn sanitize_config_for_api(config: &mut AppConfig) {
    config.credentials.client_secret.clear();
    config.events.service_account_key.clear();
}

/// Current configuration with secrets blanked
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<AppConfig> {
    let mut config = (*state.config.get()).clone();
    sanitize_config_for_api(&mut config);
    Json(config)
}

#[derive(Deserialize)]
pub struct UpdateConfigRequest {
    #[serde(flatten)]
    pub updates: serde_json::Value,
}

/// Merge a partial configuration into the stored one
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateConfigRequest>,
) -> Result<Json<ActionResponse>> {
    let current = state.config.get();
    tracing::info!("Received config update request");

    let config_json = serde_json::to_value(&*current)
        .map_err(|e| AppError::Internal(format!("Failed to serialize config: {}", e)))?;
    let merged = merge_json(config_json, req.updates);
    let new_config: AppConfig = serde_json::from_value(merged)
        .map_err(|e| AppError::BadRequest(format!("Invalid config format: {}", e)))?;

    state.update_config(new_config).await?;
    tracing::info!("Config updated successfully");

    Ok(ActionResponse::ok("Configuration updated"))
}

/// Recursively overlay `updates` onto `base`
fn merge_json(base: serde_json::Value, updates: serde_json::Value) -> serde_json::Value {
    match (base, updates) {
        (serde_json::Value::Object(mut base), serde_json::Value::Object(updates)) => {
            for (key, value) in updates {
                let merged = match base.remove(&key) {
                    Some(base_value) => merge_json(base_value, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            serde_json::Value::Object(base)
        }
        (_, updates) => updates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_json_nested() {
        let base = json!({"credentials": {"client_id": "a", "project_id": "p"}, "web": {"http_port": 8080}});
        let merged = merge_json(base, json!({"credentials": {"client_id": "b"}}));
        assert_eq!(merged["credentials"]["client_id"], "b");
        assert_eq!(merged["credentials"]["project_id"], "p");
        assert_eq!(merged["web"]["http_port"], 8080);
    }

    #[test]
    fn test_sanitize_config() {
        let mut config = AppConfig::default();
        config.credentials.client_secret = "secret".to_string();
        config.events.service_account_key = "{}".to_string();
        sanitize_config_for_api(&mut config);
        assert!(config.credentials.client_secret.is_empty());
        assert!(config.events.service_account_key.is_empty());
    }
}
