//! Device Access REST client
//!
//! Every call is bearer-authenticated with the current access token and
//! logged to the activity log as a request/response pair.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::activity::{ActivityLog, LogKind};
use crate::auth::TokenStore;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::http::{HttpRequest, HttpTransport, Method};

/// Vendor command envelope sent to `:executeCommand`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub command: String,
    pub params: Map<String, Value>,
}

impl DeviceCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: Map::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// Endpoint settings for the Device Access API
#[derive(Debug, Clone, Default)]
pub struct ApiSettings {
    pub api_url: String,
    pub project_id: String,
}

impl ApiSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            api_url: config.endpoints.api_url.trim_end_matches('/').to_string(),
            project_id: config.credentials.project_id.clone(),
        }
    }
}

/// Device Access API client
pub struct DeviceAccessApi {
    settings: ArcSwap<ApiSettings>,
    http: Arc<dyn HttpTransport>,
    tokens: Arc<TokenStore>,
    log: Arc<ActivityLog>,
}

impl DeviceAccessApi {
    pub fn new(
        settings: ApiSettings,
        http: Arc<dyn HttpTransport>,
        tokens: Arc<TokenStore>,
        log: Arc<ActivityLog>,
    ) -> Self {
        Self {
            settings: ArcSwap::from_pointee(settings),
            http,
            tokens,
            log,
        }
    }

    /// Replace endpoint settings after a configuration change
    pub fn update_settings(&self, settings: ApiSettings) {
        self.settings.store(Arc::new(settings));
    }

    /// `GET /enterprises/{project}/devices`
    pub async fn list_devices(&self) -> Result<Value> {
        let path = format!("/enterprises/{}/devices", self.project_id()?);
        self.request(Method::Get, &path, None).await
    }

    /// `GET /enterprises/{project}/structures`
    pub async fn list_structures(&self) -> Result<Value> {
        let path = format!("/enterprises/{}/structures", self.project_id()?);
        self.request(Method::Get, &path, None).await
    }

    /// `POST /enterprises/{project}/devices/{id}:executeCommand`
    pub async fn execute_command(&self, device_id: &str, command: &DeviceCommand) -> Result<Value> {
        let path = format!(
            "/enterprises/{}/devices/{}:executeCommand",
            self.project_id()?,
            urlencoding::encode(device_id)
        );
        let body = serde_json::to_value(command)?;
        self.request(Method::Post, &path, Some(body)).await
    }

    fn project_id(&self) -> Result<String> {
        let settings = self.settings.load();
        if settings.project_id.is_empty() {
            return Err(AppError::Validation("Project id is not configured".to_string()));
        }
        Ok(settings.project_id.clone())
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let access_token = self.tokens.access_token().ok_or_else(|| {
            AppError::Credential("No access token available, sign in first".to_string())
        })?;

        let url = format!("{}{}", self.settings.load().api_url, path);
        let request = match (method, body) {
            (Method::Post, Some(body)) => HttpRequest::post(url, body),
            (Method::Post, None) => HttpRequest::post(url, Value::Object(Map::new())),
            (Method::Get, _) => HttpRequest::get(url),
        }
        .with_bearer(access_token);

        self.log
            .push(
                LogKind::Http,
                &format!("{} Request", method),
                &request.describe(),
            )
            .await;

        let response = self.http.send(request).await?;
        if !response.is_success() {
            self.log
                .push_error(LogKind::Http, &format!("{} Response", method), &response.body)
                .await;
        }
        let body = response.into_body()?;
        self.log
            .push(
                LogKind::Http,
                &format!("{} Response", method),
                &format!("* Payload: \n{}", body),
            )
            .await;

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;
    use crate::events::EventBus;
    use crate::http::mock::MockTransport;
    use crate::http::HttpResponse;

    async fn fixture() -> (DeviceAccessApi, Arc<MockTransport>, Arc<TokenStore>) {
        let kv = Arc::new(MemoryStore::new());
        let events = Arc::new(EventBus::new());
        let tokens = Arc::new(TokenStore::new(kv.clone(), events.clone()));
        tokens.complete_exchange("T1", "R1").await;
        let log = Arc::new(ActivityLog::new(kv, events));
        let http = Arc::new(MockTransport::new());
        let settings = ApiSettings {
            api_url: "https://sdm.example/v1".to_string(),
            project_id: "p1".to_string(),
        };
        let api = DeviceAccessApi::new(settings, http.clone(), tokens.clone(), log);
        (api, http, tokens)
    }

    #[tokio::test]
    async fn test_list_devices_request() {
        let (api, http, _) = fixture().await;
        http.push_json(serde_json::json!({"devices": []}));

        let data = api.list_devices().await.unwrap();
        assert!(data["devices"].is_array());

        let request = &http.requests()[0];
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.url, "https://sdm.example/v1/enterprises/p1/devices");
        assert_eq!(request.bearer.as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_execute_command_envelope() {
        let (api, http, _) = fixture().await;
        http.push_json(serde_json::json!({}));

        let command = DeviceCommand::new("sdm.devices.commands.ThermostatMode.SetMode")
            .param("mode", "HEAT");
        api.execute_command("dev-1", &command).await.unwrap();

        let request = &http.requests()[0];
        assert_eq!(
            request.url,
            "https://sdm.example/v1/enterprises/p1/devices/dev-1:executeCommand"
        );
        let body = request.body.as_ref().unwrap();
        assert_eq!(body["command"], "sdm.devices.commands.ThermostatMode.SetMode");
        assert_eq!(body["params"]["mode"], "HEAT");
    }

    #[tokio::test]
    async fn test_execute_command_escapes_device_id() {
        let (api, http, _) = fixture().await;
        http.push_json(serde_json::json!({}));

        let command = DeviceCommand::new("sdm.devices.commands.Fan.SetTimer");
        api.execute_command("a/b?c d", &command).await.unwrap();

        assert_eq!(
            http.requests()[0].url,
            "https://sdm.example/v1/enterprises/p1/devices/a%2Fb%3Fc%20d:executeCommand"
        );
    }

    #[tokio::test]
    async fn test_non_success_is_transport_error() {
        let (api, http, _) = fixture().await;
        http.push(HttpResponse::new(403, "permission denied"));

        match api.list_structures().await {
            Err(AppError::Transport { status, body }) => {
                assert_eq!(status, 403);
                assert_eq!(body, "permission denied");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_requires_access_token() {
        let (api, http, tokens) = fixture().await;
        tokens.clear().await;

        assert!(matches!(api.list_devices().await, Err(AppError::Credential(_))));
        assert_eq!(http.request_count(), 0);
    }
}
