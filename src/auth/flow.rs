//! OAuth account linking flow
//!
//! Three independently skippable steps, run strictly in order:
//! capture the redirect code, exchange it for tokens, refresh the access
//! token. Every step resolves with a [`StepOutcome`]; failures are reported
//! to the activity log and never abort the chain.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::tokens::TokenStore;
use crate::activity::{ActivityLog, LogKind};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::http::{HttpRequest, HttpTransport};

/// Path the OAuth provider redirects back to
pub const AUTH_CALLBACK_PATH: &str = "/auth";

/// Scope requested during account linking
pub const OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/sdm.service";

/// Result of a single flow step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    /// Preconditions not met, nothing was sent
    Skipped,
    Completed,
    /// Request was rejected; tokens were invalidated
    Failed,
}

/// What the caller should do with the current location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Stay,
    /// Replace the location, dropping the query string
    Rewrite(String),
}

/// Settings snapshot the flow runs with
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub project_id: String,
    pub token_endpoint: String,
    pub partner_connections_url: String,
    pub redirect_uri: String,
}

impl AuthSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            client_id: config.credentials.client_id.clone(),
            client_secret: config.credentials.client_secret.clone(),
            project_id: config.credentials.project_id.clone(),
            token_endpoint: config.endpoints.token_endpoint.clone(),
            partner_connections_url: config.endpoints.partner_connections_url.clone(),
            redirect_uri: config.web.redirect_uri(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// OAuth flow driver
pub struct AuthFlow {
    settings: AuthSettings,
    http: Arc<dyn HttpTransport>,
    tokens: Arc<TokenStore>,
    log: Arc<ActivityLog>,
}

impl AuthFlow {
    pub fn new(
        settings: AuthSettings,
        http: Arc<dyn HttpTransport>,
        tokens: Arc<TokenStore>,
        log: Arc<ActivityLog>,
    ) -> Self {
        Self {
            settings,
            http,
            tokens,
            log,
        }
    }

    /// Account linking URL the user is sent to
    pub fn sign_in_url(&self) -> Result<String> {
        if self.settings.project_id.is_empty() || self.settings.client_id.is_empty() {
            return Err(AppError::Validation(
                "Client id and project id are required to sign in".to_string(),
            ));
        }

        let params = [
            ("access_type", "offline"),
            ("client_id", self.settings.client_id.as_str()),
            ("include_granted_scopes", "true"),
            ("prompt", "consent"),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", OAUTH_SCOPE),
            ("state", "pass-through value"),
        ];
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        Ok(format!(
            "{}{}/auth?{}",
            self.settings.partner_connections_url, self.settings.project_id, query
        ))
    }

    /// Step 1: pick the authorization code out of a redirect
    pub async fn capture_redirect(&self, path: &str, query: Option<&str>) -> Navigation {
        if !path.starts_with(AUTH_CALLBACK_PATH) {
            self.log.push(LogKind::Action, "Page Reload", path).await;
            return Navigation::Stay;
        }

        self.log.push(LogKind::Http, "Page Redirect", path).await;

        let query = query.unwrap_or_default().trim_start_matches('?');
        for pair in query.split('&') {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default();
            if key == "code" {
                let code = urlencoding::decode(value)
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| value.to_string());
                self.tokens.set_oauth_code(&code).await;
            }
        }

        Navigation::Rewrite("/".to_string())
    }

    /// Step 2: exchange the authorization code for tokens
    pub async fn exchange_code(&self) -> StepOutcome {
        let code = match self.tokens.oauth_code() {
            Some(code) if self.tokens.access_token().is_none() => code,
            _ => return StepOutcome::Skipped,
        };

        self.log
            .push(
                LogKind::Action,
                "Exchange Code",
                "Exchanging OAuth code for auth tokens.",
            )
            .await;

        let payload = json!({
            "code": code,
            "client_id": self.settings.client_id,
            "client_secret": self.settings.client_secret,
            "redirect_uri": self.settings.redirect_uri,
            "grant_type": "authorization_code",
        });

        match self.token_request(payload).await {
            Ok(response) => {
                let refresh = response.refresh_token.unwrap_or_default();
                self.tokens
                    .complete_exchange(&response.access_token, &refresh)
                    .await;
                StepOutcome::Completed
            }
            Err(e) => {
                self.log.report(LogKind::Http, "POST Response", &e).await;
                self.tokens.invalidate().await;
                self.tokens.set_signed_in(false).await;
                StepOutcome::Failed
            }
        }
    }

    /// Step 3: mint a new access token from the refresh token
    pub async fn refresh_access(&self) -> StepOutcome {
        let refresh_token = match self.tokens.refresh_token() {
            Some(token) => token,
            None => return StepOutcome::Skipped,
        };

        self.log
            .push(
                LogKind::Action,
                "Refresh Access",
                "Refreshing Access Token using the available Refresh Token.",
            )
            .await;

        let payload = json!({
            "refresh_token": refresh_token,
            "client_id": self.settings.client_id,
            "client_secret": self.settings.client_secret,
            "grant_type": "refresh_token",
        });

        match self.token_request(payload).await {
            Ok(response) => {
                self.tokens.set_access_token(&response.access_token).await;
                StepOutcome::Completed
            }
            Err(e) => {
                self.log.report(LogKind::Http, "POST Response", &e).await;
                self.tokens.invalidate().await;
                StepOutcome::Failed
            }
        }
    }

    /// Steps 2 and 3, each waiting for the previous one
    pub async fn run_token_steps(&self) -> (StepOutcome, StepOutcome) {
        let exchanged = self.exchange_code().await;
        let refreshed = self.refresh_access().await;
        debug!("Token steps: exchange={:?} refresh={:?}", exchanged, refreshed);
        (exchanged, refreshed)
    }

    async fn token_request(&self, payload: serde_json::Value) -> Result<TokenResponse> {
        let request = HttpRequest::post(&self.settings.token_endpoint, payload);
        self.log
            .push(LogKind::Http, "POST Request", &request.describe())
            .await;

        let body = self.http.send(request).await?.into_body()?;
        self.log
            .push(
                LogKind::Http,
                "POST Response",
                &format!("* Payload: \n{}", body),
            )
            .await;

        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens::TokenValue;
    use crate::config::MemoryStore;
    use crate::events::EventBus;
    use crate::http::mock::MockTransport;
    use crate::http::HttpResponse;

    struct Fixture {
        flow: AuthFlow,
        http: Arc<MockTransport>,
        tokens: Arc<TokenStore>,
    }

    fn fixture() -> Fixture {
        let kv = Arc::new(MemoryStore::new());
        let events = Arc::new(EventBus::new());
        let tokens = Arc::new(TokenStore::new(kv.clone(), events.clone()));
        let log = Arc::new(ActivityLog::new(kv, events));
        let http = Arc::new(MockTransport::new());

        let mut config = AppConfig::default();
        config.credentials.client_id = "client".to_string();
        config.credentials.client_secret = "secret".to_string();
        config.credentials.project_id = "project".to_string();

        let flow = AuthFlow::new(
            AuthSettings::from_config(&config),
            http.clone(),
            tokens.clone(),
            log,
        );
        Fixture { flow, http, tokens }
    }

    #[tokio::test]
    async fn test_callback_then_exchange() {
        let f = fixture();

        let nav = f.flow.capture_redirect("/auth", Some("?code=ABC123")).await;
        assert_eq!(nav, Navigation::Rewrite("/".to_string()));
        assert_eq!(f.tokens.oauth_code().as_deref(), Some("ABC123"));

        f.http
            .push_json(serde_json::json!({"access_token": "T1", "refresh_token": "R1"}));
        assert_eq!(f.flow.exchange_code().await, StepOutcome::Completed);
        assert!(f.tokens.signed_in());
        assert_eq!(f.tokens.access_token().as_deref(), Some("T1"));

        let request = &f.http.requests()[0];
        let body = request.body.as_ref().unwrap();
        assert_eq!(body["code"], "ABC123");
        assert_eq!(body["grant_type"], "authorization_code");
        assert_eq!(body["redirect_uri"], "http://localhost:8080/auth");
    }

    #[tokio::test]
    async fn test_non_callback_path_is_noop() {
        let f = fixture();
        let nav = f.flow.capture_redirect("/", Some("code=XYZ")).await;
        assert_eq!(nav, Navigation::Stay);
        assert_eq!(f.tokens.oauth_code(), None);
    }

    #[tokio::test]
    async fn test_exchange_skipped_without_code_or_with_token() {
        let f = fixture();
        assert_eq!(f.flow.exchange_code().await, StepOutcome::Skipped);

        f.tokens.set_oauth_code("ABC").await;
        f.tokens.complete_exchange("T0", "R0").await;
        assert_eq!(f.flow.exchange_code().await, StepOutcome::Skipped);
        assert_eq!(f.http.request_count(), 0);
    }

    #[tokio::test]
    async fn test_exchange_failure_invalidates() {
        let f = fixture();
        f.tokens.set_oauth_code("ABC").await;
        f.http.push(HttpResponse::new(400, r#"{"error":"invalid_grant"}"#));

        assert_eq!(f.flow.exchange_code().await, StepOutcome::Failed);
        let set = f.tokens.snapshot();
        assert_eq!(set.access_token, TokenValue::Failed);
        assert_eq!(set.refresh_token, TokenValue::Failed);
        assert!(!f.tokens.signed_in());
    }

    #[tokio::test]
    async fn test_refresh_updates_only_access_token() {
        let f = fixture();
        f.tokens.complete_exchange("T1", "R1").await;
        f.http.push_json(serde_json::json!({"access_token": "T2"}));

        assert_eq!(f.flow.refresh_access().await, StepOutcome::Completed);
        let set = f.tokens.snapshot();
        assert_eq!(set.access_token, TokenValue::Valid("T2".to_string()));
        assert_eq!(set.refresh_token, TokenValue::Valid("R1".to_string()));
        assert_eq!(f.http.requests()[0].body.as_ref().unwrap()["grant_type"], "refresh_token");
    }

    #[tokio::test]
    async fn test_refresh_failure_invalidates_both() {
        let f = fixture();
        f.tokens.complete_exchange("T1", "R1").await;
        f.http.push(HttpResponse::new(401, "denied"));

        assert_eq!(f.flow.refresh_access().await, StepOutcome::Failed);
        let set = f.tokens.snapshot();
        assert_eq!(set.access_token, TokenValue::Failed);
        assert_eq!(set.refresh_token, TokenValue::Failed);
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let f = fixture();
        f.tokens.set_oauth_code("ABC").await;
        f.http
            .push_json(serde_json::json!({"access_token": "T1", "refresh_token": "R1"}))
            .push_json(serde_json::json!({"access_token": "T2"}));

        let outcome = f.flow.run_token_steps().await;
        assert_eq!(outcome, (StepOutcome::Completed, StepOutcome::Completed));
        assert_eq!(f.tokens.access_token().as_deref(), Some("T2"));
    }

    #[test]
    fn test_sign_in_url() {
        let f = fixture();
        let url = f.flow.sign_in_url().unwrap();
        assert!(url.starts_with("https://nestservices.google.com/partnerconnections/project/auth?"));
        assert!(url.contains("client_id=client"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fauth"));
        assert!(url.contains("scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fsdm.service"));
    }
}
