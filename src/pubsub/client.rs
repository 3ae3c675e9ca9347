//! Cloud Pub/Sub REST calls

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::http::{HttpRequest, HttpTransport};

/// Grant type of the JWT bearer token exchange
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PullResponse {
    #[serde(default, rename = "receivedMessages")]
    received_messages: Vec<ReceivedMessage>,
}

/// A pulled message awaiting acknowledgment
#[derive(Debug, Clone, Deserialize)]
pub struct ReceivedMessage {
    #[serde(rename = "ackId")]
    pub ack_id: String,
    pub message: PubsubMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubsubMessage {
    /// Base64 encoded payload
    #[serde(default)]
    pub data: String,
    #[serde(default, rename = "messageId")]
    pub message_id: String,
}

/// Pub/Sub client
pub struct PubSubClient {
    http: Arc<dyn HttpTransport>,
}

impl PubSubClient {
    pub fn new(http: Arc<dyn HttpTransport>) -> Self {
        Self { http }
    }

    /// Exchange a signed assertion for a bearer token
    ///
    /// A rejected or token-less answer is a credential error.
    pub async fn authenticate(&self, auth_endpoint: &str, assertion: &str) -> Result<String> {
        let body = json!({
            "grant_type": JWT_BEARER_GRANT,
            "assertion": assertion,
        });
        let response = self.http.send(HttpRequest::post(auth_endpoint, body)).await?;
        if !response.is_success() {
            return Err(AppError::Credential(format!(
                "Authorization rejected ({}): {}",
                response.status, response.body
            )));
        }

        let token: TokenResponse = serde_json::from_str(&response.body)
            .map_err(|e| AppError::Credential(format!("Malformed token response: {}", e)))?;
        token.access_token.ok_or_else(|| {
            AppError::Credential(
                "Unable to authenticate Subscription Id / Service Account Key pair!".to_string(),
            )
        })
    }

    /// `POST {subscription}:pull`
    pub async fn pull(
        &self,
        subscription_url: &str,
        token: &str,
        max_messages: u32,
    ) -> Result<Vec<ReceivedMessage>> {
        let body = json!({
            "returnImmediately": false,
            "maxMessages": max_messages,
        });
        let request =
            HttpRequest::post(format!("{}:pull", subscription_url), body).with_bearer(token);
        let body = self.http.send(request).await?.into_body()?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let response: PullResponse = serde_json::from_str(&body)?;
        debug!("Pulled {} messages", response.received_messages.len());
        Ok(response.received_messages)
    }

    /// `POST {subscription}:acknowledge` for all ids in one call
    pub async fn acknowledge(
        &self,
        subscription_url: &str,
        token: &str,
        ack_ids: &[String],
    ) -> Result<()> {
        let request = HttpRequest::post(
            format!("{}:acknowledge", subscription_url),
            json!({ "ackIds": ack_ids }),
        )
        .with_bearer(token);
        self.http.send(request).await?.into_body()?;
        debug!("Acknowledged {} messages", ack_ids.len());
        Ok(())
    }
}
