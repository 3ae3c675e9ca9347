//! HTTP transport used by every remote collaborator
//!
//! Device Access, OAuth and Pub/Sub calls all go through [`HttpTransport`],
//! one request and one response per call. There is no retry and no
//! cancellation; a non-success status becomes [`AppError::Transport`] with
//! the full response body.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::error::{AppError, Result};

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// Outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Bearer token for the `Authorization` header
    pub bearer: Option<String>,
    /// JSON body (POST only)
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            bearer: None,
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            bearer: None,
            body: Some(body),
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Human readable request summary for the activity log
    pub fn describe(&self) -> String {
        let mut text = format!("* Endpoint: \n{}", self.url);
        if let Some(ref token) = self.bearer {
            text.push_str(&format!("\n\n* Authorization: \nBearer {}", token));
        }
        if let Some(ref body) = self.body {
            let payload = serde_json::to_string_pretty(body).unwrap_or_default();
            text.push_str(&format!("\n\n* Payload: \n{}", payload));
        }
        text
    }
}

/// Response status and raw body
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body of a successful response, transport error otherwise
    pub fn into_body(self) -> Result<String> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(AppError::Transport {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// Single-shot HTTP transport
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request and return whatever status the server answered with
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// `reqwest`-backed transport
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        builder = builder.header(
            reqwest::header::CONTENT_TYPE,
            "application/json; charset=UTF-8",
        );
        if let Some(ref token) = request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.body(serde_json::to_string(body)?);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Http(format!("{} {}: {}", request.method, request.url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Http(format!("Failed to read body from {}: {}", request.url, e)))?;

        tracing::debug!("{} {} -> {}", request.method, request.url, status);
        Ok(HttpResponse { status, body })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_non_success_is_transport_error() {
        let err = HttpResponse::new(403, "{\"error\":\"denied\"}")
            .into_body()
            .unwrap_err();
        match err {
            AppError::Transport { status, body } => {
                assert_eq!(status, 403);
                assert!(body.contains("denied"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_describe_includes_bearer_and_payload() {
        let request = HttpRequest::post("https://example.com/x", json!({"a": 1})).with_bearer("T1");
        let text = request.describe();
        assert!(text.contains("https://example.com/x"));
        assert!(text.contains("Bearer T1"));
        assert!(text.contains("\"a\": 1"));
    }
}
