use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Partner credentials issued for the Device Access project
    pub credentials: CredentialsConfig,
    /// Remote endpoints
    pub endpoints: EndpointsConfig,
    /// Pub/Sub event subscription
    pub events: EventsConfig,
    /// Web server settings
    pub web: WebConfig,
    /// Stream preview settings
    pub webrtc: WebRtcSettings,
}

/// Partner credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CredentialsConfig {
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Device Access project id
    pub project_id: String,
}

/// Remote endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointsConfig {
    /// Device Access REST API base
    pub api_url: String,
    /// Account linking (partner connections) base
    pub partner_connections_url: String,
    /// Resource picker page
    pub resource_picker_url: String,
    /// OAuth token endpoint for code exchange and refresh
    pub token_endpoint: String,
    /// Cloud Pub/Sub REST API base
    pub pubsub_url: String,
    /// Token endpoint for service account assertions
    pub pubsub_auth_endpoint: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            api_url: "https://smartdevicemanagement.googleapis.com/v1".to_string(),
            partner_connections_url: "https://nestservices.google.com/partnerconnections/"
                .to_string(),
            resource_picker_url: "https://sdmresourcepicker.sandbox.google.com/".to_string(),
            token_endpoint: "https://www.googleapis.com/oauth2/v4/token".to_string(),
            pubsub_url: "https://pubsub.googleapis.com/v1".to_string(),
            pubsub_auth_endpoint: "https://accounts.google.com/o/oauth2/token".to_string(),
        }
    }
}

/// Pub/Sub event subscription configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventsConfig {
    /// Subscription id (a full `projects/.../subscriptions/...` path is accepted)
    pub subscription_id: String,
    /// Service account key JSON, stored as entered
    pub service_account_key: String,
    /// Seconds between poller ticks
    pub poll_interval_secs: u64,
    /// Upper bound of messages per pull
    pub max_messages: u32,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            subscription_id: String::new(),
            service_account_key: String::new(),
            poll_interval_secs: 4,
            max_messages: 20,
        }
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP port
    pub http_port: u16,
    /// Externally visible origin, used to build the OAuth redirect URI
    pub public_url: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            http_port: 8080,
            public_url: "http://localhost:8080".to_string(),
        }
    }
}

impl WebConfig {
    /// Redirect URI registered for the OAuth client
    pub fn redirect_uri(&self) -> String {
        format!("{}/auth", self.public_url.trim_end_matches('/'))
    }
}

/// Stream preview configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebRtcSettings {
    /// ICE server URLs; empty keeps the preview on the local network
    pub ice_servers: Vec<String>,
    /// Label of the control-plane data channel
    pub data_channel_label: String,
}

impl Default for WebRtcSettings {
    fn default() -> Self {
        Self {
            ice_servers: vec![],
            data_channel_label: "dataSendChannel".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_uri() {
        let mut web = WebConfig::default();
        assert_eq!(web.redirect_uri(), "http://localhost:8080/auth");

        web.public_url = "https://console.example.com/".to_string();
        assert_eq!(web.redirect_uri(), "https://console.example.com/auth");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"credentials":{"project_id":"p-1"}}"#).unwrap();
        assert_eq!(config.credentials.project_id, "p-1");
        assert_eq!(config.events.poll_interval_secs, 4);
        assert_eq!(config.events.max_messages, 20);
        assert!(config.webrtc.ice_servers.is_empty());
    }
}
