//! Fleetwatch endpoint configuration
//!
//! Holds the two base URLs a deployment exposes: the REST API (commands) and
//! the WebSocket API (subscriptions). Values come from explicit arguments or
//! the `FLEETWATCH_API_URL` / `FLEETWATCH_WS_URL` environment variables.

use crate::error::{FleetError, Result};
use url::Url;

/// Default API base for a local development backend
const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
/// Default WebSocket base for a local development backend
const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8000";

#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Base URL for REST command calls, e.g. `https://host/api`
    pub api_url: Url,
    /// Base URL for WebSocket subscriptions, e.g. `wss://host/api`
    pub ws_url: Url,
}

impl FleetConfig {
    pub fn new(api_url: &str, ws_url: &str) -> Result<Self> {
        let api_url = Url::parse(api_url)?;
        let ws_url = Url::parse(ws_url)?;

        match ws_url.scheme() {
            "ws" | "wss" => {},
            other => {
                return Err(FleetError::InvalidTarget(format!(
                    "WebSocket URL must use ws:// or wss://, got {}://",
                    other
                )))
            },
        }

        Ok(Self { api_url, ws_url })
    }

    /// Read configuration from the environment, falling back to the local
    /// development defaults.
    pub fn from_env() -> Result<Self> {
        let api_url =
            std::env::var("FLEETWATCH_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let ws_url =
            std::env::var("FLEETWATCH_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
        Self::new(&api_url, &ws_url)
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            ws_url: Url::parse(DEFAULT_WS_URL).expect("default WS URL is valid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_accepts_ws_schemes() {
        let config = FleetConfig::new("https://fleet.example.com/api", "wss://fleet.example.com/api")
            .unwrap();
        assert_eq!(config.ws_url.scheme(), "wss");
    }

    #[test]
    fn test_config_rejects_http_ws_url() {
        let result = FleetConfig::new("https://fleet.example.com", "https://fleet.example.com");
        assert!(matches!(result, Err(FleetError::InvalidTarget(_))));
    }

    #[test]
    fn test_config_rejects_garbage_url() {
        let result = FleetConfig::new("not a url", "ws://ok");
        assert!(matches!(result, Err(FleetError::Url(_))));
    }
}
