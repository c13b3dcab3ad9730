//! Client configuration.

use std::time::Duration;

use url::Url;

use crate::error::{ClientError, ClientResult};

/// Generation client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Endpoint that accepts generation requests
    pub endpoint: Url,
    /// Bearer token sent with each request
    pub api_key: Option<String>,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: &str) -> ClientResult<Self> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            api_key: None,
            request_timeout: Duration::from_secs(120),
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Create config from environment variables.
    pub fn from_env() -> ClientResult<Self> {
        let endpoint = std::env::var("GENBATCH_GENERATION_URL")
            .map_err(|_| ClientError::config_error("GENBATCH_GENERATION_URL not set"))?;

        let mut config = Self::new(&endpoint)?;
        config.api_key = std::env::var("GENBATCH_API_KEY").ok().filter(|k| !k.is_empty());
        config.request_timeout = Duration::from_secs(
            std::env::var("GENBATCH_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(120),
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = ClientConfig::new("https://api.example.com/generate")
            .unwrap()
            .with_api_key("secret")
            .with_request_timeout(Duration::from_secs(5));
        assert_eq!(config.endpoint.path(), "/generate");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(matches!(
            ClientConfig::new("not a url"),
            Err(ClientError::InvalidUrl(_))
        ));
    }
}
