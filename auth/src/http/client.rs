//! HTTP client builder shared by every call to the backend.

use std::time::Duration;

use reqwest_middleware::RequestBuilder;
use reqwest_retry::RetryTransientMiddleware;
use secrecy::ExposeSecret;

use super::TransientRetryPolicy;
use crate::session::Credentials;

/// Header carrying the device fingerprint on every authenticated request.
pub const FINGERPRINT_HEADER: &str = "X-Device-Fingerprint";

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout. A timed-out call is treated as a failed one.
    pub timeout: Duration,
    /// Maximum number of retries for transient failures.
    pub max_retries: u32,
    /// User agent string.
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_retries: 1,
            user_agent: format!("pulse/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP client with retry middleware.
pub type HttpClient = reqwest_middleware::ClientWithMiddleware;

/// Builder for the backend HTTP client.
pub struct ClientBuilder {
    config: HttpClientConfig,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: HttpClientConfig::default(),
        }
    }

    pub fn with_config(mut self, config: HttpClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the configured HTTP client.
    pub fn build(self) -> Result<HttpClient, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .user_agent(self.config.user_agent)
            .build()?;

        let retry_policy = TransientRetryPolicy::new(self.config.max_retries);
        let client_with_middleware = reqwest_middleware::ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(client_with_middleware)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Attach the bearer token and device fingerprint to a request.
pub fn authorize(request: RequestBuilder, credentials: &Credentials) -> RequestBuilder {
    request
        .bearer_auth(credentials.token.expose_secret())
        .header(FINGERPRINT_HEADER, credentials.fingerprint.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default() {
        let builder = ClientBuilder::new();
        assert_eq!(builder.config.timeout, Duration::from_secs(15));
        assert_eq!(builder.config.max_retries, 1);
        assert!(builder.config.user_agent.starts_with("pulse/"));
    }

    #[test]
    fn test_builder_overrides() {
        let builder = ClientBuilder::new().with_config(HttpClientConfig {
            timeout: Duration::from_secs(2),
            max_retries: 0,
            ..HttpClientConfig::default()
        });
        assert_eq!(builder.config.timeout, Duration::from_secs(2));
        assert_eq!(builder.config.max_retries, 0);
    }

    #[tokio::test]
    async fn test_build_client() {
        assert!(ClientBuilder::new().build().is_ok());
    }
}
