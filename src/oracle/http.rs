//! HTTP transport for data sources.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::constants::{DEFAULT_HTTP_TIMEOUT, DEFAULT_USER_AGENT};

/// Fetches a JSON document over HTTP GET
#[async_trait]
pub trait JsonHttpClient: Send + Sync {
    /// GET `url` and decode the body as JSON
    async fn get_json(&self, url: &str) -> Result<serde_json::Value>;
}

/// Configuration for the HTTP client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Timeout in milliseconds
    pub timeout_ms: u64,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_HTTP_TIMEOUT.as_millis() as u64,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// `reqwest`-backed JSON client
#[derive(Debug, Clone)]
pub struct ReqwestJsonClient {
    client: Client,
}

impl ReqwestJsonClient {
    /// Create a new client
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Create with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(&HttpClientConfig::default())
    }
}

#[async_trait]
impl JsonHttpClient for ReqwestJsonClient {
    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let http_err = |reason: String| Error::Http {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| http_err(e.to_string()))?
            .error_for_status()
            .map_err(|e| http_err(e.to_string()))?;

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| http_err(format!("invalid JSON body: {}", e)))
    }
}
