//! Graph API transport.
//!
//! Outbound platform calls go through the [`GraphTransport`] trait so tests
//! can substitute a recording implementation for the HTTP client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde_json::Value;

use herald_core::{TransportError, TransportResult};

/// Default Send API base URL.
pub const DEFAULT_API_URL: &str = "https://graph.facebook.com/v3.2/me";

/// Platform API transport: JSON POST/GET with the access token passed as a
/// query parameter.
#[async_trait]
pub trait GraphTransport: Send + Sync {
    /// Posts a JSON body and returns the parsed response.
    async fn post(&self, url: &str, token: &str, body: &Value) -> TransportResult<Value>;

    /// Issues a GET request and returns the parsed response.
    async fn get(&self, url: &str, token: &str) -> TransportResult<Value>;
}

/// A shared transport trait object.
pub type BoxedGraphTransport = Arc<dyn GraphTransport>;

/// Reqwest-backed [`GraphTransport`].
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with the default 30 second timeout.
    pub fn new() -> Self {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// Creates a transport with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    async fn read_response(resp: reqwest::Response) -> TransportResult<Value> {
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
            return Err(TransportError::Platform {
                status: status.as_u16(),
                body,
            });
        }
        resp.json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphTransport for HttpTransport {
    async fn post(&self, url: &str, token: &str, body: &Value) -> TransportResult<Value> {
        let resp = self
            .client
            .post(url)
            .query(&[("access_token", token)])
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Self::read_response(resp).await
    }

    async fn get(&self, url: &str, token: &str) -> TransportResult<Value> {
        let resp = self
            .client
            .get(url)
            .query(&[("access_token", token)])
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Self::read_response(resp).await
    }
}
