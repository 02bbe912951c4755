//! How signed requests reach the relay.
//!
//! [`RelayTransport`] is the seam: production uses [`HttpTransport`]
//! (reqwest), tests plug the relay router in directly.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::ClientConfig;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub method: &'static str,
    /// Path and query, e.g. `/vaults/<id>/updates?after=3`.
    pub path: String,
    pub headers: Vec<(&'static str, String)>,
    /// JSON body bytes.
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RelayResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Deliver one request. An `Err` means the relay was not reached or the
    /// exchange broke off; any HTTP status, errors included, is `Ok`.
    async fn execute(&self, request: RelayRequest) -> Result<RelayResponse>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tally-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(config.relay_url.clone(), config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RelayTransport for HttpTransport {
    async fn execute(&self, request: RelayRequest) -> Result<RelayResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        tracing::trace!(method = request.method, path = %request.path, status, "relay call");
        Ok(RelayResponse { status, body })
    }
}
