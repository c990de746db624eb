//! HTTP transport seam.
//!
//! The dispatcher only needs `GET(url, timeout) -> {status, body}`. Keeping
//! that behind [`Transport`] lets tests script upstream behaviour without a
//! socket, while [`HttpTransport`] is the reqwest-backed implementation
//! used in production.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::CatalogConfig;

/// Status and raw body of one upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// A failure below HTTP: nothing usable came back.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration)
        -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport with JSON accept headers.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &CatalogConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout(timeout)
            } else {
                TransportError::Connect(e.to_string())
            }
        };

        let resp = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(classify)?;
        Ok(TransportResponse::new(status, body.to_vec()))
    }
}
