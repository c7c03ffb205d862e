//! Streaming HTTP transport.
//!
//! The controller only needs one capability from the network: POST a JSON
//! body with some headers and get back a status code plus the response body
//! as a stream of byte chunks. [`Transport`] is that seam; [`HttpTransport`]
//! implements it with `reqwest`, and tests substitute scripted transports.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;

/// A pinned, boxed stream of raw body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Status line and body of a streaming response.
pub struct TransportResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// POST-a-JSON-body-and-stream-the-response capability.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_stream(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &serde_json::Value,
    ) -> Result<TransportResponse>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds a client with the given connect and read timeout.
    ///
    /// The timeout bounds each read rather than the whole request, since a
    /// long turn may legitimately stream for minutes.
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wraps an existing client (shared connection pool, custom TLS, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_stream(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &serde_json::Value,
    ) -> Result<TransportResponse> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout()
            } else {
                Error::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        let body = response.bytes_stream().map(|chunk| chunk.map_err(Error::Http));

        Ok(TransportResponse {
            status,
            body: Box::pin(body),
        })
    }
}
