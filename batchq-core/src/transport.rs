//! HTTP transport seam
//!
//! The publish pipeline only needs "send this request, give me back a status
//! and a body". [`HttpTransport`] captures exactly that, so tests can inject
//! a scripted transport and production code can use [`ReqwestTransport`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::{Error, Result};

/// HTTP method for a transport request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
    /// Fully-formed destination URL
    pub url: String,
    /// HTTP method
    pub method: Method,
    /// Write key sent as the authorization token, when present
    pub write_key: Option<String>,
    /// Serialized JSON request body
    pub body: String,
}

/// The raw response to a transport request.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response body text
    pub body: String,
}

impl Response {
    /// Whether the status code indicates success (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstract HTTP transport used by the publish pipeline.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Execute one request and return the server's response.
    ///
    /// An `Err` means the request never produced a response (connection
    /// failure, timeout). Non-2xx responses are returned as `Ok` and left
    /// to the caller to interpret.
    async fn execute(&self, request: Request) -> Result<Response>;
}

/// Default transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: Request) -> Result<Response> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url).body(request.body),
        };

        if let Some(write_key) = &request.write_key {
            let value = HeaderValue::from_str(write_key)
                .map_err(|e| Error::Config(format!("invalid write key: {}", e)))?;
            builder = builder.header(AUTHORIZATION, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("failed to read response body: {}", e)))?;

        Ok(Response { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_success_range() {
        assert!(Response {
            status: 200,
            body: String::new()
        }
        .is_success());
        assert!(Response {
            status: 299,
            body: String::new()
        }
        .is_success());
        assert!(!Response {
            status: 300,
            body: String::new()
        }
        .is_success());
        assert!(!Response {
            status: 500,
            body: String::new()
        }
        .is_success());
    }

    #[test]
    fn test_build_default_transport() {
        assert!(ReqwestTransport::new(Duration::from_secs(30)).is_ok());
    }
}
