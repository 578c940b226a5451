// src/interception/transport.rs
//! Real outbound transport
//!
//! Pass-through requests and live fixture fetches both go through a
//! `Transport`. The default implementation is a hyper client over an
//! HTTPS-or-HTTP rustls connector; tests inject their own.

use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Method, Request};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

/// Request handed to the real transport
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Fully-collected response from the real transport
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    /// Header pairs in arrival order; a name may repeat
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The unintercepted way out of the process
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// Canonical reason phrase for a status code
pub fn reason_phrase(status: u16) -> &'static str {
    hyper::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

/// hyper-based transport used outside of tests
pub struct HyperTransport {
    client: Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HyperTransport {
    pub fn new() -> Self {
        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(https);

        Self { client }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|e| {
            EngineError::NetworkFailure(format!("Invalid method {}: {}", request.method, e))
        })?;

        let mut builder = Request::builder().method(method).uri(request.url.as_str());

        for (name, value) in &request.headers {
            // hyper frames the body itself
            if name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("transfer-encoding")
            {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => debug!("Skipping invalid header {}", name),
            }
        }

        let outgoing = builder
            .body(Full::new(request.body))
            .map_err(|e| EngineError::NetworkFailure(format!("Request build error: {}", e)))?;

        debug!("Live request: {} {}", request.method, request.url);

        let response = self
            .client
            .request(outgoing)
            .await
            .map_err(|e| EngineError::NetworkFailure(e.to_string()))?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| EngineError::NetworkFailure(format!("Response body error: {}", e)))?
            .to_bytes();

        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        debug!("Live response: {} ({} bytes)", parts.status, body.len());

        Ok(TransportResponse {
            status: parts.status.as_u16(),
            status_text: reason_phrase(parts.status.as_u16()).to_string(),
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_phrase() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(500), "Internal Server Error");
        assert_eq!(reason_phrase(799), "");
    }

    #[test]
    fn test_response_header_lookup() {
        let response = TransportResponse {
            status: 200,
            status_text: "OK".to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Bytes::new(),
        };
        assert_eq!(response.header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_failure() {
        let transport = HyperTransport::new();
        let result = transport
            .send(TransportRequest {
                method: "GET".to_string(),
                url: "http://127.0.0.1:1/".to_string(),
                headers: Vec::new(),
                body: Bytes::new(),
            })
            .await;

        assert!(matches!(result, Err(EngineError::NetworkFailure(_))));
    }
}
