// src/testing.rs
//! In-memory transport for unit tests

use crate::interception::transport::{Transport, TransportRequest, TransportResponse};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;

/// Transport that answers every request with the same canned response
pub(crate) struct StubTransport {
    response: std::result::Result<TransportResponse, String>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl StubTransport {
    pub(crate) fn json(status: u16, body: Value) -> Self {
        Self::with_response(status, "application/json", Bytes::from(body.to_string()))
    }

    pub(crate) fn text(status: u16, body: &str) -> Self {
        Self::with_response(status, "text/plain", Bytes::from(body.to_string()))
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with_response(status: u16, content_type: &str, body: Bytes) -> Self {
        Self {
            response: Ok(TransportResponse {
                status,
                status_text: crate::interception::transport::reason_phrase(status).to_string(),
                headers: vec![
                    ("Content-Type".to_string(), content_type.to_string()),
                    ("Content-Length".to_string(), body.len().to_string()),
                ],
                body,
            }),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.requests.lock().push(request);
        tokio::task::yield_now().await;
        self.response
            .clone()
            .map_err(EngineError::NetworkFailure)
    }
}
