// src/interception/response.rs
//! Response side of an outbound request
//!
//! Both intercepted and pass-through requests hand the caller a
//! `ClientResponse`: a response head plus an ordered stream of body events.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;

/// Socket-level failures reported to the caller of a request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The caller aborted the exchange
    #[error("socket hang up")]
    Aborted,

    /// Connection reset, reported one tick after an abort
    #[error("socket hang up")]
    Reset,

    /// Write or end attempted on an aborted request
    #[error("Request aborted")]
    WriteAfterAbort,

    /// Pass-through request failed in the real transport
    #[error("{0}")]
    Transport(String),
}

impl RequestError {
    /// Node-style error code
    pub fn code(&self) -> Option<&'static str> {
        match self {
            RequestError::Aborted => Some("aborted"),
            RequestError::Reset => Some("ECONNRESET"),
            RequestError::WriteAfterAbort | RequestError::Transport(_) => None,
        }
    }
}

/// Status line and headers of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub status_text: String,
    /// Lower-cased header names
    pub headers: BTreeMap<String, String>,
    /// Header pairs as they were recorded
    pub raw_headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    Data(Bytes),
    /// End of stream
    End,
    /// Exchange torn down before the stream ended
    Close(RequestError),
}

/// A response whose body arrives as discrete chunks
#[derive(Debug)]
pub struct ClientResponse {
    head: ResponseHead,
    events: mpsc::UnboundedReceiver<ResponseEvent>,
    finished: bool,
}

impl ClientResponse {
    pub(crate) fn new(head: ResponseHead, events: mpsc::UnboundedReceiver<ResponseEvent>) -> Self {
        Self {
            head,
            events,
            finished: false,
        }
    }

    /// Response whose full body is already in memory
    pub(crate) fn buffered(head: ResponseHead, body: Bytes) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        if !body.is_empty() {
            let _ = tx.send(ResponseEvent::Data(body));
        }
        let _ = tx.send(ResponseEvent::End);
        Self::new(head, rx)
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn status(&self) -> u16 {
        self.head.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.header(name)
    }

    /// Next raw body event; `None` once the stream is over
    pub async fn next_event(&mut self) -> Option<ResponseEvent> {
        if self.finished {
            return None;
        }
        let event = self.events.recv().await;
        if !matches!(event, Some(ResponseEvent::Data(_))) {
            self.finished = true;
        }
        event
    }

    /// Next body chunk; a close event surfaces as an error
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, RequestError>> {
        match self.next_event().await? {
            ResponseEvent::Data(chunk) => Some(Ok(chunk)),
            ResponseEvent::End => None,
            ResponseEvent::Close(err) => Some(Err(err)),
        }
    }

    /// Collect the whole body
    pub async fn bytes(mut self) -> Result<Bytes, RequestError> {
        let mut body = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(body.freeze())
    }

    pub async fn text(self) -> Result<String, RequestError> {
        let body = self.bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T, RequestError> {
        let body = self.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| RequestError::Transport(e.to_string()))
    }
}

impl Stream for ClientResponse {
    type Item = Result<Bytes, RequestError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.events.poll_recv(cx) {
            Poll::Ready(Some(ResponseEvent::Data(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(ResponseEvent::Close(err))) => {
                self.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Some(ResponseEvent::End)) | Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn head() -> ResponseHead {
        ResponseHead {
            method: "GET".to_string(),
            url: "http://h/".to_string(),
            status: 200,
            status_text: "OK".to_string(),
            headers: BTreeMap::from([("content-type".to_string(), "text/plain".to_string())]),
            raw_headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
        }
    }

    #[tokio::test]
    async fn test_buffered_response() {
        let response = ClientResponse::buffered(head(), Bytes::from_static(b"hello"));
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert_eq!(response.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_close_surfaces_as_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ResponseEvent::Data(Bytes::from_static(b"a"))).unwrap();
        tx.send(ResponseEvent::Close(RequestError::Aborted)).unwrap();

        let mut response = ClientResponse::new(head(), rx);
        assert_eq!(response.next().await, Some(Ok(Bytes::from_static(b"a"))));
        assert_eq!(response.next().await, Some(Err(RequestError::Aborted)));
        assert_eq!(response.next().await, None);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(RequestError::Aborted.code(), Some("aborted"));
        assert_eq!(RequestError::Reset.code(), Some("ECONNRESET"));
    }
}
