// src/interception/mock_request.rs
//! Emulated request/response exchange
//!
//! An intercepted request never touches a socket. Instead the caller gets a
//! `MockRequest` that behaves like one: headers are captured, body writes are
//! accumulated, and the response is delivered chunk by chunk. The dispatcher
//! drives the other end through `MockExchange`.
//!
//! # States
//!
//! ```text
//! Open ──end()──> Ended ──respond()──> Responding ──stream()──> Closed
//!   │               │                      │
//!   └───────────────┴────────abort()───────┴──> Aborted
//! ```
//!
//! Deferred signals (`continue`, `drain`, the reset error after an abort) are
//! delivered on a later scheduler tick, never from inside the call that
//! caused them.

use crate::interception::descriptor::HeaderBag;
use crate::interception::response::{ClientResponse, RequestError, ResponseEvent, ResponseHead};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Accepting body writes
    Open,
    /// Body complete, awaiting a fixture
    Ended,
    /// Streaming response chunks
    Responding,
    Closed,
    Aborted,
}

impl ExchangeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExchangeState::Closed | ExchangeState::Aborted)
    }
}

/// Signals observed on the request side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    /// `Expect: 100-continue` acknowledged
    Continue,
    Data(Bytes),
    Drain,
    Finish,
    End,
    /// Response head is available
    Response(ResponseHead),
    Abort,
    Error(RequestError),
}

/// What the caller sent, handed to the driver once the body is complete
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub headers: HeaderBag,
    pub body: String,
}

enum Chunk {
    Data(Bytes),
    End,
}

struct Exchange {
    state: ExchangeState,
    headers: HeaderBag,
    body: Vec<u8>,
    queue: VecDeque<Chunk>,
    request_tx: mpsc::UnboundedSender<RequestEvent>,
    response_tx: mpsc::UnboundedSender<ResponseEvent>,
    body_done: Option<oneshot::Sender<CapturedRequest>>,
}

impl Exchange {
    fn emit(&self, event: RequestEvent) {
        let _ = self.request_tx.send(event);
    }

    fn emit_later(&self, event: RequestEvent) {
        let tx = self.request_tx.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    let _ = tx.send(event);
                });
            }
            Err(_) => {
                let _ = tx.send(event);
            }
        }
    }
}

/// Caller side of an intercepted request
pub struct MockRequest {
    id: Ulid,
    shared: Arc<Mutex<Exchange>>,
    request_rx: mpsc::UnboundedReceiver<RequestEvent>,
    response_rx: Option<mpsc::UnboundedReceiver<ResponseEvent>>,
}

/// Driver side of an intercepted request
pub struct MockExchange {
    id: Ulid,
    shared: Arc<Mutex<Exchange>>,
    body_rx: Option<oneshot::Receiver<CapturedRequest>>,
}

impl MockRequest {
    /// Create a paired request and driver in the `Open` state
    pub fn new() -> (MockRequest, MockExchange) {
        let id = Ulid::new();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (body_tx, body_rx) = oneshot::channel();

        let shared = Arc::new(Mutex::new(Exchange {
            state: ExchangeState::Open,
            headers: HeaderBag::new(),
            body: Vec::new(),
            queue: VecDeque::new(),
            request_tx,
            response_tx,
            body_done: Some(body_tx),
        }));

        let request = MockRequest {
            id,
            shared: Arc::clone(&shared),
            request_rx,
            response_rx: Some(response_rx),
        };
        let exchange = MockExchange {
            id,
            shared,
            body_rx: Some(body_rx),
        };

        (request, exchange)
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn state(&self) -> ExchangeState {
        self.shared.lock().state
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == ExchangeState::Aborted
    }

    /// Set a header; only allowed while the body is still open
    pub fn set_header(&self, name: &str, value: &str) -> bool {
        let mut exchange = self.shared.lock();
        if exchange.state != ExchangeState::Open {
            debug!(id = %self.id, "Ignoring header {} after body end", name);
            return false;
        }

        exchange.headers.insert(name, value);

        if name.eq_ignore_ascii_case("expect") && value.eq_ignore_ascii_case("100-continue") {
            exchange.emit_later(RequestEvent::Continue);
        }
        true
    }

    pub fn get_header(&self, name: &str) -> Option<String> {
        self.shared.lock().headers.get(name).map(str::to_string)
    }

    pub fn headers(&self) -> HeaderBag {
        self.shared.lock().headers.clone()
    }

    /// Append a body chunk; returns whether it was accepted
    pub fn write(&self, chunk: impl Into<Bytes>) -> bool {
        let mut guard = self.shared.lock();
        Self::write_locked(&mut guard, chunk.into())
    }

    /// Finish the body
    pub fn end(&self) {
        self.end_inner(None);
    }

    /// Write a final chunk and finish the body
    pub fn end_with(&self, chunk: impl Into<Bytes>) {
        self.end_inner(Some(chunk.into()));
    }

    fn end_inner(&self, chunk: Option<Bytes>) {
        let mut guard = self.shared.lock();
        let exchange = &mut *guard;

        match exchange.state {
            ExchangeState::Aborted => {
                exchange.emit_later(RequestEvent::Error(RequestError::WriteAfterAbort));
            }
            ExchangeState::Open => {
                if let Some(chunk) = chunk {
                    Self::write_locked(exchange, chunk);
                }
                exchange.state = ExchangeState::Ended;
                exchange.emit(RequestEvent::Finish);
                exchange.emit(RequestEvent::End);

                let captured = CapturedRequest {
                    headers: exchange.headers.clone(),
                    body: String::from_utf8_lossy(&exchange.body).into_owned(),
                };
                if let Some(done) = exchange.body_done.take() {
                    let _ = done.send(captured);
                }
                debug!(id = %self.id, "Request body ended ({} bytes)", exchange.body.len());
            }
            _ => debug!(id = %self.id, "end() called twice"),
        }
    }

    fn write_locked(exchange: &mut Exchange, chunk: Bytes) -> bool {
        let mut accepted = false;

        match exchange.state {
            ExchangeState::Open if !chunk.is_empty() => {
                exchange.body.extend_from_slice(&chunk);
                exchange.emit(RequestEvent::Data(chunk));
                accepted = true;
            }
            ExchangeState::Aborted => {
                exchange.emit_later(RequestEvent::Error(RequestError::WriteAfterAbort));
            }
            _ => {}
        }

        exchange.emit_later(RequestEvent::Drain);
        accepted
    }

    /// Tear the exchange down from any non-terminal state
    pub fn abort(&self) {
        let mut exchange = self.shared.lock();
        if exchange.state.is_terminal() {
            return;
        }

        debug!(id = %self.id, "Aborting request in state {:?}", exchange.state);

        exchange.state = ExchangeState::Aborted;
        exchange.queue.clear();
        exchange.body_done.take();

        let _ = exchange
            .response_tx
            .send(ResponseEvent::Close(RequestError::Aborted));
        exchange.emit(RequestEvent::Abort);
        exchange.emit_later(RequestEvent::Error(RequestError::Reset));
    }

    /// Next request-side signal
    pub async fn next_event(&mut self) -> Option<RequestEvent> {
        self.request_rx.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<RequestEvent> {
        self.request_rx.try_recv().ok()
    }

    /// Wait for the response head, skipping other request signals
    pub async fn response(&mut self) -> Result<ClientResponse, RequestError> {
        loop {
            match self.request_rx.recv().await {
                Some(RequestEvent::Response(head)) => {
                    let events = self.response_rx.take().ok_or_else(|| {
                        RequestError::Transport("response already taken".to_string())
                    })?;
                    return Ok(ClientResponse::new(head, events));
                }
                Some(RequestEvent::Error(err)) => return Err(err),
                Some(_) => continue,
                None => {
                    return Err(RequestError::Transport(
                        "exchange closed without a response".to_string(),
                    ))
                }
            }
        }
    }

    /// Raw response-side events, for callers that want them before a head arrives
    pub fn take_response_events(&mut self) -> Option<mpsc::UnboundedReceiver<ResponseEvent>> {
        self.response_rx.take()
    }
}

/// A request dropped with its body still open can never end; release the driver
impl Drop for MockRequest {
    fn drop(&mut self) {
        let mut exchange = self.shared.lock();
        if exchange.state != ExchangeState::Open {
            return;
        }

        debug!(id = %self.id, "Request dropped before its body ended");
        exchange.state = ExchangeState::Aborted;
        exchange.body_done.take();
    }
}

impl MockExchange {
    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn state(&self) -> ExchangeState {
        self.shared.lock().state
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == ExchangeState::Aborted
    }

    /// Wait until the caller ends the body; `None` if it aborted first
    pub async fn wait_for_body(&mut self) -> Option<CapturedRequest> {
        let body_rx = self.body_rx.take()?;
        body_rx.await.ok()
    }

    /// Publish the response head; fails unless the body has ended
    pub fn respond(&self, head: ResponseHead) -> bool {
        let mut exchange = self.shared.lock();
        if exchange.state != ExchangeState::Ended {
            return false;
        }
        exchange.state = ExchangeState::Responding;
        exchange.emit(RequestEvent::Response(head));
        true
    }

    pub fn enqueue(&self, chunk: impl Into<Bytes>) {
        let mut exchange = self.shared.lock();
        if exchange.state != ExchangeState::Aborted {
            exchange.queue.push_back(Chunk::Data(chunk.into()));
        }
    }

    pub fn enqueue_end(&self) {
        let mut exchange = self.shared.lock();
        if exchange.state != ExchangeState::Aborted {
            exchange.queue.push_back(Chunk::End);
        }
    }

    /// Release queued chunks, one per scheduler tick
    ///
    /// Stops as soon as the exchange is aborted; anything still queued is
    /// dropped.
    pub async fn stream(&self) {
        loop {
            tokio::task::yield_now().await;

            let mut exchange = self.shared.lock();
            if exchange.state == ExchangeState::Aborted {
                exchange.queue.clear();
                return;
            }

            match exchange.queue.pop_front() {
                Some(Chunk::Data(chunk)) => {
                    let _ = exchange.response_tx.send(ResponseEvent::Data(chunk));
                }
                Some(Chunk::End) => {
                    let _ = exchange.response_tx.send(ResponseEvent::End);
                    exchange.state = ExchangeState::Closed;
                    return;
                }
                None => return,
            }
        }
    }
}
