// src/interception/dispatcher.rs
//! Request dispatcher
//!
//! The single entry point for outbound requests. Every request is turned into
//! a `RequestDescriptor` and checked against the `PatternRegistry`:
//!
//! ```text
//! http_request(options)
//!     │
//!     ├─ no match ──> LiveRequest ──> Transport (untouched)
//!     │
//!     └─ match ─────> MockRequest (returned immediately)
//!                         │ end()
//!                         ▼
//!                     FixtureStore::get_mocked_data
//!                         │
//!                         ▼
//!                     transforms ──> respond ──> stream chunks
//! ```

use crate::interception::descriptor::{Protocol, RequestDescriptor, RequestOptions};
use crate::interception::mock_request::{MockExchange, MockRequest};
use crate::interception::pattern_registry::{PatternRegistry, TransformConfig};
use crate::interception::response::{ClientResponse, RequestError, ResponseHead};
use crate::interception::transport::{Transport, TransportRequest, TransportResponse};
use crate::observability::PASSTHROUGH;
use crate::recording::fixture::Fixture;
use crate::recording::fixture_store::FixtureStore;
use crate::utils::errors::{EngineError, Result};
use bytes::{Bytes, BytesMut};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

static INSTALLED: OnceCell<Arc<RequestDispatcher>> = OnceCell::new();

/// Place a dispatcher in the process-wide slot and activate it
///
/// Only the first call wins; later calls return the dispatcher already
/// installed.
pub fn install(dispatcher: Arc<RequestDispatcher>) -> Arc<RequestDispatcher> {
    let installed = INSTALLED.get_or_init(|| Arc::clone(&dispatcher));

    if Arc::ptr_eq(installed, &dispatcher) {
        installed.activate();
    } else {
        warn!("A request dispatcher is already installed, keeping the existing one");
    }

    Arc::clone(installed)
}

/// Dispatcher in the process-wide slot, if any
pub fn installed() -> Option<Arc<RequestDispatcher>> {
    INSTALLED.get().cloned()
}

/// Routes outbound requests to the real transport or to fixtures
pub struct RequestDispatcher {
    registry: Arc<PatternRegistry>,
    store: Arc<FixtureStore>,
    transport: Arc<dyn Transport>,
    active: AtomicBool,
}

impl RequestDispatcher {
    pub fn new(
        registry: Arc<PatternRegistry>,
        store: Arc<FixtureStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            registry,
            store,
            transport,
            active: AtomicBool::new(false),
        }
    }

    /// Start intercepting; returns `false` if already active
    pub fn activate(&self) -> bool {
        let first = !self.active.swap(true, Ordering::SeqCst);
        if first {
            info!(
                "Request interception active, fixtures in {}",
                self.store.base_dir().display()
            );
        } else {
            debug!("Request dispatcher already active");
        }
        first
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Arc<PatternRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<FixtureStore> {
        &self.store
    }

    /// Issue a request, inferring `http:` when no protocol is given
    pub fn http_request(&self, options: RequestOptions) -> Result<OutboundRequest> {
        self.dispatch(options, Protocol::Http)
    }

    /// Issue a request, inferring `https:` when no protocol is given
    pub fn https_request(&self, options: RequestOptions) -> Result<OutboundRequest> {
        self.dispatch(options, Protocol::Https)
    }

    /// Issue a GET for an absolute URL
    pub fn request_url(&self, url: &str) -> Result<OutboundRequest> {
        self.dispatch(RequestOptions::from_url(url)?, Protocol::Http)
    }

    fn dispatch(
        &self,
        options: RequestOptions,
        default_protocol: Protocol,
    ) -> Result<OutboundRequest> {
        let descriptor = RequestDescriptor::from_options(options, default_protocol)?;

        debug!(
            "Matching {}//{}{}",
            descriptor.protocol, descriptor.hostname, descriptor.path
        );

        let matched = if self.is_active() {
            self.registry.lookup(&descriptor)?
        } else {
            Default::default()
        };

        if !matched.matches {
            metrics::counter!(PASSTHROUGH).increment(1);
            return Ok(OutboundRequest::Live(LiveRequest::new(
                descriptor,
                Arc::clone(&self.transport),
            )));
        }

        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            EngineError::InterceptionFailed(
                "intercepted requests need a running tokio runtime".to_string(),
            )
        })?;

        let (request, exchange) = MockRequest::new();
        for (name, value) in descriptor.headers.iter() {
            request.set_header(name, value);
        }

        debug!(
            id = %request.id(),
            "Intercepted {} {} with {:?}",
            descriptor.method,
            descriptor.url(),
            matched.pattern
        );

        handle.spawn(drive(
            exchange,
            descriptor,
            matched.transform,
            Arc::clone(&self.store),
        ));

        Ok(OutboundRequest::Mocked(request))
    }
}

/// Resolve a fixture for an intercepted request and stream it back
async fn drive(
    mut exchange: MockExchange,
    mut descriptor: RequestDescriptor,
    transform: TransformConfig,
    store: Arc<FixtureStore>,
) {
    let Some(captured) = exchange.wait_for_body().await else {
        debug!(id = %exchange.id(), "Request aborted before its body ended");
        return;
    };

    descriptor.headers = captured.headers;
    descriptor.body = captured.body;

    let fixture = match store.get_mocked_data(&descriptor, &transform).await {
        Ok(fixture) => fixture,
        Err(e) => {
            if e.is_recoverable() {
                warn!("Failed to resolve a mock for {}: {}", descriptor.url(), e);
            } else {
                error!("Failed to resolve a mock for {}: {}", descriptor.url(), e);
            }
            Fixture::server_error(e.to_string())
        }
    };

    if exchange.is_aborted() {
        debug!(id = %exchange.id(), "Request aborted while resolving, dropping response");
        return;
    }

    let (head, payload) = shape_response(&descriptor, fixture, &transform);

    if !exchange.respond(head) {
        return;
    }
    if let Some(payload) = payload {
        exchange.enqueue(payload);
    }
    exchange.enqueue_end();
    exchange.stream().await;
}

/// Apply transforms and defaults to a fixture
///
/// The payload is the data serialized as JSON text; `null` data sends no
/// chunk at all.
fn shape_response(
    descriptor: &RequestDescriptor,
    fixture: Fixture,
    transform: &TransformConfig,
) -> (ResponseHead, Option<Bytes>) {
    let status = fixture.effective_status();
    let status_text = fixture.status_text_or_default();

    let data = match &transform.transform_response {
        Some(f) => f(fixture.data),
        None => fixture.data,
    };
    let recorded = match &transform.transform_headers {
        Some(f) => f(fixture.headers),
        None => fixture.headers,
    };

    let mut headers = BTreeMap::new();
    let mut raw_headers = Vec::with_capacity(recorded.len());
    for (name, value) in recorded {
        headers.insert(name.to_ascii_lowercase(), value.clone());
        raw_headers.push((name, value));
    }

    // replayed bodies are never compressed and may have been edited by hand
    let gzipped = headers
        .get("content-encoding")
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);
    if gzipped {
        headers.remove("content-encoding");
        raw_headers.retain(|(name, _)| !name.eq_ignore_ascii_case("content-encoding"));
    }
    headers.remove("content-length");
    raw_headers.retain(|(name, _)| !name.eq_ignore_ascii_case("content-length"));

    let payload = if data.is_null() {
        None
    } else {
        Some(Bytes::from(data.to_string()))
    };

    let head = ResponseHead {
        method: descriptor.method.clone(),
        url: descriptor.url(),
        status,
        status_text,
        headers,
        raw_headers,
    };

    (head, payload)
}

/// A request handed back to the caller
pub enum OutboundRequest {
    /// Not intercepted; goes to the real transport
    Live(LiveRequest),
    /// Intercepted; served from fixtures
    Mocked(MockRequest),
}

impl OutboundRequest {
    pub fn is_intercepted(&self) -> bool {
        matches!(self, OutboundRequest::Mocked(_))
    }

    pub fn as_mock(&mut self) -> Option<&mut MockRequest> {
        match self {
            OutboundRequest::Mocked(request) => Some(request),
            OutboundRequest::Live(_) => None,
        }
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> bool {
        match self {
            OutboundRequest::Live(request) => request.set_header(name, value),
            OutboundRequest::Mocked(request) => request.set_header(name, value),
        }
    }

    pub fn write(&mut self, chunk: impl Into<Bytes>) -> bool {
        match self {
            OutboundRequest::Live(request) => request.write(chunk),
            OutboundRequest::Mocked(request) => request.write(chunk),
        }
    }

    pub fn end(&mut self) {
        match self {
            OutboundRequest::Live(request) => request.end(),
            OutboundRequest::Mocked(request) => request.end(),
        }
    }

    pub fn end_with(&mut self, chunk: impl Into<Bytes>) {
        self.write(chunk);
        self.end();
    }

    pub fn abort(&mut self) {
        match self {
            OutboundRequest::Live(request) => request.abort(),
            OutboundRequest::Mocked(request) => request.abort(),
        }
    }

    /// Wait for the response head
    pub async fn response(&mut self) -> std::result::Result<ClientResponse, RequestError> {
        match self {
            OutboundRequest::Live(request) => request.response().await,
            OutboundRequest::Mocked(request) => request.response().await,
        }
    }
}

enum LiveState {
    Open,
    /// Ended outside a runtime; sent when the response is awaited
    Pending(TransportRequest),
    InFlight(JoinHandle<Result<TransportResponse>>),
    Done,
    Aborted,
}

/// Pass-through request sent unchanged through the real transport
pub struct LiveRequest {
    descriptor: RequestDescriptor,
    transport: Arc<dyn Transport>,
    body: BytesMut,
    state: LiveState,
}

impl LiveRequest {
    fn new(descriptor: RequestDescriptor, transport: Arc<dyn Transport>) -> Self {
        Self {
            descriptor,
            transport,
            body: BytesMut::new(),
            state: LiveState::Open,
        }
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.descriptor
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> bool {
        if !matches!(self.state, LiveState::Open) {
            return false;
        }
        self.descriptor.headers.insert(name, value);
        true
    }

    pub fn write(&mut self, chunk: impl Into<Bytes>) -> bool {
        if !matches!(self.state, LiveState::Open) {
            return false;
        }
        self.body.extend_from_slice(&chunk.into());
        true
    }

    /// Send the request
    pub fn end(&mut self) {
        if !matches!(self.state, LiveState::Open) {
            return;
        }

        let request = TransportRequest {
            method: self.descriptor.method.clone(),
            url: self.descriptor.url(),
            headers: self
                .descriptor
                .headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            body: std::mem::take(&mut self.body).freeze(),
        };

        debug!("Passing through {} {}", request.method, request.url);

        self.state = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let transport = Arc::clone(&self.transport);
                LiveState::InFlight(handle.spawn(async move { transport.send(request).await }))
            }
            Err(_) => LiveState::Pending(request),
        };
    }

    pub fn abort(&mut self) {
        if let LiveState::InFlight(task) = &self.state {
            task.abort();
        }
        if !matches!(self.state, LiveState::Done) {
            self.state = LiveState::Aborted;
        }
    }

    pub async fn response(&mut self) -> std::result::Result<ClientResponse, RequestError> {
        let result = match std::mem::replace(&mut self.state, LiveState::Done) {
            LiveState::InFlight(task) => task
                .await
                .map_err(|e| RequestError::Transport(e.to_string()))?,
            LiveState::Pending(request) => self.transport.send(request).await,
            LiveState::Open => {
                self.state = LiveState::Open;
                return Err(RequestError::Transport(
                    "request body has not been ended".to_string(),
                ));
            }
            LiveState::Aborted => {
                self.state = LiveState::Aborted;
                return Err(RequestError::Aborted);
            }
            LiveState::Done => {
                return Err(RequestError::Transport("response already taken".to_string()))
            }
        };

        let response = result.map_err(|e| RequestError::Transport(e.to_string()))?;
        Ok(live_response(&self.descriptor, response))
    }
}

fn live_response(descriptor: &RequestDescriptor, response: TransportResponse) -> ClientResponse {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in &response.headers {
        headers
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.clone());
    }

    let head = ResponseHead {
        method: descriptor.method.clone(),
        url: descriptor.url(),
        status: response.status,
        status_text: response.status_text,
        headers,
        raw_headers: response.headers,
    };

    ClientResponse::buffered(head, response.body)
}
