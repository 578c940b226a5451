// src/interception/mod.rs
//! Request interception layer
//!
//! - **Descriptor**: normalized view of one outbound request
//! - **Pattern Registry**: which (protocol, host, path) combinations are mocked
//! - **Dispatcher**: routes each request to the real transport or to fixtures
//! - **Mock Request**: socket-free request/response emulation
//! - **Transport**: the real, unintercepted way out of the process
//!
//! # Architecture
//!
//! ```text
//! Caller
//!     │
//!     └─ http_request() → Dispatcher ─┬─ no match → Transport
//!                                     └─ match → MockRequest ← FixtureStore
//! ```

pub mod descriptor;
pub mod dispatcher;
pub mod mock_request;
pub mod path_pattern;
pub mod pattern_registry;
pub mod response;
pub mod transport;

// Re-export commonly used types
pub use descriptor::{HeaderBag, Protocol, RequestDescriptor, RequestOptions};
pub use dispatcher::{install, installed, LiveRequest, OutboundRequest, RequestDispatcher};
pub use mock_request::{ExchangeState, MockExchange, MockRequest, RequestEvent};
pub use path_pattern::PathPattern;
pub use pattern_registry::{MatchResult, PatternRegistry, RoutePatterns, TransformConfig};
pub use response::{ClientResponse, RequestError, ResponseEvent, ResponseHead};
pub use transport::{HyperTransport, Transport, TransportRequest, TransportResponse};
