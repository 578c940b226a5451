// src/mocks.rs
//! High-level mocking facade
//!
//! `Mocks` wires a registry, a fixture store and a transport into an active
//! `RequestDispatcher`, and accepts hosts in the loose form people write them
//! in: `api.example.com`, `https://api.example.com`, `localhost:3000`.

use crate::interception::dispatcher::{self, RequestDispatcher};
use crate::interception::pattern_registry::{PatternRegistry, RoutePatterns, TransformConfig};
use crate::interception::transport::{HyperTransport, Transport};
use crate::recording::fixture_store::FixtureStore;
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

pub struct Mocks {
    config: EngineConfig,
    dispatcher: Arc<RequestDispatcher>,
}

impl Mocks {
    /// Build and activate an engine over the given transport
    ///
    /// Fails in the `production` environment unless `unsafe_mode` is set.
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        config.ensure_safe()?;

        let store = FixtureStore::new(config.fixture_dir(), Arc::clone(&transport))
            .with_max_filename_len(config.fixtures.max_filename_len);

        let dispatcher = Arc::new(RequestDispatcher::new(
            Arc::new(PatternRegistry::new()),
            Arc::new(store),
            transport,
        ));
        dispatcher.activate();

        info!("Mocks ready for the {} environment", config.env);

        Ok(Self { config, dispatcher })
    }

    /// Build an engine that records through the default hyper transport
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        Self::new(config, Arc::new(HyperTransport::new()))
    }

    /// Build an engine from `replay.toml` and `REPLAY_*` variables
    pub fn load() -> Result<Self> {
        Self::from_config(EngineConfig::load()?)
    }

    /// Intercept routes of a host
    ///
    /// A host without a scheme is intercepted over both http and https.
    pub fn intercept(
        &self,
        host: &str,
        routes: impl Into<RoutePatterns>,
        transform: TransformConfig,
    ) -> Result<()> {
        let routes = routes.into();
        debug!("Intercept host {} with routes {:?}", host, routes);

        for (protocol, hostname) in normalize_host(host)? {
            self.dispatcher.registry().register(
                protocol,
                &hostname,
                routes.clone(),
                transform.clone(),
            )?;
        }
        Ok(())
    }

    /// Stop intercepting routes of a host, or all of its routes
    pub fn restore(&self, host: &str, routes: impl Into<RoutePatterns>) -> Result<()> {
        let routes = routes.into();
        debug!("Restore host {} with routes {:?}", host, routes);

        for (protocol, hostname) in normalize_host(host)? {
            self.dispatcher
                .registry()
                .deregister(protocol, &hostname, routes.clone());
        }
        Ok(())
    }

    pub fn dispatcher(&self) -> &Arc<RequestDispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn fixture_dir(&self) -> &Path {
        self.dispatcher.store().base_dir()
    }

    /// Make this engine the process-wide dispatcher
    pub fn install(&self) -> Arc<RequestDispatcher> {
        dispatcher::install(Arc::clone(&self.dispatcher))
    }
}

/// Expand a host into `(protocol, hostname)` pairs
fn normalize_host(host: &str) -> Result<Vec<(&'static str, String)>> {
    let host = host.trim();
    if host.is_empty() {
        return Err(EngineError::ConfigurationError(
            "host must not be empty".to_string(),
        ));
    }

    match host.split_once("://") {
        Some((scheme, _)) => {
            let protocol = match scheme.to_ascii_lowercase().as_str() {
                "http" => "http:",
                "https" => "https:",
                other => return Err(EngineError::UnsupportedProtocol(format!("{}:", other))),
            };
            Ok(vec![(protocol, hostname_of(host)?)])
        }
        None => {
            let hostname = hostname_of(&format!("http://{}", host))?;
            Ok(vec![("http:", hostname.clone()), ("https:", hostname)])
        }
    }
}

fn hostname_of(raw: &str) -> Result<String> {
    Url::parse(raw)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .ok_or_else(|| EngineError::ConfigurationError(format!("Invalid host '{}'", raw)))
}
