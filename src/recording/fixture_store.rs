// src/recording/fixture_store.rs
//! Fixture store
//!
//! Resolves a request to a fixture file. Existing fixtures are replayed (array
//! fixtures round-robin); on a miss the store performs exactly one live
//! request through the real transport, persists the result and serves it.

use crate::interception::descriptor::RequestDescriptor;
use crate::interception::pattern_registry::TransformConfig;
use crate::interception::transport::{Transport, TransportRequest};
use crate::observability::{FIXTURE_HITS, FIXTURE_MALFORMED, FIXTURE_RECORDED};
use crate::recording::fingerprint::{compute_fingerprint, Fingerprint};
use crate::recording::fixture::{Fixture, FixtureDocument};
use crate::utils::config::DEFAULT_MAX_FILENAME_LEN;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Replay position of one array fixture
#[derive(Debug, Default)]
struct CycleState {
    next: usize,
}

/// On-disk fixture store
pub struct FixtureStore {
    base_dir: PathBuf,
    max_filename_len: usize,
    transport: Arc<dyn Transport>,
    /// Per-fixture lock and cycle counter
    cycles: DashMap<String, Arc<Mutex<CycleState>>>,
}

impl FixtureStore {
    pub fn new(base_dir: impl Into<PathBuf>, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_filename_len: DEFAULT_MAX_FILENAME_LEN,
            transport,
            cycles: DashMap::new(),
        }
    }

    pub fn with_max_filename_len(mut self, max_filename_len: usize) -> Self {
        self.max_filename_len = max_filename_len;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn compute_fingerprint(
        &self,
        descriptor: &RequestDescriptor,
        transform: &TransformConfig,
    ) -> Result<Fingerprint> {
        compute_fingerprint(&self.base_dir, descriptor, transform, self.max_filename_len)
    }

    /// Replay the fixture for a request, recording it first if needed
    ///
    /// Only an unsupported body format is reported as an error; malformed
    /// fixtures, failed fetches and failed writes are recovered here.
    pub async fn get_mocked_data(
        &self,
        descriptor: &RequestDescriptor,
        transform: &TransformConfig,
    ) -> Result<Fixture> {
        let fingerprint = self.compute_fingerprint(descriptor, transform)?;
        let friendly = friendly_path(&fingerprint.path);

        debug!("Getting mocked data for {} from {}", descriptor.url(), friendly);

        let lock = self
            .cycles
            .entry(fingerprint.key())
            .or_default()
            .value()
            .clone();
        let mut cycle = lock.lock().await;

        match read_fixture(&fingerprint.path).await {
            Ok(Some(FixtureDocument::Single(fixture))) => {
                metrics::counter!(FIXTURE_HITS).increment(1);
                return Ok(fixture);
            }
            Ok(Some(FixtureDocument::Sequence(mut fixtures))) if !fixtures.is_empty() => {
                let len = fixtures.len();
                let current = cycle.next % len;
                cycle.next = (current + 1) % len;

                debug!("Serving response {} of {} from {}", current + 1, len, friendly);
                metrics::counter!(FIXTURE_HITS).increment(1);
                return Ok(fixtures.swap_remove(current));
            }
            Ok(Some(FixtureDocument::Sequence(_))) => {
                metrics::counter!(FIXTURE_MALFORMED).increment(1);
                warn!(
                    "Mock file {} for {} has wrong format: empty response list",
                    friendly, descriptor.path
                );
            }
            Ok(None) => {}
            Err(e) => {
                metrics::counter!(FIXTURE_MALFORMED).increment(1);
                warn!("Mock file {} for {} has wrong format: {}", friendly, descriptor.path, e);
            }
        }

        let fixture = self.get_original_data(descriptor).await;

        if fixture.status == 404 {
            warn!("Writing the mock for non existent resource {}", descriptor.path);
        } else if fixture.status >= 500 {
            warn!(
                "Writing the mock for {} with an error {}: {}\n    Please review the content of {}",
                descriptor.path, fixture.status, fixture.status_text, friendly
            );
        }

        match write_fixture(&fingerprint.path, &fixture).await {
            Ok(()) => {
                metrics::counter!(FIXTURE_RECORDED).increment(1);
                info!("Mocked data written to {}", friendly);
            }
            Err(e) => error!("{}", e),
        }

        Ok(fixture)
    }

    /// Perform the one real request for a fixture miss
    ///
    /// Never fails: a transport error becomes a synthetic 500 fixture.
    pub async fn get_original_data(&self, descriptor: &RequestDescriptor) -> Fixture {
        debug!("Getting original data for {}", descriptor.url());

        let body = if descriptor.has_body_method() {
            Bytes::from(descriptor.body.clone())
        } else {
            Bytes::new()
        };

        let request = TransportRequest {
            method: descriptor.method.clone(),
            url: descriptor.url(),
            headers: descriptor
                .headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            body,
        };

        match self.transport.send(request).await {
            Ok(response) => Fixture::from_response(&response),
            Err(e) => {
                let message = match e {
                    EngineError::NetworkFailure(message) => message,
                    other => other.to_string(),
                };
                warn!(
                    "Failed to fetch the original data, request failed with an error:\n{}",
                    message
                );
                Fixture::server_error(message)
            }
        }
    }
}

/// Read and parse a fixture; `Ok(None)` when absent or empty
async fn read_fixture(path: &Path) -> Result<Option<FixtureDocument>> {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(_) => return Ok(None),
    };
    if !metadata.is_file() || metadata.len() == 0 {
        return Ok(None);
    }

    let malformed = |reason: String| EngineError::MalformedFixture {
        path: friendly_path(path),
        reason,
    };

    let raw = fs::read(path).await.map_err(|e| malformed(e.to_string()))?;
    let document = serde_json::from_slice(&raw).map_err(|e| malformed(e.to_string()))?;

    Ok(Some(document))
}

async fn write_fixture(path: &Path, fixture: &Fixture) -> Result<()> {
    let failed = |e: std::io::Error| {
        EngineError::FilesystemFailure(format!("Failed to write {}: {}", path.display(), e))
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(failed)?;
    }

    let content = serde_json::to_vec_pretty(fixture)
        .map_err(|e| EngineError::FilesystemFailure(format!("Serialization error: {}", e)))?;

    fs::write(path, content).await.map_err(failed)
}

/// Path relative to the working directory when possible, for log messages
fn friendly_path(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(&cwd).ok().map(|p| format!("./{}", p.display())))
        .unwrap_or_else(|| path.display().to_string())
}
