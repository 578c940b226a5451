// src/recording/mod.rs
//! Fixture recording and replay
//!
//! - **Fingerprint**: deterministic fixture path for a request
//! - **Fixture**: the on-disk JSON format
//! - **Fixture Store**: replay from disk, record on a miss
//!
//! # Layout
//!
//! ```text
//! <base_dir>/<METHOD>/<protocol>/<hostname>/<filename>.json
//! ```

pub mod fingerprint;
pub mod fixture;
pub mod fixture_store;

// Re-export commonly used types
pub use fingerprint::{compute_fingerprint, BodyFormat, Fingerprint, QueryParams};
pub use fixture::{Fixture, FixtureDocument};
pub use fixture_store::FixtureStore;
