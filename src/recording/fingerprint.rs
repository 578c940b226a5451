// src/recording/fingerprint.rs
//! Deterministic fixture identity
//!
//! A fixture path is a pure function of method, protocol, hostname, pathname,
//! the sorted and filtered query, and the filtered body:
//!
//! ```text
//! <base>/<method>/<protocol>/<hostname>/<pathname>?<query>[&<body fields>].json
//! ```

use crate::interception::descriptor::RequestDescriptor;
use crate::interception::pattern_registry::TransformConfig;
use crate::recording::fixture::is_json_media_type;
use crate::utils::errors::{EngineError, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Strict query encoding: everything but `A-Z a-z 0-9 - _ . ~`
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// URI component encoding, which also leaves `! ' ( ) *` alone
const URI_COMPONENT: &AsciiSet = &QUERY_VALUE
    .remove(b'!')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*');

/// How a request body takes part in the fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyFormat {
    Form,
    Json,
    /// Any other or missing content type; folded in as an encoded string
    Text,
    Unsupported(String),
}

impl BodyFormat {
    pub fn classify(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return BodyFormat::Text;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        if essence == "application/x-www-form-urlencoded" {
            BodyFormat::Form
        } else if is_json_media_type(&essence) {
            BodyFormat::Json
        } else if essence.starts_with("multipart/") {
            BodyFormat::Unsupported(essence)
        } else {
            BodyFormat::Text
        }
    }
}

/// Query parameters keyed and iterated in sorted order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(BTreeMap<String, Vec<String>>);

impl QueryParams {
    pub fn parse(query: &str) -> Self {
        let query = query.trim_start_matches('?');
        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }

        Self(params)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    pub fn without(mut self, ignored: &BTreeSet<String>) -> Self {
        self.0.retain(|key, _| !ignored.contains(key));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `a=1&a=2&b=x%20y`, keys sorted, values in arrival order
    pub fn to_query_string(&self) -> String {
        self.0
            .iter()
            .flat_map(|(key, values)| {
                values.iter().map(move |value| {
                    format!(
                        "{}={}",
                        utf8_percent_encode(key, QUERY_VALUE),
                        utf8_percent_encode(value, QUERY_VALUE)
                    )
                })
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Resolved fixture location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Derived filename without extension (possibly a digest)
    pub filename: String,

    pub path: PathBuf,
}

impl Fingerprint {
    /// Key for per-fixture bookkeeping
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Compute where the fixture for a request lives
pub fn compute_fingerprint(
    base_dir: &Path,
    descriptor: &RequestDescriptor,
    transform: &TransformConfig,
    max_filename_len: usize,
) -> Result<Fingerprint> {
    let method = descriptor.method.to_ascii_lowercase();
    let protocol = descriptor.protocol.scheme();
    let pathname = descriptor.pathname();

    let mut query = descriptor
        .query()
        .map(QueryParams::parse)
        .unwrap_or_default()
        .without(&transform.ignore_params)
        .to_query_string();

    if !descriptor.body.is_empty() {
        fold_body(&mut query, descriptor, transform)?;
    }

    let mut filename = if query.is_empty() {
        pathname.to_string()
    } else {
        format!("{}?{}", pathname, query)
    };

    if filename.chars().count() > max_filename_len {
        filename = digest(&filename);
    }

    debug!("Generated fixture filename: {}", filename);

    // hostnames are matched case-insensitively, so they share one fixture
    let raw = format!(
        "{}/{}/{}/{}.json",
        method,
        protocol,
        descriptor.hostname.to_ascii_lowercase(),
        filename
    );

    Ok(Fingerprint {
        path: normalize_under(base_dir, &raw),
        filename,
    })
}

fn fold_body(
    query: &mut String,
    descriptor: &RequestDescriptor,
    transform: &TransformConfig,
) -> Result<()> {
    let body = descriptor.body.as_str();

    match BodyFormat::classify(descriptor.headers.content_type()) {
        BodyFormat::Form => {
            debug!("Parsing urlencoded form data");
            let fields = QueryParams::parse(body).without(&transform.ignore_data);
            append_fields(query, &fields);
        }
        BodyFormat::Json => {
            debug!("Parsing json body");
            match serde_json::from_str::<Value>(body) {
                Ok(value) => fold_json(query, value, &transform.ignore_data),
                Err(_) => warn!("JSON body of '{}' has a wrong format", descriptor.path),
            }
        }
        BodyFormat::Text => {
            let quoted = Value::String(body.to_string()).to_string();
            query.push_str(&utf8_percent_encode(&quoted, URI_COMPONENT).to_string());
        }
        BodyFormat::Unsupported(content_type) => {
            return Err(EngineError::UnimplementedBodyFormat(format!(
                "{} body parsing is not implemented",
                content_type
            )));
        }
    }

    Ok(())
}

fn fold_json(query: &mut String, value: Value, ignored: &BTreeSet<String>) {
    let object: Vec<(String, Value)> = match value {
        Value::Object(map) => map.into_iter().collect(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        Value::Null | Value::Bool(false) => return,
        Value::String(s) if s.is_empty() => return,
        Value::String(s) => {
            query.push_str(&utf8_percent_encode(&s, URI_COMPONENT).to_string());
            return;
        }
        scalar => {
            if scalar.as_f64() != Some(0.0) {
                query.push_str(&utf8_percent_encode(&scalar.to_string(), URI_COMPONENT).to_string());
            }
            return;
        }
    };

    let mut fields = QueryParams::default();
    for (key, value) in object {
        if ignored.contains(&key) {
            continue;
        }
        let flattened = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            nested => nested.to_string(),
        };
        fields.insert(key, flattened);
    }
    append_fields(query, &fields);
}

fn append_fields(query: &mut String, fields: &QueryParams) {
    let encoded = fields.to_query_string();
    if encoded.is_empty() {
        return;
    }
    if !query.is_empty() {
        query.push('&');
    }
    query.push_str(&encoded);
}

fn digest(filename: &str) -> String {
    let hash = Sha256::digest(filename.as_bytes());
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Join `relative` under `base`, dropping empty and `.` segments and never
/// climbing above `base`
fn normalize_under(base: &Path, relative: &str) -> PathBuf {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop();
            }
            _ => {}
        }
    }

    let mut path = base.to_path_buf();
    path.extend(parts);
    path
}
