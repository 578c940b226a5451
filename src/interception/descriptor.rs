// src/interception/descriptor.rs
//! Request descriptors
//!
//! `RequestOptions` is the loose, caller-facing shape of an outbound request
//! (every field optional, Node-style). The dispatcher turns it into a
//! `RequestDescriptor` with all defaults applied, which is what the registry
//! matches and the fixture store fingerprints.

use crate::utils::errors::{EngineError, Result};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Supported URL schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    /// Parse `http`, `http:`, `https` or `https:` (case-insensitive)
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == ":" {
            return Err(EngineError::ConfigurationError(
                "protocol and hostname are required".to_string(),
            ));
        }

        let scheme = trimmed.strip_suffix(':').unwrap_or(trimmed);
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(EngineError::UnsupportedProtocol(format!("{}:", other))),
        }
    }

    /// Canonical trailing-colon form
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http:",
            Protocol::Https => "https:",
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header map with case-insensitive keys that remembers the original casing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBag {
    entries: BTreeMap<String, (String, String)>,
}

impl HeaderBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header; the latest casing wins
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries
            .insert(name.to_ascii_lowercase(), (name, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    /// Original casing of a stored header name
    pub fn original_name(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(original, _)| original.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries
            .remove(&name.to_ascii_lowercase())
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(original name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("content-type")
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderBag
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bag = HeaderBag::new();
        for (name, value) in iter {
            bag.insert(name, value);
        }
        bag
    }
}

/// Caller-supplied request options; missing fields get defaults at dispatch
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Option<String>,
    pub protocol: Option<String>,
    pub hostname: Option<String>,
    /// Used as the hostname when `hostname` is absent
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Path including the query string
    pub path: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from an absolute URL
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|e| {
            EngineError::ConfigurationError(format!("Invalid URL '{}': {}", raw, e))
        })?;

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            method: None,
            protocol: Some(format!("{}:", url.scheme())),
            hostname: url.host_str().map(str::to_string),
            host: None,
            port: url.port(),
            path: Some(path),
            headers: Vec::new(),
        })
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Fully-defaulted view of one outbound request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    /// Upper-case method
    pub method: String,
    pub protocol: Protocol,
    pub hostname: String,
    /// Only used to reach the live server; never part of matching or fixture identity
    pub port: Option<u16>,
    /// Path including the query string
    pub path: String,
    pub body: String,
    pub headers: HeaderBag,
}

impl RequestDescriptor {
    /// Apply dispatch defaults: `localhost`, `/`, empty body, inferred protocol
    pub fn from_options(options: RequestOptions, default_protocol: Protocol) -> Result<Self> {
        let protocol = match options.protocol.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Protocol::parse(raw)?,
            _ => default_protocol,
        };

        let mut port = options.port;
        let hostname = match options.hostname.filter(|h| !h.is_empty()) {
            Some(hostname) => hostname,
            None => match options.host.filter(|h| !h.is_empty()) {
                Some(host) => {
                    let (hostname, host_port) = split_host_port(host);
                    port = port.or(host_port);
                    hostname
                }
                None => "localhost".to_string(),
            },
        };

        let path = options
            .path
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_string());

        Ok(Self {
            method: options
                .method
                .map(|m| m.to_ascii_uppercase())
                .unwrap_or_else(|| "GET".to_string()),
            protocol,
            hostname,
            port,
            path,
            body: String::new(),
            headers: options.headers.into_iter().collect(),
        })
    }

    /// Descriptor for a bare URL with default method and no headers
    pub fn from_url(raw: &str) -> Result<Self> {
        let options = RequestOptions::from_url(raw)?;
        if options.hostname.is_none() {
            return Err(EngineError::ConfigurationError(format!(
                "URL '{}' has no hostname",
                raw
            )));
        }
        Self::from_options(options, Protocol::Http)
    }

    /// Path without the query string
    pub fn pathname(&self) -> &str {
        self.path.split('?').next().unwrap_or("/")
    }

    pub fn query(&self) -> Option<&str> {
        self.path.split_once('?').map(|(_, query)| query)
    }

    /// Whether the method carries a request body on live fetches
    pub fn has_body_method(&self) -> bool {
        matches!(self.method.as_str(), "POST" | "PUT" | "PATCH")
    }

    /// Absolute URL used for the live request
    pub fn url(&self) -> String {
        match self.port {
            Some(port) => format!(
                "{}//{}:{}{}",
                self.protocol, self.hostname, port, self.path
            ),
            None => format!("{}//{}{}", self.protocol, self.hostname, self.path),
        }
    }
}

/// Split `name:port`; bracketed IPv6 literals keep their brackets
fn split_host_port(host: String) -> (String, Option<u16>) {
    match host.rsplit_once(':') {
        Some((name, port))
            if (!name.contains(':') || name.ends_with(']'))
                && !port.is_empty()
                && port.chars().all(|c| c.is_ascii_digit()) =>
        {
            (name.to_string(), port.parse().ok())
        }
        _ => (host, None),
    }
}
