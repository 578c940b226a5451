// src/interception/pattern_registry.rs
//! Pattern registry for intercepted hosts
//!
//! Stores path patterns per (protocol, hostname) together with the transform
//! hooks that apply to requests they match. Patterns keep registration order
//! and the first match wins.

use crate::interception::descriptor::{Protocol, RequestDescriptor};
use crate::interception::path_pattern::{PathPattern, CATCH_ALL};
use crate::utils::errors::{EngineError, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Rewrites a fixture's data before it is delivered
pub type ResponseTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Rewrites a fixture's headers before they are delivered
pub type HeadersTransform =
    Arc<dyn Fn(BTreeMap<String, String>) -> BTreeMap<String, String> + Send + Sync>;

/// Per-route fingerprint filters and response hooks
#[derive(Clone, Default)]
pub struct TransformConfig {
    /// Query parameters left out of the fixture identity
    pub ignore_params: BTreeSet<String>,

    /// Body fields left out of the fixture identity
    pub ignore_data: BTreeSet<String>,

    pub transform_response: Option<ResponseTransform>,

    pub transform_headers: Option<HeadersTransform>,
}

impl TransformConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignore_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_params.extend(params.into_iter().map(Into::into));
        self
    }

    pub fn ignore_data<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_data.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn transform_response<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform_response = Some(Arc::new(f));
        self
    }

    pub fn transform_headers<F>(mut self, f: F) -> Self
    where
        F: Fn(BTreeMap<String, String>) -> BTreeMap<String, String> + Send + Sync + 'static,
    {
        self.transform_headers = Some(Arc::new(f));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ignore_params.is_empty()
            && self.ignore_data.is_empty()
            && self.transform_response.is_none()
            && self.transform_headers.is_none()
    }
}

impl fmt::Debug for TransformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformConfig")
            .field("ignore_params", &self.ignore_params)
            .field("ignore_data", &self.ignore_data)
            .field("transform_response", &self.transform_response.is_some())
            .field("transform_headers", &self.transform_headers.is_some())
            .finish()
    }
}

/// One pattern, a list of patterns, or every pattern of a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePatterns {
    All,
    List(Vec<String>),
}

impl RoutePatterns {
    fn into_list(self) -> Vec<String> {
        match self {
            RoutePatterns::All => Vec::new(),
            RoutePatterns::List(list) => list,
        }
    }
}

impl From<&str> for RoutePatterns {
    fn from(pattern: &str) -> Self {
        RoutePatterns::List(vec![pattern.to_string()])
    }
}

impl From<String> for RoutePatterns {
    fn from(pattern: String) -> Self {
        RoutePatterns::List(vec![pattern])
    }
}

impl From<Vec<String>> for RoutePatterns {
    fn from(patterns: Vec<String>) -> Self {
        RoutePatterns::List(patterns)
    }
}

impl From<Vec<&str>> for RoutePatterns {
    fn from(patterns: Vec<&str>) -> Self {
        RoutePatterns::List(patterns.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for RoutePatterns {
    fn from(patterns: &[&str]) -> Self {
        RoutePatterns::List(patterns.iter().map(|p| p.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for RoutePatterns {
    fn from(patterns: [&str; N]) -> Self {
        RoutePatterns::List(patterns.iter().map(|p| p.to_string()).collect())
    }
}

impl<T: Into<RoutePatterns>> From<Option<T>> for RoutePatterns {
    fn from(patterns: Option<T>) -> Self {
        patterns.map(Into::into).unwrap_or(RoutePatterns::All)
    }
}

/// Something the registry can match: a descriptor or a raw URL
#[derive(Debug, Clone, Copy)]
pub enum MatchInput<'a> {
    Descriptor(&'a RequestDescriptor),
    Url(&'a str),
}

impl<'a> From<&'a RequestDescriptor> for MatchInput<'a> {
    fn from(descriptor: &'a RequestDescriptor) -> Self {
        MatchInput::Descriptor(descriptor)
    }
}

impl<'a> From<&'a str> for MatchInput<'a> {
    fn from(url: &'a str) -> Self {
        MatchInput::Url(url)
    }
}

/// Outcome of a registry lookup
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub matches: bool,

    /// Empty unless `matches`
    pub transform: TransformConfig,

    /// Source of the pattern that matched
    pub pattern: Option<String>,
}

impl MatchResult {
    fn miss() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
struct RouteEntry {
    pattern: PathPattern,
    transform: TransformConfig,
}

type HostKey = (Protocol, String);

/// Registry of intercepted routes
pub struct PatternRegistry {
    routes: RwLock<HashMap<HostKey, Vec<RouteEntry>>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Register patterns for a host
    ///
    /// Missing or empty patterns, and a bare `/`, register the catch-all.
    /// Re-registering a pattern replaces its transform config in place.
    /// Returns the host's patterns after the update.
    pub fn register(
        &self,
        protocol: &str,
        hostname: &str,
        patterns: impl Into<RoutePatterns>,
        transform: TransformConfig,
    ) -> Result<Vec<String>> {
        if protocol.trim().is_empty() || hostname.trim().is_empty() {
            return Err(EngineError::ConfigurationError(
                "protocol and hostname are required".to_string(),
            ));
        }
        let protocol = Protocol::parse(protocol)?;
        let hostname = hostname.to_ascii_lowercase();

        let mut list = patterns.into().into_list();
        if list.is_empty() {
            list.push(CATCH_ALL.to_string());
        }

        let compiled = list
            .iter()
            .map(|p| PathPattern::compile(normalize_pattern(p)))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Registering interceptor: {}//{} {:?} {:?}",
            protocol, hostname, list, transform
        );

        let mut routes = self.routes.write();
        let entries = routes.entry((protocol, hostname)).or_default();

        for pattern in compiled {
            let entry = RouteEntry {
                pattern,
                transform: transform.clone(),
            };
            match entries
                .iter_mut()
                .find(|e| e.pattern.as_str() == entry.pattern.as_str())
            {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
        }

        Ok(pattern_sources(entries))
    }

    /// Remove patterns for a host, or all of them with `RoutePatterns::All`
    ///
    /// Returns `None` when the host was never registered.
    pub fn deregister(
        &self,
        protocol: &str,
        hostname: &str,
        patterns: impl Into<RoutePatterns>,
    ) -> Option<Vec<String>> {
        let protocol = Protocol::parse(protocol).ok()?;
        let key = (protocol, hostname.to_ascii_lowercase());

        let mut routes = self.routes.write();
        let entries = routes.get_mut(&key)?;

        match patterns.into() {
            RoutePatterns::All => entries.clear(),
            RoutePatterns::List(list) if list.is_empty() => entries.clear(),
            RoutePatterns::List(list) => {
                entries.retain(|e| {
                    !list
                        .iter()
                        .any(|p| normalize_pattern(p) == e.pattern.as_str())
                });
            }
        }

        info!("Deregistered interceptor: {}//{}", key.0, key.1);

        Some(pattern_sources(entries))
    }

    /// Match a descriptor or URL against the host's patterns
    ///
    /// Only the pathname takes part in matching; the query string does not.
    pub fn lookup<'a>(&self, input: impl Into<MatchInput<'a>>) -> Result<MatchResult> {
        let parsed;
        let descriptor = match input.into() {
            MatchInput::Descriptor(descriptor) => descriptor,
            MatchInput::Url(raw) => match RequestDescriptor::from_url(raw) {
                Ok(descriptor) => {
                    parsed = descriptor;
                    &parsed
                }
                Err(EngineError::UnsupportedProtocol(proto)) => {
                    debug!("No interceptors for protocol {}", proto);
                    return Ok(MatchResult::miss());
                }
                Err(e) => return Err(e),
            },
        };

        if descriptor.hostname.is_empty() {
            return Err(EngineError::ConfigurationError(
                "hostname is required to match a request".to_string(),
            ));
        }

        let key = (descriptor.protocol, descriptor.hostname.to_ascii_lowercase());
        let pathname = descriptor.pathname();

        let routes = self.routes.read();
        let Some(entries) = routes.get(&key) else {
            return Ok(MatchResult::miss());
        };

        match entries.iter().find(|e| e.pattern.is_match(pathname)) {
            Some(entry) => {
                debug!(
                    "Matched {}//{}{} with {}",
                    key.0,
                    key.1,
                    pathname,
                    entry.pattern.as_str()
                );
                Ok(MatchResult {
                    matches: true,
                    transform: entry.transform.clone(),
                    pattern: Some(entry.pattern.as_str().to_string()),
                })
            }
            None => Ok(MatchResult::miss()),
        }
    }

    /// Patterns registered for a host, in registration order
    pub fn patterns(&self, protocol: Protocol, hostname: &str) -> Vec<String> {
        self.routes
            .read()
            .get(&(protocol, hostname.to_ascii_lowercase()))
            .map(|entries| pattern_sources(entries))
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.routes.write().clear();
        info!("Cleared all interceptors");
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_pattern(pattern: &str) -> &str {
    if pattern.is_empty() || pattern == "/" {
        CATCH_ALL
    } else {
        pattern
    }
}

fn pattern_sources(entries: &[RouteEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| e.pattern.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_match() {
        let registry = PatternRegistry::new();
        registry
            .register("http", "api.example.com", "/users/:id", TransformConfig::new())
            .unwrap();

        let hit = registry.lookup("http://api.example.com/users/42").unwrap();
        assert!(hit.matches);
        assert_eq!(hit.pattern.as_deref(), Some("/users/:id"));

        let miss = registry.lookup("http://api.example.com/orders/42").unwrap();
        assert!(!miss.matches);
        assert!(miss.transform.is_empty());

        let other_scheme = registry.lookup("https://api.example.com/users/42").unwrap();
        assert!(!other_scheme.matches);
    }

    #[test]
    fn test_unregistered_host_never_matches() {
        let registry = PatternRegistry::new();
        registry
            .register("https:", "a.example.com", RoutePatterns::All, TransformConfig::new())
            .unwrap();

        assert!(!registry.lookup("https://b.example.com/").unwrap().matches);
        assert!(registry.lookup("https://a.example.com/any/thing").unwrap().matches);
    }

    #[test]
    fn test_register_validation() {
        let registry = PatternRegistry::new();

        assert!(matches!(
            registry.register("", "h", "/", TransformConfig::new()),
            Err(EngineError::ConfigurationError(_))
        ));
        assert!(matches!(
            registry.register("http", "", "/", TransformConfig::new()),
            Err(EngineError::ConfigurationError(_))
        ));
        assert!(matches!(
            registry.register("ftp", "h", "/", TransformConfig::new()),
            Err(EngineError::UnsupportedProtocol(_))
        ));
    }

    #[test]
    fn test_root_pattern_becomes_catch_all() {
        let registry = PatternRegistry::new();
        let patterns = registry
            .register("http", "h", "/", TransformConfig::new())
            .unwrap();

        assert_eq!(patterns, vec![CATCH_ALL.to_string()]);
        assert!(registry.lookup("http://h/deep/path").unwrap().matches);
    }

    #[test]
    fn test_reregister_overwrites_in_place() {
        let registry = PatternRegistry::new();
        registry
            .register("http", "h", ["/a", "/b"], TransformConfig::new())
            .unwrap();
        let patterns = registry
            .register("http", "h", "/a", TransformConfig::new().ignore_params(["t"]))
            .unwrap();

        assert_eq!(patterns, vec!["/a".to_string(), "/b".to_string()]);

        let hit = registry.lookup("http://h/a").unwrap();
        assert!(hit.transform.ignore_params.contains("t"));
    }

    #[test]
    fn test_first_registered_pattern_wins() {
        let registry = PatternRegistry::new();
        registry
            .register("http", "h", "/users/*", TransformConfig::new().ignore_data(["first"]))
            .unwrap();
        registry
            .register("http", "h", "/users/:id", TransformConfig::new().ignore_data(["second"]))
            .unwrap();

        let hit = registry.lookup("http://h/users/1").unwrap();
        assert_eq!(hit.pattern.as_deref(), Some("/users/*"));
        assert!(hit.transform.ignore_data.contains("first"));
    }

    #[test]
    fn test_deregister() {
        let registry = PatternRegistry::new();
        registry
            .register("http", "h", ["/a", "/b"], TransformConfig::new())
            .unwrap();

        let remaining = registry.deregister("http", "h", "/a").unwrap();
        assert_eq!(remaining, vec!["/b".to_string()]);
        assert!(!registry.lookup("http://h/a").unwrap().matches);
        assert!(registry.lookup("http://h/b").unwrap().matches);

        let remaining = registry.deregister("http:", "h", RoutePatterns::All).unwrap();
        assert!(remaining.is_empty());
        assert!(!registry.lookup("http://h/b").unwrap().matches);

        assert!(registry.deregister("http", "unknown", RoutePatterns::All).is_none());
    }

    #[test]
    fn test_query_string_ignored_for_matching() {
        let registry = PatternRegistry::new();
        registry
            .register("http", "h", "/users/:id", TransformConfig::new())
            .unwrap();

        assert!(registry.lookup("http://h/users/42?expand=true").unwrap().matches);
    }

    #[test]
    fn test_lookup_rejects_unparseable_input() {
        let registry = PatternRegistry::new();
        assert!(matches!(
            registry.lookup("not a url"),
            Err(EngineError::ConfigurationError(_))
        ));
        assert!(!registry.lookup("ftp://h/file").unwrap().matches);
    }
}
