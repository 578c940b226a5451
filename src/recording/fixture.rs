// src/recording/fixture.rs
//! Fixture file format
//!
//! A fixture is `{status, statusText, headers, data}`. A file holds either a
//! single fixture or an array of them that is replayed round-robin.

use crate::interception::transport::{reason_phrase, TransportResponse};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn default_status() -> u16 {
    200
}

/// Accept a number or a numeric string; anything else reads as 0
fn lenient_status<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let status = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(status.unwrap_or(0))
}

/// Header values as hand-edited files write them
///
/// Arrays are joined with `", "`, scalars are stringified, nulls are dropped.
fn lenient_headers<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Object(map) = Value::deserialize(deserializer)? else {
        return Ok(BTreeMap::new());
    };

    Ok(map
        .into_iter()
        .filter_map(|(name, value)| header_value(value).map(|value| (name, value)))
        .collect())
}

fn header_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(header_value)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        other => Some(other.to_string()),
    }
}

/// One recorded response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    #[serde(default = "default_status", deserialize_with = "lenient_status")]
    pub status: u16,

    #[serde(default)]
    pub status_text: String,

    #[serde(default, deserialize_with = "lenient_headers")]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub data: Value,
}

impl Fixture {
    /// Synthetic 500 used when no real response could be obtained
    pub fn server_error(message: impl Into<String>) -> Self {
        Self {
            status: 500,
            status_text: reason_phrase(500).to_string(),
            headers: BTreeMap::new(),
            data: Value::String(message.into()),
        }
    }

    /// Convert a live response, parsing the body as JSON only when declared so
    ///
    /// Repeated header names are joined with `", "`.
    pub fn from_response(response: &TransportResponse) -> Self {
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

        let text = String::from_utf8_lossy(&response.body).into_owned();
        let is_json = headers
            .get("content-type")
            .map(|ct| is_json_media_type(ct))
            .unwrap_or(false);

        let data = if is_json && !text.is_empty() {
            serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!("Response declared as JSON could not be parsed: {}", e);
                Value::String(text)
            })
        } else {
            Value::String(text)
        };

        Self {
            status: response.status,
            status_text: response.status_text.clone(),
            headers,
            data,
        }
    }

    pub fn status_text_or_default(&self) -> String {
        if self.status_text.is_empty() {
            reason_phrase(self.effective_status()).to_string()
        } else {
            self.status_text.clone()
        }
    }

    /// Status with a zero replaced by 200
    pub fn effective_status(&self) -> u16 {
        if self.status == 0 {
            200
        } else {
            self.status
        }
    }
}

/// Contents of a fixture file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FixtureDocument {
    Sequence(Vec<Fixture>),
    Single(Fixture),
}

/// `application/json` and any `+json` suffix type
pub(crate) fn is_json_media_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    essence == "application/json" || essence.ends_with("+json")
}
