// src/interception/path_pattern.rs
//! Route path patterns
//!
//! Syntax:
//!
//! - `:name` matches exactly one path segment
//! - `:name?` optional segment, `:name+` one or more segments,
//!   `:name*` zero or more segments
//! - `:name(\d+)` constrains the segment with a custom expression
//! - `*` matches anything, across segments (`/*` is the catch-all)
//! - `\` escapes the next character
//!
//! Matching is case-insensitive and tolerates one trailing slash.

use crate::utils::errors::{EngineError, Result};
use regex::Regex;

/// Pattern every route defaults to
pub const CATCH_ALL: &str = "/*";

const SEGMENT: &str = "[^/]+?";

/// A compiled path pattern
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let expression = translate(pattern)?;

        let regex = Regex::new(&expression).map_err(|e| {
            EngineError::ConfigurationError(format!("Invalid path pattern '{}': {}", pattern, e))
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

fn translate(pattern: &str) -> Result<String> {
    let body = if pattern.len() > 1 {
        pattern.strip_suffix('/').unwrap_or(pattern)
    } else {
        pattern
    };

    let chars: Vec<char> = body.chars().collect();
    let mut expression = String::from("(?i)^");
    let mut literal = String::new();
    let mut params = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                literal.push(chars[i + 1]);
                i += 2;
            }
            ':' if chars.get(i + 1).is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_') => {
                let prefixed = literal.ends_with('/');
                if prefixed {
                    literal.pop();
                }
                expression.push_str(&regex::escape(&literal));
                literal.clear();

                i += 1;
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                if params.contains(&name) {
                    return Err(EngineError::ConfigurationError(format!(
                        "Duplicate parameter ':{}' in pattern '{}'",
                        name, pattern
                    )));
                }

                let segment = if chars.get(i) == Some(&'(') {
                    let (custom, next) = read_group(&chars, i, pattern)?;
                    i = next;
                    custom
                } else {
                    SEGMENT.to_string()
                };

                let modifier = match chars.get(i) {
                    Some(c @ ('?' | '*' | '+')) => {
                        i += 1;
                        Some(*c)
                    }
                    _ => None,
                };

                let prefix = if prefixed { "/" } else { "" };
                let token = match modifier {
                    None => format!("{}(?P<{}>{})", prefix, name, segment),
                    Some('?') => format!("(?:{}(?P<{}>{}))?", prefix, name, segment),
                    Some('+') => format!(
                        "(?:{}(?P<{}>{}(?:/{})*))",
                        prefix, name, segment, segment
                    ),
                    Some(_) => format!(
                        "(?:{}(?P<{}>{}(?:/{})*))?",
                        prefix, name, segment, segment
                    ),
                };
                expression.push_str(&token);
                params.push(name);
            }
            '*' => {
                expression.push_str(&regex::escape(&literal));
                literal.clear();
                expression.push_str("(?:.*)");
                i += 1;
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }

    expression.push_str(&regex::escape(&literal));
    expression.push_str("/?$");

    Ok(expression)
}

/// Read a balanced `( ... )` group starting at `open`; returns its body and the next index
fn read_group(chars: &[char], open: usize, pattern: &str) -> Result<(String, usize)> {
    let mut depth = 0usize;
    let mut i = open;

    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    let body: String = chars[open + 1..i].iter().collect();
                    if body.is_empty() {
                        break;
                    }
                    return Ok((format!("(?:{})", body), i + 1));
                }
            }
            _ => {}
        }
        i += 1;
    }

    Err(EngineError::ConfigurationError(format!(
        "Unbalanced or empty group in pattern '{}'",
        pattern
    )))
}
