//! Props sanitization for error reports.
//!
//! Faults carry props so a failure can be reproduced, but never the raw
//! values of sensitive keys.

use serde_json::Value;

/// Replacement for filtered values.
pub const FILTERED: &str = "[FILTERED]";

const DEFAULT_FILTERED_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "credit_card",
    "ssn",
];

/// Redacts sensitive keys and bounds the size of the rendered props.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropsSanitizer {
    filtered_keys: Vec<String>,
    max_len: usize,
}

impl Default for PropsSanitizer {
    fn default() -> Self {
        Self {
            filtered_keys: DEFAULT_FILTERED_KEYS.iter().map(|k| k.to_string()).collect(),
            max_len: 2_000,
        }
    }
}

impl PropsSanitizer {
    /// Sanitizer with a custom filter list. Keys match case-insensitively
    /// as substrings, so `secret` also filters `clientSecret`.
    pub fn new<I, S>(filtered_keys: I, max_len: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            filtered_keys: filtered_keys
                .into_iter()
                .map(|k| k.into().to_ascii_lowercase())
                .collect(),
            max_len,
        }
    }

    pub fn filtered_keys(&self) -> &[String] {
        &self.filtered_keys
    }

    fn is_filtered(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.filtered_keys.iter().any(|f| key.contains(f.as_str()))
    }

    /// Redact filtered keys at any depth.
    pub fn redact(&self, props: &Value) -> Value {
        match props {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| {
                        let value = if self.is_filtered(key) {
                            Value::String(FILTERED.to_string())
                        } else {
                            self.redact(value)
                        };
                        (key.clone(), value)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            other => other.clone(),
        }
    }

    /// Redacted props as JSON text, truncated to the configured length.
    pub fn sanitize(&self, props: &Value) -> String {
        let text = self.redact(props).to_string();
        truncate(text, self.max_len)
    }
}

fn truncate(text: String, max_len: usize) -> String {
    if text.len() <= max_len {
        return text;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... ({} bytes truncated)", &text[..cut], text.len() - cut)
}
