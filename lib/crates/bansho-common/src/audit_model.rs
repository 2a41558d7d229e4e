//! Audit event shape and the JSON sanitizer that bounds what ends up in the
//! `audit_events` table: depth, item count, key length, string length, and
//! total serialized byte size, with sensitive keys redacted outright.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

pub const MAX_JSON_BYTES: usize = 4_096;
pub const MAX_JSON_DEPTH: usize = 6;
pub const MAX_JSON_ITEMS: usize = 40;
pub const MAX_JSON_KEY_CHARS: usize = 64;
pub const MAX_JSON_STRING_CHARS: usize = 512;
const REDACTED_VALUE: &str = "[REDACTED]";
const TRUNCATED_VALUE: &str = "[TRUNCATED]";

fn is_sensitive_key(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "api_key" | "authorization" | "password" | "secret" | "token" | "x-api-key"
    )
}

/// One row destined for the `audit_events` table, already bounded and ready
/// to serialize.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub ts: DateTime<Utc>,
    pub api_key_id: Option<String>,
    pub role: String,
    pub method: String,
    pub tool_name: String,
    pub request_json: Value,
    pub response_json: Value,
    pub status_code: i32,
    pub latency_ms: i64,
    pub decision: Value,
}

impl AuditEvent {
    /// Build an audit event, applying the same normalization and bounding
    /// rules the field validators in the original model applied.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        api_key_id: Option<&str>,
        role: &str,
        method: &str,
        tool_name: &str,
        request_json: Value,
        response_json: Value,
        status_code: i32,
        latency_ms: i64,
        decision: Value,
    ) -> Self {
        Self {
            ts: Utc::now(),
            api_key_id: normalize_optional(api_key_id),
            role: normalize_or("unknown", role),
            method: normalize_or("", method).to_uppercase(),
            tool_name: normalize_or("", tool_name),
            request_json: bound_json_payload(&request_json),
            response_json: bound_json_payload(&response_json),
            status_code,
            latency_ms,
            decision: bound_json_payload(&decision),
        }
    }

    /// Serialize the three JSON columns for insertion, ASCII-escaped with
    /// no whitespace, matching `json.dumps(..., ensure_ascii=True,
    /// separators=(",", ":"))`.
    #[must_use]
    pub fn serialized_columns(&self) -> (String, String, String) {
        (
            serialize_json(&self.request_json),
            serialize_json(&self.response_json),
            serialize_json(&self.decision),
        )
    }
}

fn normalize_optional(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(truncate_text(trimmed, MAX_JSON_STRING_CHARS))
    }
}

fn normalize_or(fallback: &str, value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        truncate_text(trimmed, MAX_JSON_STRING_CHARS)
    }
}

/// Sanitize a JSON value and, if its serialized form still exceeds
/// [`MAX_JSON_BYTES`], collapse it to a `{truncated, original_bytes,
/// preview}` envelope.
#[must_use]
pub fn bound_json_payload(value: &Value) -> Value {
    let sanitized = sanitize_json_value(value, 0);
    let encoded = serialize_json(&sanitized);
    let encoded_size = encoded.len();

    if encoded_size <= MAX_JSON_BYTES {
        return sanitized;
    }

    let preview_chars = (MAX_JSON_BYTES / 2).clamp(1, MAX_JSON_STRING_CHARS);
    let mut envelope = Map::new();
    envelope.insert("truncated".to_string(), Value::Bool(true));
    envelope.insert(
        "original_bytes".to_string(),
        Value::Number(encoded_size.into()),
    );
    envelope.insert(
        "preview".to_string(),
        Value::String(truncate_text(&encoded, preview_chars)),
    );
    Value::Object(envelope)
}

fn sanitize_json_value(value: &Value, depth: usize) -> Value {
    if depth >= MAX_JSON_DEPTH {
        return Value::String(TRUNCATED_VALUE.to_string());
    }

    match value {
        Value::Null => Value::Null,
        Value::Bool(b) => Value::Bool(*b),
        Value::Number(n) => {
            if n.is_f64() {
                match n.as_f64() {
                    Some(f) if f.is_finite() => Value::Number(n.clone()),
                    Some(f) => Value::String(truncate_text(&f.to_string(), MAX_JSON_STRING_CHARS)),
                    None => Value::Number(n.clone()),
                }
            } else {
                Value::Number(n.clone())
            }
        }
        Value::String(s) => Value::String(truncate_text(s, MAX_JSON_STRING_CHARS)),
        Value::Array(items) => {
            let mut sanitized = Vec::new();
            for (index, item) in items.iter().enumerate() {
                if index >= MAX_JSON_ITEMS {
                    sanitized.push(Value::String(TRUNCATED_VALUE.to_string()));
                    break;
                }
                sanitized.push(sanitize_json_value(item, depth + 1));
            }
            Value::Array(sanitized)
        }
        Value::Object(map) => {
            let mut sanitized = Map::new();
            let total = map.len();
            for (index, (key, item)) in map.iter().enumerate() {
                if index >= MAX_JSON_ITEMS {
                    sanitized.insert(
                        "_truncated_items".to_string(),
                        Value::String(format!("{} omitted", total - MAX_JSON_ITEMS)),
                    );
                    break;
                }
                let key_text = truncate_text(key, MAX_JSON_KEY_CHARS);
                if is_sensitive_key(&key_text) {
                    sanitized.insert(key_text, Value::String(REDACTED_VALUE.to_string()));
                    continue;
                }
                sanitized.insert(key_text, sanitize_json_value(item, depth + 1));
            }
            Value::Object(sanitized)
        }
    }
}

fn truncate_text(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return text.to_string();
    }
    const MARKER: &str = "...";
    if max_chars <= MARKER.chars().count() {
        return MARKER.chars().take(max_chars).collect();
    }
    let keep = max_chars - MARKER.chars().count();
    let prefix: String = text.chars().take(keep).collect();
    format!("{prefix}{MARKER}")
}

/// Serialize with ASCII-only escaping and no NaN/Infinity, falling back to
/// an `{unserializable, preview}` envelope if serialization somehow fails.
fn serialize_json(value: &Value) -> String {
    match serde_json::to_string(value) {
        Ok(s) => ascii_escape(&s),
        Err(_) => {
            let fallback = truncate_text(&format!("{value:?}"), MAX_JSON_STRING_CHARS);
            let mut envelope = Map::new();
            envelope.insert("unserializable".to_string(), Value::Bool(true));
            envelope.insert("preview".to_string(), Value::String(fallback));
            serde_json::to_string(&Value::Object(envelope)).unwrap_or_default()
        }
    }
}

/// `serde_json::to_string` already escapes control characters but passes
/// non-ASCII UTF-8 through verbatim; re-escape it as `\uXXXX` to match
/// `json.dumps(..., ensure_ascii=True)`.
fn ascii_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut buf = [0u16; 2];
            for unit in ch.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}
