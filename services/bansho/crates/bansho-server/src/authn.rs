//! Credential extraction and authentication.
//!
//! The only transport wired today is stdio, which carries no native
//! HTTP headers or query string. Callers that need to present a
//! `Authorization`/`X-API-Key` header or an `api_key` query parameter
//! do so by mirroring them into the MCP request's `_meta` object under
//! `headers`, `query`, or `query_params` keys — the `_meta` rmcp
//! surfaces on every request's `RequestContext` (see `server.rs`),
//! not something smuggled through a tool call's arguments. Extraction
//! here only ever looks at the resulting JSON value, so a future HTTP
//! transport needs no changes here.

use serde_json::Value;

use bansho_common::credentials::resolve_api_key;

use crate::error::ProxyError;
use crate::state::AppState;

/// Identity resolved from a presented API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub api_key_id: String,
    pub role: String,
}

/// Authenticate a request, given whatever `_meta` object (if any) it
/// carried. Native transport headers/query params are empty on stdio
/// and can be passed as empty maps.
pub async fn authenticate_request(
    state: &AppState,
    meta: Option<&Value>,
) -> Result<AuthContext, ProxyError> {
    let presented_key = extract_api_key(meta).ok_or_else(ProxyError::unauthorized)?;

    let resolved = resolve_api_key(state.pg(), &presented_key)
        .await
        .map_err(|_| ProxyError::unauthorized())?
        .ok_or_else(ProxyError::unauthorized)?;

    let api_key_id = normalize_string(Some(resolved.api_key_id.as_str()));
    let role = normalize_string(Some(resolved.role.as_str()));

    match (api_key_id, role) {
        (Some(api_key_id), Some(role)) => Ok(AuthContext { api_key_id, role }),
        _ => Err(ProxyError::unauthorized()),
    }
}

/// Extract a presented API key from a request's `_meta` object, trying
/// `Authorization: Bearer <token>`, then `X-API-Key`, then the `api_key`
/// query parameter, in that order.
#[must_use]
pub fn extract_api_key(meta: Option<&Value>) -> Option<String> {
    let headers = extract_headers(meta);

    if let Some(token) = extract_bearer_token(headers.get("authorization").map(String::as_str)) {
        return Some(token);
    }

    if let Some(key) = normalize_string(headers.get("x-api-key").map(String::as_str)) {
        return Some(key);
    }

    let query = extract_query_params(meta);
    normalize_string(query.get("api_key").map(String::as_str))
}

fn extract_headers(meta: Option<&Value>) -> std::collections::HashMap<String, String> {
    let mut headers = std::collections::HashMap::new();
    merge_string_mapping(&mut headers, meta_entry(meta, "headers"));
    headers
}

fn extract_query_params(meta: Option<&Value>) -> std::collections::HashMap<String, String> {
    let mut query = std::collections::HashMap::new();
    merge_string_mapping(&mut query, meta_entry(meta, "query"));
    merge_string_mapping(&mut query, meta_entry(meta, "query_params"));
    query
}

fn meta_entry<'a>(meta: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    meta?.as_object()?.get(key)
}

fn merge_string_mapping(target: &mut std::collections::HashMap<String, String>, source: Option<&Value>) {
    let Some(object) = source.and_then(Value::as_object) else {
        return;
    };
    for (key, value) in object {
        let (Some(key), Some(value)) = (
            normalize_string(Some(key.as_str())),
            normalize_string(value.as_str()),
        ) else {
            continue;
        };
        target.insert(key.to_lowercase(), value);
    }
}

fn extract_bearer_token(authorization_header: Option<&str>) -> Option<String> {
    let normalized = normalize_string(authorization_header)?;
    let mut parts = normalized.splitn(2, char::is_whitespace);
    let scheme = parts.next()?;
    let token = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    normalize_string(Some(token))
}

fn normalize_string(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_bearer_token_from_meta_headers() {
        let meta = json!({"headers": {"Authorization": "Bearer msl_abc"}});
        assert_eq!(extract_api_key(Some(&meta)), Some("msl_abc".to_string()));
    }

    #[test]
    fn falls_back_to_x_api_key_header() {
        let meta = json!({"headers": {"x-api-key": "msl_xyz"}});
        assert_eq!(extract_api_key(Some(&meta)), Some("msl_xyz".to_string()));
    }

    #[test]
    fn falls_back_to_query_param() {
        let meta = json!({"query": {"api_key": "msl_q"}});
        assert_eq!(extract_api_key(Some(&meta)), Some("msl_q".to_string()));
    }

    #[test]
    fn query_params_key_also_merges() {
        let meta = json!({"query_params": {"api_key": "msl_qp"}});
        assert_eq!(extract_api_key(Some(&meta)), Some("msl_qp".to_string()));
    }

    #[test]
    fn rejects_non_bearer_scheme() {
        let meta = json!({"headers": {"authorization": "Basic xyz"}});
        assert_eq!(extract_api_key(Some(&meta)), None);
    }

    #[test]
    fn no_meta_yields_none() {
        assert_eq!(extract_api_key(None), None);
    }

    #[test]
    fn bearer_takes_precedence_over_x_api_key() {
        let meta = json!({
            "headers": {
                "authorization": "Bearer msl_bearer",
                "x-api-key": "msl_header",
            },
        });
        assert_eq!(extract_api_key(Some(&meta)), Some("msl_bearer".to_string()));
    }
}
