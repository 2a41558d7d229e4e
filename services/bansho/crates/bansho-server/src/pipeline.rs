//! The request pipeline: AUTHENTICATE → AUTHORIZE → RATE → UPSTREAM →
//! DONE, with exactly one audit event written per `tools/call`
//! regardless of which stage the request exits at.

use std::time::Instant;

use rmcp::model::{CallToolResult, ListToolsResult, Tool};
use serde_json::{json, Map, Value};

use bansho_common::rate_limit_keys::RateLimitResult;
use bansho_common::Policy;

use crate::audit::write_audit_event_best_effort;
use crate::authn::authenticate_request;
use crate::authz::{authorize_tool, AuthorizationDecision};
use crate::error::{ProxyError, UPSTREAM_FAILURE_MESSAGE};
use crate::ratelimit::{enforce_rate_limit, RateLimitDecision};
use crate::state::AppState;
use crate::upstream::UpstreamConnector;

const METHOD_TOOLS_CALL: &str = "tools/call";

/// Run the full `tools/call` pipeline, writing exactly one audit event
/// before returning.
pub async fn handle_tools_call(
    state: &AppState,
    upstream: &UpstreamConnector,
    policy: &Policy,
    meta: Option<&Value>,
    tool_name: &str,
    arguments: Option<Map<String, Value>>,
) -> Result<CallToolResult, ProxyError> {
    let start = Instant::now();
    let request_json = Value::Object(arguments.clone().unwrap_or_default());

    let auth_ctx = match authenticate_request(state, meta).await {
        Ok(ctx) => ctx,
        Err(err) => {
            audit(
                state,
                None,
                "unknown",
                tool_name,
                request_json,
                json!({}),
                i32::from(err.code),
                latency_ms(start),
                json!({
                    "auth": {"allowed": false, "reason": "unauthorized"},
                    "authz": {"reason": "not_evaluated"},
                    "rate": {"reason": "not_evaluated"},
                }),
            )
            .await;
            return Err(err);
        }
    };

    let authz_decision = authorize_tool(policy, &auth_ctx, tool_name);
    if !authz_decision.allowed {
        let err = ProxyError::forbidden();
        audit(
            state,
            Some(&auth_ctx.api_key_id),
            &auth_ctx.role,
            tool_name,
            request_json,
            json!({}),
            i32::from(err.code),
            latency_ms(start),
            json!({
                "auth": {"allowed": true},
                "authz": authz_decision_json(&authz_decision),
                "rate": {"reason": "not_evaluated"},
            }),
        )
        .await;
        return Err(err);
    }

    let rate_decision = match enforce_rate_limit(state.redis(), policy, &auth_ctx, tool_name).await
    {
        Ok(decision) => decision,
        Err(err) => {
            audit(
                state,
                Some(&auth_ctx.api_key_id),
                &auth_ctx.role,
                tool_name,
                request_json,
                json!({"error": {"code": err.code, "message": err.message, "type": "RateLimitStoreError"}}),
                i32::from(err.code),
                latency_ms(start),
                json!({
                    "auth": {"allowed": true},
                    "authz": authz_decision_json(&authz_decision),
                    "rate": {"reason": "error"},
                }),
            )
            .await;
            return Err(err);
        }
    };

    if !rate_decision.allowed() {
        let err = ProxyError::too_many_requests();
        audit(
            state,
            Some(&auth_ctx.api_key_id),
            &auth_ctx.role,
            tool_name,
            request_json,
            json!({}),
            i32::from(err.code),
            latency_ms(start),
            json!({
                "auth": {"allowed": true},
                "authz": authz_decision_json(&authz_decision),
                "rate": rate_decision_json(&rate_decision, "too_many_requests"),
            }),
        )
        .await;
        return Err(err);
    }

    match upstream.call_tool(tool_name, arguments).await {
        Ok(result) => {
            let response_json = serde_json::to_value(&result).unwrap_or_else(|_| json!({}));
            audit(
                state,
                Some(&auth_ctx.api_key_id),
                &auth_ctx.role,
                tool_name,
                request_json,
                response_json,
                200,
                latency_ms(start),
                json!({
                    "auth": {"allowed": true},
                    "authz": authz_decision_json(&authz_decision),
                    "rate": rate_decision_json(&rate_decision, "allowed"),
                }),
            )
            .await;
            Ok(result)
        }
        Err(error) => {
            let err = ProxyError::upstream_failure();
            audit(
                state,
                Some(&auth_ctx.api_key_id),
                &auth_ctx.role,
                tool_name,
                request_json,
                json!({"error": {"code": err.code, "message": UPSTREAM_FAILURE_MESSAGE, "type": "UpstreamRequestError"}}),
                i32::from(err.code),
                latency_ms(start),
                json!({
                    "auth": {"allowed": true},
                    "authz": authz_decision_json(&authz_decision),
                    "rate": rate_decision_json(&rate_decision, "allowed"),
                }),
            )
            .await;
            tracing::error!(tool = %tool_name, error = %error, "upstream call_tool failed");
            Err(err)
        }
    }
}

/// `tools/list`: authenticate, fetch the upstream's tool catalog, and
/// filter it to what the caller's role may invoke. No audit row is
/// written for this method.
pub async fn handle_tools_list(
    state: &AppState,
    upstream: &UpstreamConnector,
    policy: &Policy,
    meta: Option<&Value>,
) -> Result<ListToolsResult, ProxyError> {
    let auth_ctx = authenticate_request(state, meta).await?;

    let tools = upstream
        .list_tools()
        .await
        .map_err(|_| ProxyError::upstream_failure())?;

    let allowed_tools: Vec<Tool> = tools
        .into_iter()
        .filter(|tool| authorize_tool(policy, &auth_ctx, tool.name.as_ref()).allowed)
        .collect();

    Ok(ListToolsResult {
        tools: allowed_tools,
        next_cursor: None,
    })
}

#[allow(clippy::too_many_arguments)]
async fn audit(
    state: &AppState,
    api_key_id: Option<&str>,
    role: &str,
    tool_name: &str,
    request_json: Value,
    response_json: Value,
    status_code: i32,
    latency_ms: i64,
    decision: Value,
) {
    let event = bansho_common::AuditEvent::new(
        api_key_id,
        role,
        METHOD_TOOLS_CALL,
        tool_name,
        request_json,
        response_json,
        status_code,
        latency_ms,
        decision,
    );
    write_audit_event_best_effort(state.pg(), &event).await;
}

fn latency_ms(start: Instant) -> i64 {
    let elapsed = start.elapsed().as_secs_f64() * 1000.0;
    elapsed.round().max(0.0) as i64
}

fn authz_decision_json(decision: &AuthorizationDecision) -> Value {
    json!({
        "allowed": decision.allowed,
        "role": decision.role,
        "reason": decision.reason,
        "matched_rule": decision.matched_rule,
    })
}

fn rate_decision_json(decision: &RateLimitDecision, reason: &str) -> Value {
    json!({
        "allowed": decision.allowed(),
        "reason": reason,
        "per_api_key": rate_limit_result_json(&decision.per_api_key),
        "per_tool": decision.per_tool.as_ref().map(rate_limit_result_json),
    })
}

fn rate_limit_result_json(result: &RateLimitResult) -> Value {
    json!({
        "allowed": result.allowed,
        "remaining": result.remaining,
        "reset_s": result.reset_s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_decision_json_omits_per_tool_when_not_evaluated() {
        let decision = RateLimitDecision {
            per_api_key: RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_s: 10,
            },
            per_tool: None,
        };
        let value = rate_decision_json(&decision, "too_many_requests");
        assert_eq!(value["allowed"], json!(false));
        assert_eq!(value["per_api_key"]["reset_s"], json!(10));
        assert_eq!(value["per_tool"], json!(null));
    }

    #[test]
    fn rate_decision_json_includes_per_tool_when_evaluated() {
        let result = RateLimitResult {
            allowed: true,
            remaining: 5,
            reset_s: 30,
        };
        let decision = RateLimitDecision {
            per_api_key: result,
            per_tool: Some(result),
        };
        let value = rate_decision_json(&decision, "allowed");
        assert_eq!(value["per_tool"]["remaining"], json!(5));
    }

    #[test]
    fn authz_decision_json_carries_reason_and_rule() {
        let decision = AuthorizationDecision {
            allowed: false,
            role: "user".to_string(),
            tool_name: "admin.delete".to_string(),
            reason: "tool_not_allowed_for_role",
            matched_rule: "roles.user.allow".to_string(),
        };
        let value = authz_decision_json(&decision);
        assert_eq!(value["role"], json!("user"));
        assert_eq!(value["reason"], json!("tool_not_allowed_for_role"));
        assert_eq!(value["matched_rule"], json!("roles.user.allow"));
    }

    #[test]
    fn latency_is_never_negative() {
        let start = Instant::now();
        assert!(latency_ms(start) >= 0);
    }
}
