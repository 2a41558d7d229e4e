//! Fixed-window rate limit enforcement over Redis.
//!
//! The per-API-key limit is checked first; if it denies, the per-tool
//! limit is never even evaluated. Both windows come from the
//! always-populated [`Policy`] — unlike the system this was ported
//! from, there is no separate hardcoded fallback here, since `Policy`
//! is never optional in this port and always carries its own defaults.

use bansho_common::policy::RateLimitWindow;
use bansho_common::rate_limit_keys::{
    api_key_rate_limit_key, evaluate, seconds_until_reset, tool_rate_limit_key, window_bucket,
    RateLimitResult, FIXED_WINDOW_INCR_SCRIPT,
};
use bansho_common::Policy;
use redis::aio::MultiplexedConnection;
use redis::Script;

use crate::authn::AuthContext;
use crate::error::ProxyError;

const UNKNOWN_TOOL_NAME: &str = "__unknown_tool__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub per_api_key: RateLimitResult,
    /// `None` when the per-API-key limit already denied — the tool
    /// window is never evaluated in that case.
    pub per_tool: Option<RateLimitResult>,
}

impl RateLimitDecision {
    #[must_use]
    pub fn allowed(&self) -> bool {
        self.per_api_key.allowed && self.per_tool.is_none_or(|r| r.allowed)
    }
}

/// Evaluate both rate limit windows and return the outcome. Never
/// returns `Err` for an exceeded limit — only for a genuine Redis
/// failure — so the caller can always populate the audit record with
/// the precise `remaining`/`reset_s` values before deciding the
/// response.
pub async fn enforce_rate_limit(
    mut conn: MultiplexedConnection,
    policy: &Policy,
    auth_ctx: &AuthContext,
    tool_name: &str,
) -> Result<RateLimitDecision, ProxyError> {
    let normalized_tool_name = normalize_tool_name(tool_name);
    let per_api_key_window = policy.rate_limits.per_api_key;
    let per_tool_window = policy.rate_limits.per_tool.for_tool(&normalized_tool_name);

    validate_window(per_api_key_window)?;
    validate_window(per_tool_window)?;

    let per_api_key_result = check_api_key_limit(&mut conn, &auth_ctx.api_key_id, per_api_key_window)
        .await
        .map_err(|_| ProxyError::internal())?;
    if !per_api_key_result.allowed {
        return Ok(RateLimitDecision {
            per_api_key: per_api_key_result,
            per_tool: None,
        });
    }

    let per_tool_result = check_tool_limit(
        &mut conn,
        &auth_ctx.api_key_id,
        &normalized_tool_name,
        per_tool_window,
    )
    .await
    .map_err(|_| ProxyError::internal())?;

    Ok(RateLimitDecision {
        per_api_key: per_api_key_result,
        per_tool: Some(per_tool_result),
    })
}

async fn check_api_key_limit(
    conn: &mut MultiplexedConnection,
    api_key_id: &str,
    window: RateLimitWindow,
) -> Result<RateLimitResult, redis::RedisError> {
    let current_epoch = current_epoch();
    let bucket = window_bucket(current_epoch, window.window_seconds);
    let key = api_key_rate_limit_key(api_key_id, bucket);
    check_fixed_window_limit(conn, &key, window, current_epoch).await
}

async fn check_tool_limit(
    conn: &mut MultiplexedConnection,
    api_key_id: &str,
    tool_name: &str,
    window: RateLimitWindow,
) -> Result<RateLimitResult, redis::RedisError> {
    let current_epoch = current_epoch();
    let bucket = window_bucket(current_epoch, window.window_seconds);
    let key = tool_rate_limit_key(api_key_id, tool_name, bucket);
    check_fixed_window_limit(conn, &key, window, current_epoch).await
}

async fn check_fixed_window_limit(
    conn: &mut MultiplexedConnection,
    key: &str,
    window: RateLimitWindow,
    current_epoch: u64,
) -> Result<RateLimitResult, redis::RedisError> {
    let reset_s = seconds_until_reset(current_epoch, window.window_seconds);

    let current_count: u32 = Script::new(FIXED_WINDOW_INCR_SCRIPT)
        .key(key)
        .arg(reset_s)
        .invoke_async(conn)
        .await?;

    Ok(evaluate(current_count, window.requests, reset_s))
}

/// §4.3: `requests` and `window_seconds` must be positive. `Policy`
/// loading already rejects a non-positive window (see
/// `bansho_common::policy::RateLimitWindow::validate`); this is a
/// second, defense-in-depth check at the point the limiter actually
/// divides by `window_seconds`, so a zero window can never reach
/// `window_bucket`/`seconds_until_reset` and panic.
fn validate_window(window: RateLimitWindow) -> Result<(), ProxyError> {
    if window.requests == 0 || window.window_seconds == 0 {
        tracing::error!(
            requests = window.requests,
            window_seconds = window.window_seconds,
            "invalid rate limit window reached the limiter; requests and window_seconds must be positive",
        );
        return Err(ProxyError::internal());
    }
    Ok(())
}

fn normalize_tool_name(tool_name: &str) -> String {
    let trimmed = tool_name.trim();
    if trimmed.is_empty() {
        UNKNOWN_TOOL_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

fn current_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_blank_tool_name() {
        assert_eq!(normalize_tool_name(""), UNKNOWN_TOOL_NAME);
        assert_eq!(normalize_tool_name("   "), UNKNOWN_TOOL_NAME);
        assert_eq!(normalize_tool_name("read_file"), "read_file");
    }

    #[test]
    fn validate_window_rejects_zero_requests_or_window_seconds() {
        assert!(validate_window(RateLimitWindow::new(0, 60)).is_err());
        assert!(validate_window(RateLimitWindow::new(10, 0)).is_err());
        assert!(validate_window(RateLimitWindow::new(0, 0)).is_err());
        assert!(validate_window(RateLimitWindow::new(10, 60)).is_ok());
    }

    #[test]
    fn decision_denied_when_api_key_limit_exceeded_without_tool_check() {
        let decision = RateLimitDecision {
            per_api_key: RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_s: 10,
            },
            per_tool: None,
        };
        assert!(!decision.allowed());
    }

    #[test]
    fn decision_allowed_requires_both_windows() {
        let ok = RateLimitResult {
            allowed: true,
            remaining: 1,
            reset_s: 5,
        };
        let denied = RateLimitResult {
            allowed: false,
            remaining: 0,
            reset_s: 5,
        };
        assert!(RateLimitDecision {
            per_api_key: ok,
            per_tool: Some(ok),
        }
        .allowed());
        assert!(!RateLimitDecision {
            per_api_key: ok,
            per_tool: Some(denied),
        }
        .allowed());
    }
}
