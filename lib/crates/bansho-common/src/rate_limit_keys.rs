//! Fixed-window rate limit key builders and bucket arithmetic.
//!
//! Keys are bucketed by `floor(now / window_seconds)` so each window is a
//! distinct Redis key that expires on its own; no separate cleanup pass is
//! needed.

const UNKNOWN_API_KEY_SEGMENT: &str = "__unknown_key__";
const UNKNOWN_TOOL_SEGMENT: &str = "__unknown_tool__";

/// Atomically increments a fixed-window counter and sets its expiry only on
/// the first hit in the window, in one Redis round trip. `ARGV[1]` is the
/// number of seconds remaining until that window's boundary.
pub const FIXED_WINDOW_INCR_SCRIPT: &str = r"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
  redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return current
";

/// The outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_s: u32,
}

/// Build the Redis key for a per-API-key rate-limit bucket.
#[must_use]
pub fn api_key_rate_limit_key(api_key_id: &str, window_bucket: u64) -> String {
    let segment = normalize_segment(api_key_id, UNKNOWN_API_KEY_SEGMENT);
    format!("rl:{segment}:{window_bucket}")
}

/// Build the Redis key for a per-tool rate-limit bucket.
#[must_use]
pub fn tool_rate_limit_key(api_key_id: &str, tool_name: &str, window_bucket: u64) -> String {
    let key_segment = normalize_segment(api_key_id, UNKNOWN_API_KEY_SEGMENT);
    let tool_segment = normalize_segment(tool_name, UNKNOWN_TOOL_SEGMENT);
    format!("rl:{key_segment}:{tool_segment}:{window_bucket}")
}

/// The current window bucket for a given instant and window size.
#[must_use]
pub fn window_bucket(current_epoch: u64, window_seconds: u32) -> u64 {
    current_epoch / u64::from(window_seconds)
}

/// Seconds remaining until the current window's boundary.
#[must_use]
pub fn seconds_until_reset(current_epoch: u64, window_seconds: u32) -> u32 {
    let remainder = (current_epoch % u64::from(window_seconds)) as u32;
    if remainder == 0 {
        window_seconds
    } else {
        window_seconds - remainder
    }
}

/// Given the post-INCR counter value, derive the resulting
/// [`RateLimitResult`].
#[must_use]
pub fn evaluate(current_count: u32, requests: u32, reset_s: u32) -> RateLimitResult {
    RateLimitResult {
        allowed: current_count <= requests,
        remaining: requests.saturating_sub(current_count),
        reset_s,
    }
}

fn normalize_segment(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_segments_substitute_sentinels() {
        assert_eq!(
            api_key_rate_limit_key("", 5),
            "rl:__unknown_key__:5".to_string()
        );
        assert_eq!(
            api_key_rate_limit_key("   ", 5),
            "rl:__unknown_key__:5".to_string()
        );
        assert_eq!(
            tool_rate_limit_key("key-1", "", 5),
            "rl:key-1:__unknown_tool__:5".to_string()
        );
    }

    #[test]
    fn known_segments_pass_through() {
        assert_eq!(api_key_rate_limit_key("key-1", 5), "rl:key-1:5".to_string());
        assert_eq!(
            tool_rate_limit_key("key-1", "read_file", 5),
            "rl:key-1:read_file:5".to_string()
        );
    }

    #[test]
    fn bucket_and_reset_arithmetic() {
        assert_eq!(window_bucket(125, 60), 2);
        assert_eq!(seconds_until_reset(125, 60), 55);
        assert_eq!(seconds_until_reset(120, 60), 60);
        assert_eq!(seconds_until_reset(0, 60), 60);
    }

    #[test]
    fn evaluate_allows_up_to_limit() {
        let result = evaluate(5, 5, 30);
        assert!(result.allowed);
        assert_eq!(result.remaining, 0);

        let result = evaluate(6, 5, 30);
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);

        let result = evaluate(1, 5, 30);
        assert!(result.allowed);
        assert_eq!(result.remaining, 4);
    }

    proptest::proptest! {
        #[test]
        fn reset_seconds_always_in_window(epoch in 0u64..1_000_000_000, window in 1u32..100_000) {
            let reset = seconds_until_reset(epoch, window);
            proptest::prop_assert!(reset >= 1 && reset <= window);
        }

        #[test]
        fn bucket_is_monotonic_non_decreasing(epoch in 0u64..1_000_000_000, window in 1u32..100_000) {
            let b1 = window_bucket(epoch, window);
            let b2 = window_bucket(epoch + u64::from(window), window);
            proptest::prop_assert!(b2 > b1);
        }
    }
}
