//! The pipeline's internal error type.
//!
//! Carries the status code that drives both the audit record and the
//! client-visible message. Client-visible text is always one of the
//! fixed constants below — never an internal `Display`, which is only
//! ever logged via `tracing::error!`.

use thiserror::Error;

pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";
pub const FORBIDDEN_MESSAGE: &str = "Forbidden";
pub const TOO_MANY_REQUESTS_MESSAGE: &str = "Too Many Requests";
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";
pub const UPSTREAM_FAILURE_MESSAGE: &str = "Upstream request failed";

#[derive(Debug, Error)]
#[error("proxy error {code}: {message}")]
pub struct ProxyError {
    pub code: u16,
    pub message: &'static str,
}

impl ProxyError {
    #[must_use]
    pub fn unauthorized() -> Self {
        Self {
            code: 401,
            message: UNAUTHORIZED_MESSAGE,
        }
    }

    #[must_use]
    pub fn forbidden() -> Self {
        Self {
            code: 403,
            message: FORBIDDEN_MESSAGE,
        }
    }

    #[must_use]
    pub fn too_many_requests() -> Self {
        Self {
            code: 429,
            message: TOO_MANY_REQUESTS_MESSAGE,
        }
    }

    #[must_use]
    pub fn internal() -> Self {
        Self {
            code: 500,
            message: INTERNAL_ERROR_MESSAGE,
        }
    }

    #[must_use]
    pub fn upstream_failure() -> Self {
        Self {
            code: 502,
            message: UPSTREAM_FAILURE_MESSAGE,
        }
    }
}
