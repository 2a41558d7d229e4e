//! Error types shared across the credential, policy, and audit modules.

use thiserror::Error;

/// Errors raised while loading or validating a policy document.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy YAML: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("invalid policy: {0}")]
    Invalid(String),
}

/// Errors raised by credential hashing and verification.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("stored hash has an unrecognized format")]
    MalformedHash,

    #[error("stored hash uses unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("stored hash has a non-positive iteration count")]
    InvalidIterations,

    #[error("stored hash salt or digest is not valid base64")]
    InvalidEncoding(#[from] base64::DecodeError),
}
