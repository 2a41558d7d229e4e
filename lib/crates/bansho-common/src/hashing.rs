//! PBKDF2-HMAC-SHA256 API key generation, hashing, and verification.
//!
//! Hash format: `pbkdf2_sha256$<iterations>$<salt_b64>$<digest_b64>`, where
//! `salt_b64`/`digest_b64` use standard (padded) base64. Verification always
//! re-derives the digest and compares in constant time; it never raises —
//! any malformed input is treated as a non-match.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::HashError;

pub const PBKDF2_SCHEME: &str = "pbkdf2_sha256";
pub const PBKDF2_ITERATIONS: u32 = 210_000;
pub const API_KEY_PREFIX: &str = "msl_";
const SALT_BYTES: usize = 16;
const TOKEN_BYTES: usize = 32;
const DIGEST_BYTES: usize = 32;

/// Generate a new random API key with the standard `msl_` prefix.
#[must_use]
pub fn generate_api_key() -> String {
    generate_api_key_with_prefix(API_KEY_PREFIX)
}

/// Generate a new random API key with a custom prefix (used in tests).
#[must_use]
pub fn generate_api_key_with_prefix(prefix: &str) -> String {
    let mut token = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut token);
    format!("{prefix}{}", URL_SAFE_NO_PAD.encode(token))
}

/// Hash an API key for storage, using the default iteration count.
#[must_use]
pub fn hash_api_key(api_key: &str) -> String {
    hash_api_key_with_iterations(api_key, PBKDF2_ITERATIONS)
}

/// Hash an API key for storage with an explicit iteration count.
///
/// Exposed separately so tests can use a cheap iteration count without
/// touching the production default.
#[must_use]
pub fn hash_api_key_with_iterations(api_key: &str, iterations: u32) -> String {
    let mut salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt);

    let digest = derive(api_key.as_bytes(), &salt, iterations);

    format!(
        "{PBKDF2_SCHEME}${iterations}${}${}",
        STANDARD.encode(salt),
        STANDARD.encode(digest),
    )
}

/// Verify an API key against a stored hash.
///
/// Returns `false` for any malformed hash rather than propagating an error —
/// a corrupt stored hash must never be distinguishable from a wrong key.
#[must_use]
pub fn verify_api_key(api_key: &str, stored_hash: &str) -> bool {
    match parse_and_verify(api_key, stored_hash) {
        Ok(matched) => matched,
        Err(_) => false,
    }
}

fn parse_and_verify(api_key: &str, stored_hash: &str) -> Result<bool, HashError> {
    let mut parts = stored_hash.splitn(4, '$');
    let scheme = parts.next().ok_or(HashError::MalformedHash)?;
    let iterations_text = parts.next().ok_or(HashError::MalformedHash)?;
    let salt_b64 = parts.next().ok_or(HashError::MalformedHash)?;
    let digest_b64 = parts.next().ok_or(HashError::MalformedHash)?;

    if scheme != PBKDF2_SCHEME {
        return Err(HashError::UnsupportedScheme(scheme.to_string()));
    }

    let iterations: u32 = iterations_text
        .parse()
        .map_err(|_| HashError::MalformedHash)?;
    if iterations == 0 {
        return Err(HashError::InvalidIterations);
    }

    let salt = STANDARD.decode(salt_b64)?;
    let expected_digest = STANDARD.decode(digest_b64)?;

    let actual_digest = derive(api_key.as_bytes(), &salt, iterations);
    Ok(bool::from(actual_digest.ct_eq(&expected_digest)))
}

fn derive(password: &[u8], salt: &[u8], iterations: u32) -> [u8; DIGEST_BYTES] {
    let mut out = [0u8; DIGEST_BYTES];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    out
}
