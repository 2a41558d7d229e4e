//! Credential store: create, resolve, and revoke API keys against
//! Postgres. Used by both `bansho-server` (to resolve a presented key
//! on every request) and `bansho-keys` (to administer them) — neither
//! depends on the other, so this lives here instead.

use sqlx::PgPool;
use uuid::Uuid;

use crate::hashing::{generate_api_key, hash_api_key, verify_api_key};

pub const DEFAULT_API_KEY_ROLE: &str = "readonly";

/// A freshly created API key: the plaintext (shown once) and its id.
#[derive(Debug, Clone)]
pub struct CreatedApiKey {
    pub api_key: String,
    pub api_key_id: Uuid,
}

/// Identity resolved for a presented, non-revoked API key.
#[derive(Debug, Clone)]
pub struct ResolvedApiKey {
    pub api_key_id: String,
    pub role: String,
}

/// A row from the `api_keys` table, for listing.
#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub api_key_id: Uuid,
    pub role: String,
    pub revoked: bool,
}

pub async fn create_api_key(pg: &PgPool, role: &str) -> Result<CreatedApiKey, sqlx::Error> {
    let normalized_role = normalize_role(role);
    let api_key = generate_api_key();
    let api_key_hash = hash_api_key(&api_key);
    let api_key_id = Uuid::new_v4();

    sqlx::query("INSERT INTO api_keys (id, key_hash, role) VALUES ($1, $2, $3);")
        .bind(api_key_id)
        .bind(&api_key_hash)
        .bind(&normalized_role)
        .execute(pg)
        .await?;

    Ok(CreatedApiKey {
        api_key,
        api_key_id,
    })
}

/// Resolve a presented key against every non-revoked row. Iterates the
/// full result set without early exit — stopping at the first match
/// would make resolution time depend on row order, leaking which row
/// matched through timing.
pub async fn resolve_api_key(
    pg: &PgPool,
    presented_key: &str,
) -> Result<Option<ResolvedApiKey>, sqlx::Error> {
    if presented_key.is_empty() {
        return Ok(None);
    }

    let rows: Vec<(Uuid, String, String)> =
        sqlx::query_as("SELECT id, key_hash, role FROM api_keys WHERE revoked_at IS NULL;")
            .fetch_all(pg)
            .await?;

    let mut resolved = None;
    for (id, key_hash, role) in rows {
        if verify_api_key(presented_key, &key_hash) {
            resolved = Some(ResolvedApiKey {
                api_key_id: id.to_string(),
                role,
            });
        }
    }
    Ok(resolved)
}

pub async fn revoke_api_key(pg: &PgPool, api_key_id: &str) -> Result<bool, sqlx::Error> {
    let Ok(id) = Uuid::parse_str(api_key_id) else {
        return Ok(false);
    };

    let result =
        sqlx::query("UPDATE api_keys SET revoked_at = NOW() WHERE id = $1 AND revoked_at IS NULL;")
            .bind(id)
            .execute(pg)
            .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn list_api_keys(pg: &PgPool) -> Result<Vec<ApiKeyRecord>, sqlx::Error> {
    let rows: Vec<(Uuid, String, bool)> = sqlx::query_as(
        "SELECT id, role, (revoked_at IS NOT NULL) AS revoked FROM api_keys ORDER BY created_at DESC;",
    )
    .fetch_all(pg)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(api_key_id, role, revoked)| ApiKeyRecord {
            api_key_id,
            role,
            revoked,
        })
        .collect())
}

fn normalize_role(role: &str) -> String {
    let trimmed = role.trim();
    if trimmed.is_empty() {
        DEFAULT_API_KEY_ROLE.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_role_falls_back_to_default() {
        assert_eq!(normalize_role(""), DEFAULT_API_KEY_ROLE);
        assert_eq!(normalize_role("   "), DEFAULT_API_KEY_ROLE);
        assert_eq!(normalize_role("admin"), "admin");
    }
}
