//! Postgres schema. Bootstrap runs an ordered sequence of idempotent
//! statements so it's safe against both an empty database and one that
//! already has the base tables from an earlier version of this schema.

/// Executed in order against a fresh connection at startup.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS api_keys (
        id uuid PRIMARY KEY,
        key_hash text NOT NULL UNIQUE,
        role text NOT NULL,
        created_at timestamptz NOT NULL DEFAULT NOW(),
        revoked_at timestamptz
    );
    ",
    r"
    CREATE TABLE IF NOT EXISTS audit_events (
        id uuid PRIMARY KEY,
        ts timestamptz NOT NULL DEFAULT NOW(),
        api_key_id uuid REFERENCES api_keys(id) ON DELETE SET NULL,
        role text NOT NULL DEFAULT 'unknown',
        method text NOT NULL,
        tool_name text NOT NULL,
        request_json jsonb NOT NULL DEFAULT '{}'::jsonb,
        response_json jsonb NOT NULL DEFAULT '{}'::jsonb,
        decision jsonb NOT NULL DEFAULT '{}'::jsonb,
        status_code integer NOT NULL,
        latency_ms integer NOT NULL CHECK (latency_ms >= 0)
    );
    ",
    r"
    ALTER TABLE audit_events
    ADD COLUMN IF NOT EXISTS role text NOT NULL DEFAULT 'unknown';
    ",
    r"
    ALTER TABLE audit_events
    ADD COLUMN IF NOT EXISTS decision jsonb NOT NULL DEFAULT '{}'::jsonb;
    ",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_are_nonempty_and_end_with_semicolon() {
        for statement in SCHEMA_STATEMENTS {
            assert!(statement.trim_end().ends_with(';'));
        }
    }
}
