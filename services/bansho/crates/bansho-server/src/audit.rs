//! Audit log writer. A write failure is caught and swallowed with a
//! one-line stderr diagnostic — it must never fail the request whose
//! outcome it's recording.

use bansho_common::AuditEvent;
use sqlx::PgPool;
use uuid::Uuid;

const INSERT_AUDIT_EVENT_SQL: &str = r"
INSERT INTO audit_events (
    id, ts, api_key_id, role, method, tool_name,
    request_json, response_json, status_code, latency_ms, decision
) VALUES ($1, $2, $3, $4, $5, $6, $7::jsonb, $8::jsonb, $9, $10, $11::jsonb);
";

pub async fn log_event(pg: &PgPool, event: &AuditEvent) -> Result<(), sqlx::Error> {
    let (request_json, response_json, decision) = event.serialized_columns();
    let api_key_id = event
        .api_key_id
        .as_deref()
        .and_then(|id| Uuid::parse_str(id).ok());

    sqlx::query(INSERT_AUDIT_EVENT_SQL)
        .bind(Uuid::new_v4())
        .bind(event.ts)
        .bind(api_key_id)
        .bind(&event.role)
        .bind(&event.method)
        .bind(&event.tool_name)
        .bind(request_json)
        .bind(response_json)
        .bind(event.status_code)
        .bind(event.latency_ms as i32)
        .bind(decision)
        .execute(pg)
        .await?;

    Ok(())
}

/// Write an audit event, swallowing any failure behind a stderr
/// diagnostic rather than propagating it to the caller.
pub async fn write_audit_event_best_effort(pg: &PgPool, event: &AuditEvent) {
    if let Err(error) = log_event(pg, event).await {
        eprintln!(
            "audit_log_failed method={} tool={} status={} error_type={}",
            event.method,
            event.tool_name,
            event.status_code,
            std::any::type_name::<sqlx::Error>(),
        );
        tracing::warn!(error = %error, "audit log write failed");
    }
}
