//! Audit event persistence. The hash chain is computed in memory by
//! [`AuditLog`](crate::audit::AuditLog); rows are stored as computed.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::AuditEvent;

pub async fn insert(pool: &PgPool, event: &AuditEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_events (id, event_type, actor_id, resource_type, resource_id,
         action, metadata, previous_hash, event_hash, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(event.id)
    .bind(&event.event_type)
    .bind(event.actor_id)
    .bind(&event.resource_type)
    .bind(event.resource_id)
    .bind(&event.action)
    .bind(&event.metadata)
    .bind(&event.previous_hash)
    .bind(&event.event_hash)
    .bind(event.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Load the whole chain in append order.
pub async fn load_all(pool: &PgPool) -> Result<Vec<AuditEvent>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AuditEventRow>(
        "SELECT id, event_type, actor_id, resource_type, resource_id, action, metadata,
         previous_hash, event_hash, created_at
         FROM audit_events ORDER BY seq",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| AuditEvent {
            id: r.id,
            event_type: r.event_type,
            actor_id: r.actor_id,
            resource_type: r.resource_type,
            resource_id: r.resource_id,
            action: r.action,
            metadata: r.metadata,
            previous_hash: r.previous_hash,
            event_hash: r.event_hash,
            created_at: r.created_at,
        })
        .collect())
}

#[derive(sqlx::FromRow)]
struct AuditEventRow {
    id: Uuid,
    event_type: String,
    actor_id: Option<Uuid>,
    resource_type: String,
    resource_id: Uuid,
    action: String,
    metadata: serde_json::Value,
    previous_hash: String,
    event_hash: String,
    created_at: DateTime<Utc>,
}
