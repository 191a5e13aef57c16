//! Notification and support ticket persistence.

use chrono::{DateTime, Utc};
use linkex_state::{Lifecycle, TicketStatus};
use sqlx::PgPool;
use uuid::Uuid;

use super::{from_json, parse_name, to_json};
use crate::state::{NotificationRecord, TicketRecord};

pub async fn upsert_notification(
    pool: &PgPool,
    record: &NotificationRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO notifications (id, user_id, kind, message, reference_id, read, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (id) DO UPDATE SET read = EXCLUDED.read",
    )
    .bind(record.id)
    .bind(record.user_id)
    .bind(&record.kind)
    .bind(&record.message)
    .bind(record.reference_id)
    .bind(record.read)
    .bind(record.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_notifications(pool: &PgPool) -> Result<Vec<NotificationRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, NotificationRow>(
        "SELECT id, user_id, kind, message, reference_id, read, created_at
         FROM notifications ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| NotificationRecord {
            id: r.id,
            user_id: r.user_id,
            kind: r.kind,
            message: r.message,
            reference_id: r.reference_id,
            read: r.read,
            created_at: r.created_at,
        })
        .collect())
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    message: String,
    reference_id: Option<Uuid>,
    read: bool,
    created_at: DateTime<Utc>,
}

pub async fn upsert_ticket(pool: &PgPool, record: &TicketRecord) -> Result<(), sqlx::Error> {
    let messages = to_json(&record.messages)?;

    sqlx::query(
        "INSERT INTO support_tickets (id, user_id, subject, order_id, status, messages,
         created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            messages = EXCLUDED.messages,
            updated_at = EXCLUDED.updated_at
         WHERE support_tickets.updated_at <= EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(record.user_id)
    .bind(&record.subject)
    .bind(record.order_id)
    .bind(record.status.as_str())
    .bind(&messages)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_tickets(pool: &PgPool) -> Result<Vec<TicketRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TicketRow>(
        "SELECT id, user_id, subject, order_id, status, messages, created_at, updated_at
         FROM support_tickets ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            Ok(TicketRecord {
                status: parse_name("support_tickets.status", &r.status, TicketStatus::from_name)?,
                messages: from_json("support_tickets.messages", r.messages)?,
                id: r.id,
                user_id: r.user_id,
                subject: r.subject,
                order_id: r.order_id,
                created_at: r.created_at,
                updated_at: r.updated_at,
            })
        })
        .collect()
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    user_id: Uuid,
    subject: String,
    order_id: Option<Uuid>,
    status: String,
    messages: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
