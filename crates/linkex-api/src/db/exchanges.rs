//! Link-exchange persistence. Operates on the `exchanges` table.

use chrono::{DateTime, Utc};
use linkex_state::{ExchangeStatus, Lifecycle};
use sqlx::PgPool;
use uuid::Uuid;

use super::{from_json, parse_name, to_json};
use crate::state::ExchangeRecord;

pub async fn upsert(pool: &PgPool, record: &ExchangeRecord) -> Result<(), sqlx::Error> {
    let history = to_json(&record.history)?;

    sqlx::query(
        "INSERT INTO exchanges (id, requester_id, requester_site_id, target_id, target_site_id,
         message, requester_placement_url, target_placement_url, status, history,
         created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
         ON CONFLICT (id) DO UPDATE SET
            requester_placement_url = EXCLUDED.requester_placement_url,
            target_placement_url = EXCLUDED.target_placement_url,
            status = EXCLUDED.status,
            history = EXCLUDED.history,
            updated_at = EXCLUDED.updated_at
         WHERE exchanges.updated_at <= EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(record.requester_id)
    .bind(record.requester_site_id)
    .bind(record.target_id)
    .bind(record.target_site_id)
    .bind(&record.message)
    .bind(&record.requester_placement_url)
    .bind(&record.target_placement_url)
    .bind(record.status.as_str())
    .bind(&history)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<ExchangeRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ExchangeRow>(
        "SELECT id, requester_id, requester_site_id, target_id, target_site_id, message,
         requester_placement_url, target_placement_url, status, history, created_at, updated_at
         FROM exchanges ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ExchangeRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct ExchangeRow {
    id: Uuid,
    requester_id: Uuid,
    requester_site_id: Uuid,
    target_id: Uuid,
    target_site_id: Uuid,
    message: Option<String>,
    requester_placement_url: Option<String>,
    target_placement_url: Option<String>,
    status: String,
    history: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ExchangeRow {
    fn into_record(self) -> Result<ExchangeRecord, sqlx::Error> {
        Ok(ExchangeRecord {
            status: parse_name("exchanges.status", &self.status, ExchangeStatus::from_name)?,
            history: from_json("exchanges.history", self.history)?,
            id: self.id,
            requester_id: self.requester_id,
            requester_site_id: self.requester_site_id,
            target_id: self.target_id,
            target_site_id: self.target_site_id,
            message: self.message,
            requester_placement_url: self.requester_placement_url,
            target_placement_url: self.target_placement_url,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
