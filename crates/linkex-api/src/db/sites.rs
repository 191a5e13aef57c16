//! Site persistence. Operates on the `sites` table.

use chrono::{DateTime, Utc};
use linkex_state::{Lifecycle, SiteStatus};
use sqlx::PgPool;
use uuid::Uuid;

use super::{from_json, parse_name, to_json};
use crate::state::SiteRecord;

pub async fn upsert(pool: &PgPool, record: &SiteRecord) -> Result<(), sqlx::Error> {
    let history = to_json(&record.history)?;

    sqlx::query(
        "INSERT INTO sites (id, owner_id, domain, title, category, language, domain_authority,
         monthly_traffic, allows_exchange, status, moderation_note, history, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
         ON CONFLICT (id) DO UPDATE SET
            title = EXCLUDED.title,
            category = EXCLUDED.category,
            language = EXCLUDED.language,
            domain_authority = EXCLUDED.domain_authority,
            monthly_traffic = EXCLUDED.monthly_traffic,
            allows_exchange = EXCLUDED.allows_exchange,
            status = EXCLUDED.status,
            moderation_note = EXCLUDED.moderation_note,
            history = EXCLUDED.history,
            updated_at = EXCLUDED.updated_at
         WHERE sites.updated_at <= EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(record.owner_id)
    .bind(&record.domain)
    .bind(&record.title)
    .bind(&record.category)
    .bind(&record.language)
    .bind(record.domain_authority)
    .bind(record.monthly_traffic)
    .bind(record.allows_exchange)
    .bind(record.status.as_str())
    .bind(&record.moderation_note)
    .bind(&history)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete a site. Its listings go with it (`ON DELETE CASCADE`).
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sites WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<SiteRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, SiteRow>(
        "SELECT id, owner_id, domain, title, category, language, domain_authority,
         monthly_traffic, allows_exchange, status, moderation_note, history, created_at, updated_at
         FROM sites ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(SiteRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct SiteRow {
    id: Uuid,
    owner_id: Uuid,
    domain: String,
    title: String,
    category: String,
    language: String,
    domain_authority: i32,
    monthly_traffic: i64,
    allows_exchange: bool,
    status: String,
    moderation_note: Option<String>,
    history: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SiteRow {
    fn into_record(self) -> Result<SiteRecord, sqlx::Error> {
        Ok(SiteRecord {
            status: parse_name("sites.status", &self.status, SiteStatus::from_name)?,
            history: from_json("sites.history", self.history)?,
            id: self.id,
            owner_id: self.owner_id,
            domain: self.domain,
            title: self.title,
            category: self.category,
            language: self.language,
            domain_authority: self.domain_authority,
            monthly_traffic: self.monthly_traffic,
            allows_exchange: self.allows_exchange,
            moderation_note: self.moderation_note,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
