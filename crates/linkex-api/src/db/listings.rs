//! Listing persistence. Operates on the `listings` table.

use chrono::{DateTime, Utc};
use linkex_core::Money;
use sqlx::PgPool;
use uuid::Uuid;

use super::parse_name;
use crate::state::{LinkType, ListingKind, ListingRecord};

pub async fn upsert(pool: &PgPool, record: &ListingRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO listings (id, site_id, seller_id, kind, title, description, price_cents,
         turnaround_days, link_type, active, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
         ON CONFLICT (id) DO UPDATE SET
            kind = EXCLUDED.kind,
            title = EXCLUDED.title,
            description = EXCLUDED.description,
            price_cents = EXCLUDED.price_cents,
            turnaround_days = EXCLUDED.turnaround_days,
            link_type = EXCLUDED.link_type,
            active = EXCLUDED.active,
            updated_at = EXCLUDED.updated_at
         WHERE listings.updated_at <= EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(record.site_id)
    .bind(record.seller_id)
    .bind(record.kind.as_str())
    .bind(&record.title)
    .bind(&record.description)
    .bind(record.price.cents())
    .bind(record.turnaround_days)
    .bind(record.link_type.as_str())
    .bind(record.active)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<ListingRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ListingRow>(
        "SELECT id, site_id, seller_id, kind, title, description, price_cents,
         turnaround_days, link_type, active, created_at, updated_at
         FROM listings ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ListingRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: Uuid,
    site_id: Uuid,
    seller_id: Uuid,
    kind: String,
    title: String,
    description: String,
    price_cents: i64,
    turnaround_days: i32,
    link_type: String,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ListingRow {
    fn into_record(self) -> Result<ListingRecord, sqlx::Error> {
        Ok(ListingRecord {
            kind: parse_name("listings.kind", &self.kind, ListingKind::from_name)?,
            link_type: parse_name("listings.link_type", &self.link_type, LinkType::from_name)?,
            id: self.id,
            site_id: self.site_id,
            seller_id: self.seller_id,
            title: self.title,
            description: self.description,
            price: Money::from_cents(self.price_cents),
            turnaround_days: self.turnaround_days,
            active: self.active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
