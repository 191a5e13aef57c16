//! Order persistence. Operates on the `orders` table.
//!
//! The order state machine is enforced in `linkex-state`, not in SQL.

use chrono::{DateTime, Utc};
use linkex_core::Money;
use linkex_state::{Lifecycle, OrderStatus};
use sqlx::PgPool;
use uuid::Uuid;

use super::{from_json, parse_name, to_json};
use crate::state::OrderRecord;

pub async fn upsert(pool: &PgPool, record: &OrderRecord) -> Result<(), sqlx::Error> {
    let history = to_json(&record.history)?;

    sqlx::query(
        "INSERT INTO orders (id, listing_id, site_id, buyer_id, seller_id, price_cents,
         target_url, anchor_text, notes, live_url, revision_note, dispute_reason, status,
         history, fee_cents, delivered_at, completed_at, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
         ON CONFLICT (id) DO UPDATE SET
            live_url = EXCLUDED.live_url,
            revision_note = EXCLUDED.revision_note,
            dispute_reason = EXCLUDED.dispute_reason,
            status = EXCLUDED.status,
            history = EXCLUDED.history,
            fee_cents = EXCLUDED.fee_cents,
            delivered_at = EXCLUDED.delivered_at,
            completed_at = EXCLUDED.completed_at,
            updated_at = EXCLUDED.updated_at
         WHERE orders.updated_at <= EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(record.listing_id)
    .bind(record.site_id)
    .bind(record.buyer_id)
    .bind(record.seller_id)
    .bind(record.price.cents())
    .bind(&record.target_url)
    .bind(&record.anchor_text)
    .bind(&record.notes)
    .bind(&record.live_url)
    .bind(&record.revision_note)
    .bind(&record.dispute_reason)
    .bind(record.status.as_str())
    .bind(&history)
    .bind(record.fee.map(Money::cents))
    .bind(record.delivered_at)
    .bind(record.completed_at)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<OrderRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, OrderRow>(
        "SELECT id, listing_id, site_id, buyer_id, seller_id, price_cents, target_url,
         anchor_text, notes, live_url, revision_note, dispute_reason, status, history,
         fee_cents, delivered_at, completed_at, created_at, updated_at
         FROM orders ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(OrderRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    listing_id: Uuid,
    site_id: Uuid,
    buyer_id: Uuid,
    seller_id: Uuid,
    price_cents: i64,
    target_url: String,
    anchor_text: String,
    notes: Option<String>,
    live_url: Option<String>,
    revision_note: Option<String>,
    dispute_reason: Option<String>,
    status: String,
    history: serde_json::Value,
    fee_cents: Option<i64>,
    delivered_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_record(self) -> Result<OrderRecord, sqlx::Error> {
        Ok(OrderRecord {
            status: parse_name("orders.status", &self.status, OrderStatus::from_name)?,
            history: from_json("orders.history", self.history)?,
            id: self.id,
            listing_id: self.listing_id,
            site_id: self.site_id,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            price: Money::from_cents(self.price_cents),
            target_url: self.target_url,
            anchor_text: self.anchor_text,
            notes: self.notes,
            live_url: self.live_url,
            revision_note: self.revision_note,
            dispute_reason: self.dispute_reason,
            fee: self.fee_cents.map(Money::from_cents),
            delivered_at: self.delivered_at,
            completed_at: self.completed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
