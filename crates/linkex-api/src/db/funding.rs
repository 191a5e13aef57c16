//! Funding request persistence. Operates on the `funding_requests` table.

use chrono::{DateTime, Utc};
use linkex_core::Money;
use linkex_state::{Lifecycle, RequestKind, RequestStatus};
use sqlx::PgPool;
use uuid::Uuid;

use super::{from_json, parse_name, to_json};
use crate::state::FundingRequestRecord;

pub async fn upsert(pool: &PgPool, record: &FundingRequestRecord) -> Result<(), sqlx::Error> {
    let history = to_json(&record.history)?;

    sqlx::query(
        "INSERT INTO funding_requests (id, user_id, kind, amount_cents, method, details, status,
         note, net_payout_cents, decided_by, decided_at, history, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
         ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            note = EXCLUDED.note,
            net_payout_cents = EXCLUDED.net_payout_cents,
            decided_by = EXCLUDED.decided_by,
            decided_at = EXCLUDED.decided_at,
            history = EXCLUDED.history,
            updated_at = EXCLUDED.updated_at
         WHERE funding_requests.updated_at <= EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(record.user_id)
    .bind(record.kind.as_str())
    .bind(record.amount.cents())
    .bind(&record.method)
    .bind(&record.details)
    .bind(record.status.as_str())
    .bind(&record.note)
    .bind(record.net_payout.map(Money::cents))
    .bind(record.decided_by)
    .bind(record.decided_at)
    .bind(&history)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<FundingRequestRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, FundingRow>(
        "SELECT id, user_id, kind, amount_cents, method, details, status, note,
         net_payout_cents, decided_by, decided_at, history, created_at, updated_at
         FROM funding_requests ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(FundingRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct FundingRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    amount_cents: i64,
    method: String,
    details: String,
    status: String,
    note: Option<String>,
    net_payout_cents: Option<i64>,
    decided_by: Option<Uuid>,
    decided_at: Option<DateTime<Utc>>,
    history: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl FundingRow {
    fn into_record(self) -> Result<FundingRequestRecord, sqlx::Error> {
        Ok(FundingRequestRecord {
            kind: parse_name("funding_requests.kind", &self.kind, RequestKind::from_name)?,
            status: parse_name(
                "funding_requests.status",
                &self.status,
                RequestStatus::from_name,
            )?,
            history: from_json("funding_requests.history", self.history)?,
            id: self.id,
            user_id: self.user_id,
            amount: Money::from_cents(self.amount_cents),
            method: self.method,
            details: self.details,
            note: self.note,
            net_payout: self.net_payout_cents.map(Money::from_cents),
            decided_by: self.decided_by,
            decided_at: self.decided_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
