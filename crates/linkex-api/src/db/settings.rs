//! Platform settings stored as JSONB under a key.

use linkex_ledger::FeeSchedule;
use sqlx::PgPool;

use super::{from_json, to_json};

const FEE_SCHEDULE_KEY: &str = "fee_schedule";

pub async fn save_fee_schedule(pool: &PgPool, schedule: &FeeSchedule) -> Result<(), sqlx::Error> {
    let value = to_json(schedule)?;
    sqlx::query(
        "INSERT INTO platform_settings (key, value, updated_at) VALUES ($1, $2, NOW())
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
    )
    .bind(FEE_SCHEDULE_KEY)
    .bind(&value)
    .execute(pool)
    .await?;
    Ok(())
}

/// The saved fee schedule, if an admin has ever changed it.
pub async fn load_fee_schedule(pool: &PgPool) -> Result<Option<FeeSchedule>, sqlx::Error> {
    let value: Option<serde_json::Value> =
        sqlx::query_scalar("SELECT value FROM platform_settings WHERE key = $1")
            .bind(FEE_SCHEDULE_KEY)
            .fetch_optional(pool)
            .await?;
    value
        .map(|v| from_json("platform_settings.fee_schedule", v))
        .transpose()
}
