//! Session persistence. Only token hashes are stored.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::state::SessionRecord;

pub async fn insert(pool: &PgPool, session: &SessionRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO sessions (token_hash, user_id, created_at, expires_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (token_hash) DO NOTHING",
    )
    .bind(&session.token_hash)
    .bind(session.user_id)
    .bind(session.created_at)
    .bind(session.expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_many(pool: &PgPool, token_hashes: &[String]) -> Result<(), sqlx::Error> {
    if token_hashes.is_empty() {
        return Ok(());
    }
    sqlx::query("DELETE FROM sessions WHERE token_hash = ANY($1)")
        .bind(token_hashes)
        .execute(pool)
        .await?;
    Ok(())
}

/// Load sessions that have not expired by `now`, deleting the rest.
pub async fn load_active(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Vec<SessionRecord>, sqlx::Error> {
    let purged = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
        .bind(now)
        .execute(pool)
        .await?
        .rows_affected();
    if purged > 0 {
        tracing::info!(purged, "removed expired sessions");
    }

    let rows = sqlx::query_as::<_, (String, Uuid, DateTime<Utc>, DateTime<Utc>)>(
        "SELECT token_hash, user_id, created_at, expires_at FROM sessions",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(token_hash, user_id, created_at, expires_at)| SessionRecord {
            token_hash,
            user_id,
            created_at,
            expires_at,
        })
        .collect())
}
