//! User persistence. Operates on the `users` table.

use chrono::{DateTime, Utc};
use linkex_core::Username;
use sqlx::PgPool;
use uuid::Uuid;

use super::parse_name;
use crate::auth::Role;
use crate::state::UserRecord;

/// Insert or replace a user.
pub async fn upsert(pool: &PgPool, record: &UserRecord) -> Result<(), sqlx::Error> {
    let canonical = Username::new(&record.username)
        .map(|u| u.canonical())
        .unwrap_or_else(|_| record.username.to_lowercase());

    sqlx::query(
        "INSERT INTO users (id, username, username_canonical, email, password_hash, role,
         display_name, bio, country, referral_code, referred_by, banned, ban_reason,
         created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
         ON CONFLICT (id) DO UPDATE SET
            email = EXCLUDED.email,
            password_hash = EXCLUDED.password_hash,
            role = EXCLUDED.role,
            display_name = EXCLUDED.display_name,
            bio = EXCLUDED.bio,
            country = EXCLUDED.country,
            banned = EXCLUDED.banned,
            ban_reason = EXCLUDED.ban_reason,
            updated_at = EXCLUDED.updated_at
         WHERE users.updated_at <= EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(&record.username)
    .bind(&canonical)
    .bind(&record.email)
    .bind(&record.password_hash)
    .bind(record.role.as_str())
    .bind(&record.display_name)
    .bind(&record.bio)
    .bind(&record.country)
    .bind(&record.referral_code)
    .bind(record.referred_by)
    .bind(record.banned)
    .bind(&record.ban_reason)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load every user, oldest first.
pub async fn load_all(pool: &PgPool) -> Result<Vec<UserRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, UserRow>(
        "SELECT id, username, email, password_hash, role, display_name, bio, country,
         referral_code, referred_by, banned, ban_reason, created_at, updated_at
         FROM users ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(UserRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    display_name: Option<String>,
    bio: Option<String>,
    country: Option<String>,
    referral_code: String,
    referred_by: Option<Uuid>,
    banned: bool,
    ban_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_record(self) -> Result<UserRecord, sqlx::Error> {
        Ok(UserRecord {
            role: parse_name("users.role", &self.role, Role::from_name)?,
            id: self.id,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            display_name: self.display_name,
            bio: self.bio,
            country: self.country,
            referral_code: self.referral_code,
            referred_by: self.referred_by,
            banned: self.banned,
            ban_reason: self.ban_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
