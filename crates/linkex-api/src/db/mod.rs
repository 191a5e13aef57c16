//! # Database Persistence Layer
//!
//! Postgres persistence via SQLx.
//!
//! The database layer is **optional**. When `DATABASE_URL` is set, every
//! mutation is written through to Postgres and the in-memory stores are
//! hydrated from it on startup. When absent, the API runs in-memory only.
//!
//! Each module upserts whole records and loads them back with `load_all`.
//! Lifecycle states are stored as their canonical names; a name the code
//! does not recognise fails hydration rather than being guessed.

pub mod audit;
pub mod exchanges;
pub mod funding;
pub mod ledger;
pub mod listings;
pub mod orders;
pub mod sessions;
pub mod settings;
pub mod sites;
pub mod support;
pub mod users;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Connect to `url` and run the embedded migrations.
pub async fn init_pool(url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Decode error for a column value the application does not recognise.
pub(crate) fn unknown_value(column: &'static str, value: &str) -> sqlx::Error {
    tracing::error!(column, value, "unrecognised value in database");
    sqlx::Error::Decode(format!("unrecognised {column} value {value:?}").into())
}

/// Parse a canonical name column with `parse`.
pub(crate) fn parse_name<T>(
    column: &'static str,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, sqlx::Error> {
    parse(value).ok_or_else(|| unknown_value(column, value))
}

/// Serialize a value for a JSONB column.
pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "failed to serialize JSONB column");
        sqlx::Error::Encode(Box::new(e))
    })
}

/// Deserialize a JSONB column.
pub(crate) fn from_json<T: DeserializeOwned>(
    column: &'static str,
    value: serde_json::Value,
) -> Result<T, sqlx::Error> {
    serde_json::from_value(value).map_err(|e| {
        tracing::error!(column, error = %e, "failed to deserialize JSONB column");
        sqlx::Error::Decode(Box::new(e))
    })
}
