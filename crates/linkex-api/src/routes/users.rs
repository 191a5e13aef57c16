//! # User Profiles API
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `GET` | `/v1/users/:id` | `get_profile` |
//! | `PATCH` | `/v1/users/me` | `update_me` |

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, patch};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use linkex_core::ValidationError;
use linkex_state::{OrderStatus, SiteStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::routes::load_user;
use crate::state::{AppState, UserRecord};

/// What anyone may see about an account.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PublicProfile {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub country: Option<String>,
    pub joined: DateTime<Utc>,
    /// Orders this user completed as seller.
    pub completed_sales: usize,
    pub approved_sites: usize,
}

/// Profile fields to change. Absent fields are left as they are; an empty
/// string clears the field.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    /// Two-letter ISO 3166-1 country code.
    pub country: Option<String>,
}

impl Validate for UpdateProfileRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.display_name {
            linkex_core::validate_text("display_name", name, 0, 64)?;
        }
        if let Some(bio) = &self.bio {
            linkex_core::validate_text("bio", bio, 0, 2_000)?;
        }
        if let Some(country) = &self.country {
            let c = country.trim();
            if !c.is_empty() && (c.len() != 2 || !c.chars().all(|ch| ch.is_ascii_alphabetic())) {
                return Err(ValidationError::TextLength {
                    field: "country",
                    min: 2,
                    max: 2,
                });
            }
        }
        Ok(())
    }
}

fn cleared(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/users/me", patch(update_me))
        .route("/v1/users/:id", get(get_profile))
}

/// GET /v1/users/:id — Public profile.
#[utoipa::path(
    get,
    path = "/v1/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Public profile", body = PublicProfile),
        (status = 404, description = "User not found", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
pub(crate) async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicProfile>, AppError> {
    let user = load_user(&state, id)?;
    if user.banned {
        return Err(AppError::NotFound(format!("user {id} not found")));
    }
    let completed_sales = state
        .orders
        .count(|o| o.seller_id == id && o.status == OrderStatus::Completed);
    let approved_sites = state
        .sites
        .count(|s| s.owner_id == id && s.status == SiteStatus::Approved);
    Ok(Json(PublicProfile {
        id: user.id,
        username: user.username,
        display_name: user.display_name,
        bio: user.bio,
        country: user.country,
        joined: user.created_at,
        completed_sales,
        approved_sites,
    }))
}

/// PATCH /v1/users/me — Edit the caller's profile.
#[utoipa::path(
    patch,
    path = "/v1/users/me",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated account", body = UserRecord),
        (status = 422, description = "Invalid field", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
pub(crate) async fn update_me(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<UserRecord>, AppError> {
    let id = caller.account_id()?;
    let req = extract_validated_json(body)?;
    let updated = state
        .users
        .update(&id, |u| {
            if let Some(name) = &req.display_name {
                u.display_name = cleared(name);
            }
            if let Some(bio) = &req.bio {
                u.bio = cleared(bio);
            }
            if let Some(country) = &req.country {
                u.country = cleared(country).map(|c| c.to_ascii_uppercase());
            }
            u.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::NotFound(format!("user {id} not found")))?;
    state.persist_user(&updated).await?;
    Ok(Json(updated))
}
