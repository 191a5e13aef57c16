//! # Listings API
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/v1/listings` | `create_listing` |
//! | `GET` | `/v1/listings` | `browse_listings` |
//! | `GET` | `/v1/listings/:id` | `get_listing` |
//! | `PATCH` | `/v1/listings/:id` | `update_listing` |
//! | `POST` | `/v1/listings/:id/deactivate` | `deactivate_listing` |
//!
//! A listing is visible in the marketplace while it is active and its site
//! is approved. Suspending a site hides its listings without touching them.

use std::collections::HashMap;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use linkex_core::{Money, ValidationError};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::audit::NewAuditEvent;
use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{
    extract_query, extract_validated_json, ListingPage, Page, PageParams, Validate,
};
use crate::routes::load_site;
use crate::state::{AppState, LinkType, ListingKind, ListingRecord, SiteRecord};

const MAX_TURNAROUND_DAYS: i32 = 60;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateListingRequest {
    pub site_id: Uuid,
    pub kind: ListingKind,
    pub title: String,
    pub description: String,
    /// Price in cents.
    #[schema(value_type = i64)]
    pub price: Money,
    /// 1–60.
    pub turnaround_days: i32,
    pub link_type: LinkType,
}

impl Validate for CreateListingRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        check_offer(
            &self.title,
            &self.description,
            self.price,
            self.turnaround_days,
        )
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateListingRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Option<i64>)]
    pub price: Option<Money>,
    pub turnaround_days: Option<i32>,
    pub link_type: Option<LinkType>,
    /// Re-activate or deactivate. Activation requires an approved site.
    pub active: Option<bool>,
}

impl Validate for UpdateListingRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        check_offer(
            self.title.as_deref().unwrap_or("-"),
            self.description.as_deref().unwrap_or("-"),
            self.price.unwrap_or(Money::from_cents(1)),
            self.turnaround_days.unwrap_or(1),
        )
    }
}

fn check_offer(
    title: &str,
    description: &str,
    price: Money,
    turnaround_days: i32,
) -> Result<(), ValidationError> {
    linkex_core::validate_text("title", title, 1, 200)?;
    linkex_core::validate_text("description", description, 1, 5_000)?;
    if !price.is_positive() {
        return Err(ValidationError::InvalidAmount(price.to_string()));
    }
    if !(1..=MAX_TURNAROUND_DAYS).contains(&turnaround_days) {
        return Err(ValidationError::TextLength {
            field: "turnaround_days",
            min: 1,
            max: MAX_TURNAROUND_DAYS as usize,
        });
    }
    Ok(())
}

/// Marketplace browse filters.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListingQuery {
    /// Site category, exact match.
    pub category: Option<String>,
    /// Minimum domain authority of the site.
    pub min_da: Option<i32>,
    /// Maximum price in cents.
    pub max_price: Option<i64>,
    /// `GUEST_POST` or `LINK_INSERTION`.
    pub kind: Option<String>,
    /// Case-insensitive substring of the listing title or site domain.
    pub q: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/listings", post(create_listing).get(browse_listings))
        .route("/v1/listings/:id", get(get_listing).patch(update_listing))
        .route("/v1/listings/:id/deactivate", post(deactivate_listing))
}

fn load_listing(state: &AppState, id: Uuid) -> Result<ListingRecord, AppError> {
    state
        .listings
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("listing {id} not found")))
}

/// Whether the listing can be seen and bought by anyone.
pub(crate) fn is_public(listing: &ListingRecord, site: Option<&SiteRecord>) -> bool {
    listing.active && site.map_or(false, |s| s.status.is_marketable())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/listings — Offer a placement on one of the caller's approved sites.
#[utoipa::path(
    post,
    path = "/v1/listings",
    request_body = CreateListingRequest,
    responses(
        (status = 201, description = "Listing created", body = ListingRecord),
        (status = 403, description = "Site not owned by caller", body = crate::error::ErrorBody),
        (status = 409, description = "Site not approved", body = crate::error::ErrorBody),
    ),
    tag = "listings"
)]
pub(crate) async fn create_listing(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateListingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ListingRecord>), AppError> {
    let seller_id = caller.account_id()?;
    let req = extract_validated_json(body)?;
    let site = load_site(&state, req.site_id)?;
    if site.owner_id != seller_id {
        return Err(AppError::Forbidden("you can only list your own sites".into()));
    }
    if !site.status.is_marketable() {
        return Err(AppError::Conflict(format!(
            "site '{}' is {} and cannot be listed",
            site.domain, site.status
        )));
    }

    let now = Utc::now();
    let record = ListingRecord {
        id: Uuid::new_v4(),
        site_id: site.id,
        seller_id,
        kind: req.kind,
        title: req.title.trim().to_string(),
        description: req.description.trim().to_string(),
        price: req.price,
        turnaround_days: req.turnaround_days,
        link_type: req.link_type,
        active: true,
        created_at: now,
        updated_at: now,
    };
    state.listings.insert(record.id, record.clone());
    state.persist_listing(&record).await?;
    state
        .audit(
            NewAuditEvent::new("listing", record.id, "CREATED", Some(seller_id)).with_metadata(
                serde_json::json!({ "site_id": site.id, "price_cents": record.price.cents() }),
            ),
        )
        .await;
    tracing::info!(listing_id = %record.id, site = %site.domain, "listing created");
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /v1/listings — Browse the marketplace, newest first.
#[utoipa::path(
    get,
    path = "/v1/listings",
    params(ListingQuery),
    responses(
        (status = 200, description = "One page of listings", body = ListingPage),
        (status = 400, description = "Unknown kind filter", body = crate::error::ErrorBody),
    ),
    tag = "listings"
)]
pub(crate) async fn browse_listings(
    State(state): State<AppState>,
    query: Result<Query<ListingQuery>, QueryRejection>,
) -> Result<Json<Page<ListingRecord>>, AppError> {
    let q = extract_query(query)?;
    let kind = crate::routes::parse_filter("kind", q.kind.as_deref(), ListingKind::from_name)?;
    let category = q.category.as_ref().map(|c| c.trim().to_ascii_lowercase());
    let needle = q
        .q
        .as_ref()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty());

    let sites: HashMap<Uuid, SiteRecord> = state
        .sites
        .filter(|s| s.status.is_marketable())
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let mut items = state.listings.filter(|l| {
        let Some(site) = sites.get(&l.site_id) else {
            return false;
        };
        l.active
            && category.as_ref().map_or(true, |c| &site.category == c)
            && q.min_da.map_or(true, |min| site.domain_authority >= min)
            && q.max_price.map_or(true, |max| l.price.cents() <= max)
            && kind.map_or(true, |k| l.kind == k)
            && needle.as_ref().map_or(true, |n| {
                l.title.to_ascii_lowercase().contains(n.as_str()) || site.domain.contains(n.as_str())
            })
    });
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

    let page = PageParams {
        page: q.page,
        per_page: q.per_page,
    };
    Ok(Json(Page::paginate(items, &page)))
}

/// GET /v1/listings/:id — A listing. Hidden listings are visible to their
/// seller and to staff only.
#[utoipa::path(
    get,
    path = "/v1/listings/{id}",
    params(("id" = Uuid, Path, description = "Listing ID")),
    responses(
        (status = 200, description = "Listing", body = ListingRecord),
        (status = 404, description = "Listing not found", body = crate::error::ErrorBody),
    ),
    tag = "listings"
)]
pub(crate) async fn get_listing(
    State(state): State<AppState>,
    caller: Option<CallerIdentity>,
    Path(id): Path<Uuid>,
) -> Result<Json<ListingRecord>, AppError> {
    let listing = load_listing(&state, id)?;
    let site = state.sites.get(&listing.site_id);
    let privileged = caller
        .as_ref()
        .map_or(false, |c| c.is_staff() || c.user_id == listing.seller_id);
    if !privileged && !is_public(&listing, site.as_ref()) {
        return Err(AppError::NotFound(format!("listing {id} not found")));
    }
    Ok(Json(listing))
}

/// PATCH /v1/listings/:id — Edit a listing. Existing orders keep the price
/// they were placed at.
#[utoipa::path(
    patch,
    path = "/v1/listings/{id}",
    params(("id" = Uuid, Path, description = "Listing ID")),
    request_body = UpdateListingRequest,
    responses(
        (status = 200, description = "Updated listing", body = ListingRecord),
        (status = 403, description = "Not the seller", body = crate::error::ErrorBody),
        (status = 409, description = "Site not approved", body = crate::error::ErrorBody),
    ),
    tag = "listings"
)]
pub(crate) async fn update_listing(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateListingRequest>, JsonRejection>,
) -> Result<Json<ListingRecord>, AppError> {
    let seller_id = caller.account_id()?;
    let req = extract_validated_json(body)?;
    let listing = load_listing(&state, id)?;
    if listing.seller_id != seller_id {
        return Err(AppError::Forbidden("only the seller may edit this listing".into()));
    }
    if req.active == Some(true) {
        let site = load_site(&state, listing.site_id)?;
        if !site.status.is_marketable() {
            return Err(AppError::Conflict(format!(
                "site '{}' is {}; listing cannot be activated",
                site.domain, site.status
            )));
        }
    }

    let updated = state
        .listings
        .update(&id, |l| {
            if let Some(title) = &req.title {
                l.title = title.trim().to_string();
            }
            if let Some(description) = &req.description {
                l.description = description.trim().to_string();
            }
            if let Some(price) = req.price {
                l.price = price;
            }
            if let Some(days) = req.turnaround_days {
                l.turnaround_days = days;
            }
            if let Some(link_type) = req.link_type {
                l.link_type = link_type;
            }
            if let Some(active) = req.active {
                l.active = active;
            }
            l.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::NotFound(format!("listing {id} not found")))?;
    state.persist_listing(&updated).await?;
    Ok(Json(updated))
}

/// POST /v1/listings/:id/deactivate — Take a listing off the marketplace.
#[utoipa::path(
    post,
    path = "/v1/listings/{id}/deactivate",
    params(("id" = Uuid, Path, description = "Listing ID")),
    responses(
        (status = 200, description = "Listing deactivated", body = ListingRecord),
        (status = 403, description = "Not the seller or staff", body = crate::error::ErrorBody),
    ),
    tag = "listings"
)]
pub(crate) async fn deactivate_listing(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ListingRecord>, AppError> {
    let listing = load_listing(&state, id)?;
    if !caller.is_staff() && caller.user_id != listing.seller_id {
        return Err(AppError::Forbidden(
            "only the seller or staff may deactivate this listing".into(),
        ));
    }
    let updated = state
        .listings
        .update(&id, |l| {
            l.active = false;
            l.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::NotFound(format!("listing {id} not found")))?;
    state.persist_listing(&updated).await?;
    state
        .audit(NewAuditEvent::new("listing", id, "DEACTIVATED", caller.actor()))
        .await;
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::test_support::{seed_listing, seed_site, seed_user, send, test_app, test_state};
    use linkex_state::SiteStatus;
    use serde_json::json;

    fn listing_body(site_id: Uuid) -> serde_json::Value {
        json!({
            "site_id": site_id,
            "kind": "GUEST_POST",
            "title": "Sponsored article",
            "description": "1000 words, one dofollow link.",
            "price": 7_500,
            "turnaround_days": 7,
            "link_type": "DOFOLLOW",
        })
    }

    #[tokio::test]
    async fn create_requires_owned_approved_site() {
        let state = test_state();
        let app = test_app(&state);
        let (owner, token) = seed_user(&state, "owner", Role::User);
        let (_, other) = seed_user(&state, "other", Role::User);
        let approved = seed_site(&state, owner.id, "ok.example", SiteStatus::Approved);
        let pending = seed_site(&state, owner.id, "wait.example", SiteStatus::Pending);

        let (status, body) =
            send(&app, "POST", "/v1/listings", Some(&token), Some(listing_body(approved.id))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["price"], 7_500);
        assert_eq!(body["active"], true);

        let (status, _) =
            send(&app, "POST", "/v1/listings", Some(&token), Some(listing_body(pending.id))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) =
            send(&app, "POST", "/v1/listings", Some(&other), Some(listing_body(approved.id))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn turnaround_and_price_bounds() {
        let state = test_state();
        let app = test_app(&state);
        let (owner, token) = seed_user(&state, "owner", Role::User);
        let site = seed_site(&state, owner.id, "ok.example", SiteStatus::Approved);

        let mut body = listing_body(site.id);
        body["turnaround_days"] = json!(61);
        let (status, _) = send(&app, "POST", "/v1/listings", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let mut body = listing_body(site.id);
        body["price"] = json!(0);
        let (status, _) = send(&app, "POST", "/v1/listings", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn browse_filters_and_hides_unapproved_sites() {
        let state = test_state();
        let app = test_app(&state);
        let (owner, _) = seed_user(&state, "owner", Role::User);
        let tech = seed_site(&state, owner.id, "tech.example", SiteStatus::Approved);
        let food = seed_site(&state, owner.id, "food.example", SiteStatus::Approved);
        state.sites.update(&food.id, |s| {
            s.category = "food".into();
            s.domain_authority = 70;
        });
        let suspended = seed_site(&state, owner.id, "gone.example", SiteStatus::Suspended);
        seed_listing(&state, &tech, 2_000);
        seed_listing(&state, &food, 9_000);
        seed_listing(&state, &suspended, 1_000);

        let (status, body) = send(&app, "GET", "/v1/listings", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);

        let (_, body) = send(&app, "GET", "/v1/listings?category=food", None, None).await;
        assert_eq!(body["total"], 1);
        let (_, body) = send(&app, "GET", "/v1/listings?max_price=5000", None, None).await;
        assert_eq!(body["items"][0]["site_id"], json!(tech.id));
        let (_, body) = send(&app, "GET", "/v1/listings?min_da=60", None, None).await;
        assert_eq!(body["items"][0]["site_id"], json!(food.id));
        let (_, body) = send(&app, "GET", "/v1/listings?q=TECH", None, None).await;
        assert_eq!(body["total"], 1);
        let (_, body) = send(&app, "GET", "/v1/listings?kind=link_insertion", None, None).await;
        assert_eq!(body["total"], 0);

        let (status, _) = send(&app, "GET", "/v1/listings?kind=banner", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn browse_paginates_newest_first() {
        let state = test_state();
        let app = test_app(&state);
        let (owner, _) = seed_user(&state, "owner", Role::User);
        let site = seed_site(&state, owner.id, "many.example", SiteStatus::Approved);
        let mut ids = Vec::new();
        for i in 0..5 {
            let l = seed_listing(&state, &site, 1_000 + i);
            state.listings.update(&l.id, |l| {
                l.created_at = Utc::now() - chrono::Duration::minutes(10 - i);
            });
            ids.push(l.id);
        }

        let (_, body) = send(&app, "GET", "/v1/listings?page=1&per_page=2", None, None).await;
        assert_eq!(body["total"], 5);
        assert_eq!(body["items"].as_array().unwrap().len(), 2);
        assert_eq!(body["items"][0]["id"], json!(ids[4]));
        let (_, body) = send(&app, "GET", "/v1/listings?page=3&per_page=2", None, None).await;
        assert_eq!(body["items"][0]["id"], json!(ids[0]));
    }

    #[tokio::test]
    async fn deactivated_listing_visible_to_seller_only() {
        let state = test_state();
        let app = test_app(&state);
        let (owner, token) = seed_user(&state, "owner", Role::User);
        let (_, other) = seed_user(&state, "other", Role::User);
        let site = seed_site(&state, owner.id, "ok.example", SiteStatus::Approved);
        let listing = seed_listing(&state, &site, 3_000);

        let uri = format!("/v1/listings/{}/deactivate", listing.id);
        assert_eq!(send(&app, "POST", &uri, Some(&other), None).await.0, StatusCode::FORBIDDEN);
        let (status, body) = send(&app, "POST", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], false);

        let uri = format!("/v1/listings/{}", listing.id);
        assert_eq!(send(&app, "GET", &uri, Some(&other), None).await.0, StatusCode::NOT_FOUND);
        assert_eq!(send(&app, "GET", &uri, Some(&token), None).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn seller_edits_price() {
        let state = test_state();
        let app = test_app(&state);
        let (owner, token) = seed_user(&state, "owner", Role::User);
        let site = seed_site(&state, owner.id, "ok.example", SiteStatus::Approved);
        let listing = seed_listing(&state, &site, 3_000);

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/v1/listings/{}", listing.id),
            Some(&token),
            Some(json!({ "price": 4_250, "link_type": "NOFOLLOW" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["price"], 4_250);
        assert_eq!(body["link_type"], "NOFOLLOW");
    }
}
