//! # Sites API
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/v1/sites` | `create_site` |
//! | `GET` | `/v1/sites/mine` | `my_sites` |
//! | `GET` | `/v1/sites/:id` | `get_site` |
//! | `PATCH` | `/v1/sites/:id` | `update_site` |
//! | `DELETE` | `/v1/sites/:id` | `delete_site` |
//! | `GET` | `/v1/exchange-sites` | `exchange_sites` |
//!
//! New sites start `PENDING` and become visible to other users once staff
//! approve them. Moderation endpoints live under `/v1/admin/sites`.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use linkex_core::{SiteDomain, ValidationError};
use linkex_state::{advance, ExchangeStatus, SiteStatus};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::audit::NewAuditEvent;
use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{extract_query, extract_validated_json, Validate};
use crate::routes::load_site;
use crate::state::{AppState, SiteRecord};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateSiteRequest {
    /// Hostname or URL; normalized to a bare lowercase hostname.
    pub domain: String,
    pub title: String,
    pub category: String,
    /// Language code, e.g. `en`.
    pub language: String,
    /// 0–100.
    pub domain_authority: i32,
    pub monthly_traffic: i64,
    #[serde(default)]
    pub allows_exchange: bool,
}

impl Validate for CreateSiteRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        SiteDomain::parse(&self.domain)?;
        check_profile(
            &self.title,
            &self.category,
            &self.language,
            self.domain_authority,
            self.monthly_traffic,
        )
    }
}

/// Site fields to change. The domain cannot be changed; register a new site.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateSiteRequest {
    pub title: Option<String>,
    pub category: Option<String>,
    pub language: Option<String>,
    pub domain_authority: Option<i32>,
    pub monthly_traffic: Option<i64>,
    pub allows_exchange: Option<bool>,
}

impl Validate for UpdateSiteRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        check_profile(
            self.title.as_deref().unwrap_or("-"),
            self.category.as_deref().unwrap_or("-"),
            self.language.as_deref().unwrap_or("en"),
            self.domain_authority.unwrap_or(0),
            self.monthly_traffic.unwrap_or(0),
        )
    }
}

fn check_profile(
    title: &str,
    category: &str,
    language: &str,
    domain_authority: i32,
    monthly_traffic: i64,
) -> Result<(), ValidationError> {
    linkex_core::validate_text("title", title, 1, 200)?;
    linkex_core::validate_text("category", category, 1, 64)?;
    linkex_core::validate_text("language", language, 2, 16)?;
    if !(0..=100).contains(&domain_authority) {
        return Err(ValidationError::TextLength {
            field: "domain_authority",
            min: 0,
            max: 100,
        });
    }
    if monthly_traffic < 0 {
        return Err(ValidationError::InvalidAmount(monthly_traffic.to_string()));
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExchangeSiteQuery {
    /// Exact category match.
    pub category: Option<String>,
    /// Minimum domain authority.
    pub min_da: Option<i32>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/sites", post(create_site))
        .route("/v1/sites/mine", get(my_sites))
        .route(
            "/v1/sites/:id",
            get(get_site).patch(update_site).delete(delete_site),
        )
        .route("/v1/exchange-sites", get(exchange_sites))
}

fn owned_site(state: &AppState, caller: &CallerIdentity, id: Uuid) -> Result<SiteRecord, AppError> {
    let owner = caller.account_id()?;
    let site = load_site(state, id)?;
    if site.owner_id != owner {
        return Err(AppError::Forbidden("only the site owner may do this".into()));
    }
    Ok(site)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/sites — Register a site for moderation.
#[utoipa::path(
    post,
    path = "/v1/sites",
    request_body = CreateSiteRequest,
    responses(
        (status = 201, description = "Site registered, pending review", body = SiteRecord),
        (status = 409, description = "Domain already registered", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid field", body = crate::error::ErrorBody),
    ),
    tag = "sites"
)]
pub(crate) async fn create_site(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateSiteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SiteRecord>), AppError> {
    let owner_id = caller.account_id()?;
    let req = extract_validated_json(body)?;
    let domain = SiteDomain::parse(&req.domain)?;

    let now = Utc::now();
    let record = SiteRecord {
        id: Uuid::new_v4(),
        owner_id,
        domain: domain.as_str().to_string(),
        title: req.title.trim().to_string(),
        category: req.category.trim().to_ascii_lowercase(),
        language: req.language.trim().to_ascii_lowercase(),
        domain_authority: req.domain_authority,
        monthly_traffic: req.monthly_traffic,
        allows_exchange: req.allows_exchange,
        status: SiteStatus::Pending,
        moderation_note: None,
        history: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    {
        let _guard = state.catalog_lock.lock();
        if state.sites.any(|s| s.domain == record.domain) {
            return Err(AppError::Conflict(format!(
                "site '{domain}' is already registered"
            )));
        }
        state.sites.insert(record.id, record.clone());
    }

    state.persist_site(&record).await?;
    state
        .audit(
            NewAuditEvent::new("site", record.id, "CREATED", Some(owner_id))
                .with_metadata(serde_json::json!({ "domain": record.domain })),
        )
        .await;
    tracing::info!(site_id = %record.id, domain = %record.domain, "site registered");
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /v1/sites/mine — Sites owned by the caller, any status.
#[utoipa::path(
    get,
    path = "/v1/sites/mine",
    responses((status = 200, description = "Caller's sites", body = Vec<SiteRecord>)),
    tag = "sites"
)]
pub(crate) async fn my_sites(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<SiteRecord>>, AppError> {
    let owner = caller.account_id()?;
    let mut sites = state.sites.filter(|s| s.owner_id == owner);
    sites.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(sites))
}

/// GET /v1/sites/:id — A site. Owners and staff see any status; everyone
/// else sees approved sites only.
#[utoipa::path(
    get,
    path = "/v1/sites/{id}",
    params(("id" = Uuid, Path, description = "Site ID")),
    responses(
        (status = 200, description = "Site", body = SiteRecord),
        (status = 404, description = "Site not found or not visible", body = crate::error::ErrorBody),
    ),
    tag = "sites"
)]
pub(crate) async fn get_site(
    State(state): State<AppState>,
    caller: Option<CallerIdentity>,
    Path(id): Path<Uuid>,
) -> Result<Json<SiteRecord>, AppError> {
    let site = load_site(&state, id)?;
    let privileged = caller
        .as_ref()
        .map_or(false, |c| c.is_staff() || c.user_id == site.owner_id);
    if !privileged && !site.status.is_marketable() {
        return Err(AppError::NotFound(format!("site {id} not found")));
    }
    Ok(Json(site))
}

/// PATCH /v1/sites/:id — Edit a site. A rejected site goes back to review.
#[utoipa::path(
    patch,
    path = "/v1/sites/{id}",
    params(("id" = Uuid, Path, description = "Site ID")),
    request_body = UpdateSiteRequest,
    responses(
        (status = 200, description = "Updated site", body = SiteRecord),
        (status = 403, description = "Not the owner", body = crate::error::ErrorBody),
        (status = 404, description = "Site not found", body = crate::error::ErrorBody),
    ),
    tag = "sites"
)]
pub(crate) async fn update_site(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateSiteRequest>, JsonRejection>,
) -> Result<Json<SiteRecord>, AppError> {
    let site = owned_site(&state, &caller, id)?;
    let req = extract_validated_json(body)?;
    let actor = caller.actor();

    let updated = state
        .sites
        .try_update(&site.id, |s| {
            if let Some(title) = &req.title {
                s.title = title.trim().to_string();
            }
            if let Some(category) = &req.category {
                s.category = category.trim().to_ascii_lowercase();
            }
            if let Some(language) = &req.language {
                s.language = language.trim().to_ascii_lowercase();
            }
            if let Some(da) = req.domain_authority {
                s.domain_authority = da;
            }
            if let Some(traffic) = req.monthly_traffic {
                s.monthly_traffic = traffic;
            }
            if let Some(allows) = req.allows_exchange {
                s.allows_exchange = allows;
            }
            if s.status == SiteStatus::Rejected {
                advance(
                    &mut s.status,
                    &mut s.history,
                    SiteStatus::Pending,
                    actor,
                    Some("edited after rejection".into()),
                )?;
            }
            s.updated_at = Utc::now();
            Ok::<_, AppError>(s.clone())
        })
        .ok_or_else(|| AppError::NotFound(format!("site {id} not found")))??;

    state.persist_site(&updated).await?;
    if site.status != updated.status {
        state
            .audit(
                NewAuditEvent::new("site", id, "RESUBMITTED", actor)
                    .with_metadata(serde_json::json!({ "from": site.status, "to": updated.status })),
            )
            .await;
    }
    Ok(Json(updated))
}

/// DELETE /v1/sites/:id — Remove a site and its listings.
///
/// Refused while the site has an open order or exchange.
#[utoipa::path(
    delete,
    path = "/v1/sites/{id}",
    params(("id" = Uuid, Path, description = "Site ID")),
    responses(
        (status = 204, description = "Site deleted"),
        (status = 409, description = "Site has open orders or exchanges", body = crate::error::ErrorBody),
    ),
    tag = "sites"
)]
pub(crate) async fn delete_site(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let site = owned_site(&state, &caller, id)?;
    let removed_listings = {
        let _guard = state.catalog_lock.lock();
        if state.orders.any(|o| o.site_id == id && o.status.is_open()) {
            return Err(AppError::Conflict(
                "site has open orders; finish or cancel them first".into(),
            ));
        }
        if state.exchanges.any(|e| {
            (e.requester_site_id == id || e.target_site_id == id)
                && matches!(e.status, ExchangeStatus::Pending | ExchangeStatus::Active)
        }) {
            return Err(AppError::Conflict(
                "site has open exchanges; finish or cancel them first".into(),
            ));
        }
        let listing_ids: Vec<Uuid> = state
            .listings
            .filter(|l| l.site_id == id)
            .into_iter()
            .map(|l| l.id)
            .collect();
        for listing_id in &listing_ids {
            state.listings.remove(listing_id);
        }
        state.sites.remove(&id);
        listing_ids.len()
    };

    state.forget_site(id).await?;
    state
        .audit(
            NewAuditEvent::new("site", id, "DELETED", caller.actor()).with_metadata(
                serde_json::json!({ "domain": site.domain, "listings_removed": removed_listings }),
            ),
        )
        .await;
    tracing::info!(site_id = %id, listings = removed_listings, "site deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/exchange-sites — Approved sites open to link exchanges.
#[utoipa::path(
    get,
    path = "/v1/exchange-sites",
    params(ExchangeSiteQuery),
    responses((status = 200, description = "Exchange partners", body = Vec<SiteRecord>)),
    tag = "sites"
)]
pub(crate) async fn exchange_sites(
    State(state): State<AppState>,
    query: Result<Query<ExchangeSiteQuery>, QueryRejection>,
) -> Result<Json<Vec<SiteRecord>>, AppError> {
    let q = extract_query(query)?;
    let category = q.category.map(|c| c.trim().to_ascii_lowercase());
    let mut sites = state.sites.filter(|s| {
        s.status.is_marketable()
            && s.allows_exchange
            && category.as_ref().map_or(true, |c| &s.category == c)
            && q.min_da.map_or(true, |min| s.domain_authority >= min)
    });
    sites.sort_by(|a, b| {
        b.domain_authority
            .cmp(&a.domain_authority)
            .then_with(|| a.domain.cmp(&b.domain))
    });
    Ok(Json(sites))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::test_support::{
        fund, seed_listing, seed_site, seed_user, send, test_app, test_state,
    };
    use linkex_state::OrderStatus;
    use serde_json::json;

    fn site_body(domain: &str) -> serde_json::Value {
        json!({
            "domain": domain,
            "title": "Gardening tips",
            "category": "Home",
            "language": "en",
            "domain_authority": 35,
            "monthly_traffic": 5000,
            "allows_exchange": true,
        })
    }

    #[tokio::test]
    async fn create_normalizes_domain_and_starts_pending() {
        let state = test_state();
        let app = test_app(&state);
        let (_, token) = seed_user(&state, "owner", Role::User);

        let (status, body) = send(
            &app,
            "POST",
            "/v1/sites",
            Some(&token),
            Some(site_body("https://WWW.Garden.example/blog")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["domain"], "garden.example");
        assert_eq!(body["status"], "PENDING");
        assert_eq!(body["category"], "home");

        let (status, _) = send(
            &app,
            "POST",
            "/v1/sites",
            Some(&token),
            Some(site_body("garden.example")),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn authority_out_of_range_rejected() {
        let state = test_state();
        let app = test_app(&state);
        let (_, token) = seed_user(&state, "owner", Role::User);
        let mut body = site_body("da.example");
        body["domain_authority"] = json!(101);
        let (status, _) = send(&app, "POST", "/v1/sites", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn pending_site_hidden_from_strangers() {
        let state = test_state();
        let app = test_app(&state);
        let (owner, owner_token) = seed_user(&state, "owner", Role::User);
        let (_, stranger) = seed_user(&state, "stranger", Role::User);
        let (_, staff) = seed_user(&state, "staff", Role::Employee);
        let site = seed_site(&state, owner.id, "hidden.example", SiteStatus::Pending);
        let uri = format!("/v1/sites/{}", site.id);

        assert_eq!(send(&app, "GET", &uri, Some(&stranger), None).await.0, StatusCode::NOT_FOUND);
        assert_eq!(send(&app, "GET", &uri, None, None).await.0, StatusCode::NOT_FOUND);
        assert_eq!(send(&app, "GET", &uri, Some(&owner_token), None).await.0, StatusCode::OK);
        assert_eq!(send(&app, "GET", &uri, Some(&staff), None).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn editing_rejected_site_resubmits_it() {
        let state = test_state();
        let app = test_app(&state);
        let (owner, token) = seed_user(&state, "owner", Role::User);
        let site = seed_site(&state, owner.id, "redo.example", SiteStatus::Rejected);

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/v1/sites/{}", site.id),
            Some(&token),
            Some(json!({ "title": "Better title" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "PENDING");
        assert_eq!(body["title"], "Better title");
        assert_eq!(body["history"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_owner_may_edit() {
        let state = test_state();
        let app = test_app(&state);
        let (owner, _) = seed_user(&state, "owner", Role::User);
        let (_, other) = seed_user(&state, "other", Role::User);
        let site = seed_site(&state, owner.id, "mine.example", SiteStatus::Approved);
        let (status, _) = send(
            &app,
            "PATCH",
            &format!("/v1/sites/{}", site.id),
            Some(&other),
            Some(json!({ "title": "Hijacked" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn delete_refused_with_open_order_then_allowed() {
        let state = test_state();
        let app = test_app(&state);
        let (owner, token) = seed_user(&state, "owner", Role::User);
        let (buyer, _) = seed_user(&state, "buyer", Role::User);
        let site = seed_site(&state, owner.id, "busy.example", SiteStatus::Approved);
        let listing = seed_listing(&state, &site, 5_000);
        fund(&state, buyer.id, 10_000);

        let now = Utc::now();
        let order = crate::state::OrderRecord {
            id: Uuid::new_v4(),
            listing_id: listing.id,
            site_id: site.id,
            buyer_id: buyer.id,
            seller_id: owner.id,
            price: listing.price,
            target_url: "https://buyer.example".into(),
            anchor_text: "buyer".into(),
            notes: None,
            live_url: None,
            revision_note: None,
            dispute_reason: None,
            status: OrderStatus::InProgress,
            history: vec![],
            fee: None,
            delivered_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(order.id, order.clone());

        let uri = format!("/v1/sites/{}", site.id);
        let (status, _) = send(&app, "DELETE", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        state.orders.update(&order.id, |o| o.status = OrderStatus::Cancelled);
        let (status, _) = send(&app, "DELETE", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.sites.get(&site.id).is_none());
        assert!(state.listings.get(&listing.id).is_none());
        assert!(state.orders.get(&order.id).is_some());
    }

    #[tokio::test]
    async fn exchange_sites_lists_only_open_approved_sites() {
        let state = test_state();
        let app = test_app(&state);
        let (owner, _) = seed_user(&state, "owner", Role::User);
        seed_site(&state, owner.id, "open.example", SiteStatus::Approved);
        seed_site(&state, owner.id, "pending.example", SiteStatus::Pending);
        let closed = seed_site(&state, owner.id, "closed.example", SiteStatus::Approved);
        state.sites.update(&closed.id, |s| s.allows_exchange = false);

        let (status, body) = send(&app, "GET", "/v1/exchange-sites", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let domains: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["domain"].as_str().unwrap())
            .collect();
        assert_eq!(domains, vec!["open.example"]);

        let (_, body) = send(&app, "GET", "/v1/exchange-sites?min_da=90", None, None).await;
        assert!(body.as_array().unwrap().is_empty());
    }
}
