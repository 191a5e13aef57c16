//! # Link Exchanges API
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/v1/exchanges` | `create_exchange` |
//! | `GET` | `/v1/exchanges` | `list_exchanges` |
//! | `GET` | `/v1/exchanges/:id` | `get_exchange` |
//! | `POST` | `/v1/exchanges/:id/accept` | `accept_exchange` |
//! | `POST` | `/v1/exchanges/:id/reject` | `reject_exchange` |
//! | `POST` | `/v1/exchanges/:id/cancel` | `cancel_exchange` |
//! | `POST` | `/v1/exchanges/:id/deliver` | `deliver_exchange` |
//!
//! No money moves in an exchange. Each owner places a link to the other's
//! site and records where; once both placements are recorded the exchange
//! completes.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use linkex_core::ValidationError;
use linkex_state::{advance, ExchangeStatus, Lifecycle};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::audit::NewAuditEvent;
use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{extract_query, extract_validated_json, Validate};
use crate::routes::{load_site, parse_filter};
use crate::state::{AppState, ExchangeRecord, SiteRecord};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateExchangeRequest {
    /// One of the caller's sites.
    pub requester_site_id: Uuid,
    /// Another owner's site.
    pub target_site_id: Uuid,
    #[serde(default)]
    pub message: Option<String>,
}

impl Validate for CreateExchangeRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(message) = &self.message {
            linkex_core::validate_text("message", message, 0, 2_000)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ExchangeDeliveryRequest {
    /// Where the caller placed the other party's link.
    pub placement_url: String,
}

impl Validate for ExchangeDeliveryRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        linkex_core::validate_http_url(&self.placement_url).map(|_| ())
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExchangeQuery {
    /// Exchange status, e.g. `ACTIVE`.
    pub status: Option<String>,
}

// ---------------------------------------------------------------------------
// Router & helpers
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/exchanges", post(create_exchange).get(list_exchanges))
        .route("/v1/exchanges/:id", get(get_exchange))
        .route("/v1/exchanges/:id/accept", post(accept_exchange))
        .route("/v1/exchanges/:id/reject", post(reject_exchange))
        .route("/v1/exchanges/:id/cancel", post(cancel_exchange))
        .route("/v1/exchanges/:id/deliver", post(deliver_exchange))
}

fn is_open(status: ExchangeStatus) -> bool {
    matches!(status, ExchangeStatus::Pending | ExchangeStatus::Active)
}

fn check_exchangeable(site: &SiteRecord) -> Result<(), AppError> {
    if !site.status.is_marketable() {
        return Err(AppError::Conflict(format!(
            "site '{}' is {}",
            site.domain, site.status
        )));
    }
    if !site.allows_exchange {
        return Err(AppError::Conflict(format!(
            "site '{}' does not accept link exchanges",
            site.domain
        )));
    }
    Ok(())
}

/// Apply `change` to the exchange under its store lock, then write it
/// through, notify the other party and audit it.
async fn transition(
    state: &AppState,
    caller: &CallerIdentity,
    id: Uuid,
    action: &str,
    change: impl FnOnce(&mut ExchangeRecord) -> Result<(), AppError>,
) -> Result<ExchangeRecord, AppError> {
    let user = caller.account_id()?;
    let (from, updated) = state
        .exchanges
        .try_update(&id, |exchange| {
            if !exchange.is_party(user) {
                return Err(AppError::Forbidden("not a party to this exchange".into()));
            }
            let mut next = exchange.clone();
            let from = next.status;
            change(&mut next)?;
            next.updated_at = Utc::now();
            *exchange = next.clone();
            Ok((from, next))
        })
        .ok_or_else(|| AppError::NotFound(format!("exchange {id} not found")))??;

    state.persist_exchange(&updated).await?;
    state
        .notify(
            updated.counterparty(user),
            &format!("exchange.{}", action.to_lowercase()),
            format!("Link exchange is now {}", updated.status),
            Some(updated.id),
        )
        .await;
    state
        .audit(
            NewAuditEvent::new("exchange", id, action, Some(user)).with_metadata(
                serde_json::json!({ "from": from.as_str(), "to": updated.status.as_str() }),
            ),
        )
        .await;
    tracing::info!(exchange_id = %id, from = %from, to = %updated.status, "exchange updated");
    Ok(updated)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/exchanges — Propose a link exchange.
#[utoipa::path(
    post,
    path = "/v1/exchanges",
    request_body = CreateExchangeRequest,
    responses(
        (status = 201, description = "Exchange proposed", body = ExchangeRecord),
        (status = 403, description = "Requester site not owned by caller", body = crate::error::ErrorBody),
        (status = 409, description = "Site unavailable or exchange already open", body = crate::error::ErrorBody),
    ),
    tag = "exchanges"
)]
pub(crate) async fn create_exchange(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateExchangeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ExchangeRecord>), AppError> {
    let requester_id = caller.account_id()?;
    let req = extract_validated_json(body)?;
    let own = load_site(&state, req.requester_site_id)?;
    let other = load_site(&state, req.target_site_id)?;
    if own.owner_id != requester_id {
        return Err(AppError::Forbidden(
            "requester site must be one of your sites".into(),
        ));
    }
    if other.owner_id == requester_id {
        return Err(AppError::Conflict(
            "cannot exchange links with your own site".into(),
        ));
    }
    check_exchangeable(&own)?;
    check_exchangeable(&other)?;

    let now = Utc::now();
    let record = ExchangeRecord {
        id: Uuid::new_v4(),
        requester_id,
        requester_site_id: own.id,
        target_id: other.owner_id,
        target_site_id: other.id,
        message: req
            .message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty()),
        requester_placement_url: None,
        target_placement_url: None,
        status: ExchangeStatus::Pending,
        history: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    {
        let _guard = state.catalog_lock.lock();
        if state
            .exchanges
            .any(|e| is_open(e.status) && e.connects(own.id, other.id))
        {
            return Err(AppError::Conflict(format!(
                "an exchange between {} and {} is already open",
                own.domain, other.domain
            )));
        }
        state.exchanges.insert(record.id, record.clone());
    }

    state.persist_exchange(&record).await?;
    state
        .notify(
            record.target_id,
            "exchange.proposed",
            format!("{} proposed a link exchange with {}", own.domain, other.domain),
            Some(record.id),
        )
        .await;
    state
        .audit(
            NewAuditEvent::new("exchange", record.id, "CREATED", Some(requester_id))
                .with_metadata(serde_json::json!({
                    "requester_site_id": own.id,
                    "target_site_id": other.id,
                })),
        )
        .await;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /v1/exchanges — Exchanges the caller is part of, newest first.
#[utoipa::path(
    get,
    path = "/v1/exchanges",
    params(ExchangeQuery),
    responses((status = 200, description = "Caller's exchanges", body = Vec<ExchangeRecord>)),
    tag = "exchanges"
)]
pub(crate) async fn list_exchanges(
    State(state): State<AppState>,
    caller: CallerIdentity,
    query: Result<Query<ExchangeQuery>, QueryRejection>,
) -> Result<Json<Vec<ExchangeRecord>>, AppError> {
    let user = caller.account_id()?;
    let q = extract_query(query)?;
    let status = parse_filter("status", q.status.as_deref(), ExchangeStatus::from_name)?;
    let mut items = state
        .exchanges
        .filter(|e| e.is_party(user) && status.map_or(true, |s| e.status == s));
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(items))
}

/// GET /v1/exchanges/:id — An exchange. Parties and staff only.
#[utoipa::path(
    get,
    path = "/v1/exchanges/{id}",
    params(("id" = Uuid, Path, description = "Exchange ID")),
    responses(
        (status = 200, description = "Exchange", body = ExchangeRecord),
        (status = 404, description = "Exchange not found", body = crate::error::ErrorBody),
    ),
    tag = "exchanges"
)]
pub(crate) async fn get_exchange(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ExchangeRecord>, AppError> {
    state
        .exchanges
        .get(&id)
        .filter(|e| caller.is_staff() || e.is_party(caller.user_id))
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("exchange {id} not found")))
}

/// POST /v1/exchanges/:id/accept — Target owner agrees.
#[utoipa::path(
    post,
    path = "/v1/exchanges/{id}/accept",
    params(("id" = Uuid, Path, description = "Exchange ID")),
    responses(
        (status = 200, description = "Exchange active", body = ExchangeRecord),
        (status = 403, description = "Not the target owner", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition or site unavailable", body = crate::error::ErrorBody),
    ),
    tag = "exchanges"
)]
pub(crate) async fn accept_exchange(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ExchangeRecord>, AppError> {
    let current = state
        .exchanges
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("exchange {id} not found")))?;
    check_exchangeable(&load_site(&state, current.requester_site_id)?)?;
    check_exchangeable(&load_site(&state, current.target_site_id)?)?;

    let actor = caller.actor();
    let updated = transition(&state, &caller, id, "ACCEPTED", |e| {
        if Some(e.target_id) != actor {
            return Err(AppError::Forbidden(
                "only the target site owner may accept".into(),
            ));
        }
        Ok(advance(&mut e.status, &mut e.history, ExchangeStatus::Active, actor, None)?)
    })
    .await?;
    Ok(Json(updated))
}

/// POST /v1/exchanges/:id/reject — Target owner declines.
#[utoipa::path(
    post,
    path = "/v1/exchanges/{id}/reject",
    params(("id" = Uuid, Path, description = "Exchange ID")),
    responses(
        (status = 200, description = "Exchange rejected", body = ExchangeRecord),
        (status = 403, description = "Not the target owner", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
    ),
    tag = "exchanges"
)]
pub(crate) async fn reject_exchange(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ExchangeRecord>, AppError> {
    let actor = caller.actor();
    let updated = transition(&state, &caller, id, "REJECTED", |e| {
        if Some(e.target_id) != actor {
            return Err(AppError::Forbidden(
                "only the target site owner may reject".into(),
            ));
        }
        Ok(advance(&mut e.status, &mut e.history, ExchangeStatus::Rejected, actor, None)?)
    })
    .await?;
    Ok(Json(updated))
}

/// POST /v1/exchanges/:id/cancel — Withdraw from an exchange. Only the
/// requester may cancel a pending proposal; the target rejects it instead.
/// Either party may cancel once it is active.
#[utoipa::path(
    post,
    path = "/v1/exchanges/{id}/cancel",
    params(("id" = Uuid, Path, description = "Exchange ID")),
    responses(
        (status = 200, description = "Exchange cancelled", body = ExchangeRecord),
        (status = 403, description = "Target cannot cancel a pending proposal", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
    ),
    tag = "exchanges"
)]
pub(crate) async fn cancel_exchange(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ExchangeRecord>, AppError> {
    let actor = caller.actor();
    let updated = transition(&state, &caller, id, "CANCELLED", |e| {
        if e.status == ExchangeStatus::Pending && Some(e.requester_id) != actor {
            return Err(AppError::Forbidden(
                "only the requester may cancel a pending exchange; reject it instead".into(),
            ));
        }
        Ok(advance(&mut e.status, &mut e.history, ExchangeStatus::Cancelled, actor, None)?)
    })
    .await?;
    Ok(Json(updated))
}

/// POST /v1/exchanges/:id/deliver — Record where the caller placed the
/// other party's link. Completes the exchange once both sides have.
#[utoipa::path(
    post,
    path = "/v1/exchanges/{id}/deliver",
    params(("id" = Uuid, Path, description = "Exchange ID")),
    request_body = ExchangeDeliveryRequest,
    responses(
        (status = 200, description = "Placement recorded", body = ExchangeRecord),
        (status = 409, description = "Exchange not active", body = crate::error::ErrorBody),
    ),
    tag = "exchanges"
)]
pub(crate) async fn deliver_exchange(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ExchangeDeliveryRequest>, JsonRejection>,
) -> Result<Json<ExchangeRecord>, AppError> {
    let req = extract_validated_json(body)?;
    let url = linkex_core::validate_http_url(&req.placement_url)?;
    let actor = caller.actor();
    let updated = transition(&state, &caller, id, "DELIVERED", |e| {
        if e.status != ExchangeStatus::Active {
            return Err(AppError::Conflict(format!(
                "exchange is {}; placements can only be recorded while ACTIVE",
                e.status
            )));
        }
        if Some(e.requester_id) == actor {
            e.requester_placement_url = Some(url);
        } else {
            e.target_placement_url = Some(url);
        }
        let next = ExchangeStatus::after_delivery(
            e.requester_placement_url.is_some(),
            e.target_placement_url.is_some(),
        );
        if next != e.status {
            advance(
                &mut e.status,
                &mut e.history,
                next,
                actor,
                Some("both placements recorded".into()),
            )?;
        }
        Ok(())
    })
    .await?;
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::test_support::{seed_site, seed_user, send, test_app, test_state};
    use axum::Router;
    use linkex_state::SiteStatus;
    use serde_json::{json, Value};

    struct Pair {
        state: AppState,
        app: Router,
        alice: String,
        bob: String,
        alice_site: Uuid,
        bob_site: Uuid,
    }

    fn pair() -> Pair {
        let state = test_state();
        let app = test_app(&state);
        let (alice, alice_token) = seed_user(&state, "alice", Role::User);
        let (bob, bob_token) = seed_user(&state, "bob", Role::User);
        let a = seed_site(&state, alice.id, "alice.example", SiteStatus::Approved);
        let b = seed_site(&state, bob.id, "bob.example", SiteStatus::Approved);
        Pair {
            state,
            app,
            alice: alice_token,
            bob: bob_token,
            alice_site: a.id,
            bob_site: b.id,
        }
    }

    async fn propose(p: &Pair) -> (StatusCode, Value) {
        send(
            &p.app,
            "POST",
            "/v1/exchanges",
            Some(&p.alice),
            Some(json!({
                "requester_site_id": p.alice_site,
                "target_site_id": p.bob_site,
                "message": "Swap links?",
            })),
        )
        .await
    }

    fn id_of(body: &Value) -> Uuid {
        serde_json::from_value(body["id"].clone()).unwrap()
    }

    #[tokio::test]
    async fn full_exchange_completes_after_both_placements() {
        let p = pair();
        let (status, body) = propose(&p).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = id_of(&body);

        let (status, body) =
            send(&p.app, "POST", &format!("/v1/exchanges/{id}/accept"), Some(&p.bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ACTIVE");

        let deliver = format!("/v1/exchanges/{id}/deliver");
        let (_, body) = send(
            &p.app,
            "POST",
            &deliver,
            Some(&p.alice),
            Some(json!({ "placement_url": "https://alice.example/partners" })),
        )
        .await;
        assert_eq!(body["status"], "ACTIVE");
        assert_eq!(body["requester_placement_url"], "https://alice.example/partners");

        let (_, body) = send(
            &p.app,
            "POST",
            &deliver,
            Some(&p.bob),
            Some(json!({ "placement_url": "https://bob.example/friends" })),
        )
        .await;
        assert_eq!(body["status"], "COMPLETED");
        assert_eq!(body["history"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_open_exchange_rejected_in_either_direction() {
        let p = pair();
        assert_eq!(propose(&p).await.0, StatusCode::CREATED);
        assert_eq!(propose(&p).await.0, StatusCode::CONFLICT);

        let (status, _) = send(
            &p.app,
            "POST",
            "/v1/exchanges",
            Some(&p.bob),
            Some(json!({
                "requester_site_id": p.bob_site,
                "target_site_id": p.alice_site,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn closed_site_cannot_exchange() {
        let p = pair();
        p.state.sites.update(&p.bob_site, |s| s.allows_exchange = false);
        assert_eq!(propose(&p).await.0, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn requester_cannot_accept_own_proposal() {
        let p = pair();
        let (_, body) = propose(&p).await;
        let id = id_of(&body);
        let (status, _) =
            send(&p.app, "POST", &format!("/v1/exchanges/{id}/accept"), Some(&p.alice), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn delivery_requires_active_exchange() {
        let p = pair();
        let (_, body) = propose(&p).await;
        let id = id_of(&body);
        let (status, _) = send(
            &p.app,
            "POST",
            &format!("/v1/exchanges/{id}/deliver"),
            Some(&p.alice),
            Some(json!({ "placement_url": "https://alice.example/x" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn cancelled_exchange_allows_new_proposal() {
        let p = pair();
        let (_, body) = propose(&p).await;
        let id = id_of(&body);
        let (status, body) =
            send(&p.app, "POST", &format!("/v1/exchanges/{id}/cancel"), Some(&p.alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "CANCELLED");
        assert_eq!(propose(&p).await.0, StatusCode::CREATED);

        let (_, body) = send(&p.app, "GET", "/v1/exchanges?status=cancelled", Some(&p.bob), None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn target_rejects_rather_than_cancels_pending_proposal() {
        let p = pair();
        let (_, body) = propose(&p).await;
        let id = id_of(&body);

        let (status, _) =
            send(&p.app, "POST", &format!("/v1/exchanges/{id}/cancel"), Some(&p.bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (_, body) = send(&p.app, "GET", &format!("/v1/exchanges/{id}"), Some(&p.bob), None).await;
        assert_eq!(body["status"], "PENDING");

        // Once active, the target may walk away too.
        let (status, _) =
            send(&p.app, "POST", &format!("/v1/exchanges/{id}/accept"), Some(&p.bob), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) =
            send(&p.app, "POST", &format!("/v1/exchanges/{id}/cancel"), Some(&p.bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "CANCELLED");
    }

    #[tokio::test]
    async fn strangers_cannot_see_exchange() {
        let p = pair();
        let (_, body) = propose(&p).await;
        let id = id_of(&body);
        let (_, stranger) = seed_user(&p.state, "carol", Role::User);
        let (status, _) =
            send(&p.app, "GET", &format!("/v1/exchanges/{id}"), Some(&stranger), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) =
            send(&p.app, "POST", &format!("/v1/exchanges/{id}/cancel"), Some(&stranger), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
