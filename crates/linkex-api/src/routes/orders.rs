//! # Orders API
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/v1/orders` | `create_order` |
//! | `GET` | `/v1/orders` | `list_orders` |
//! | `GET` | `/v1/orders/:id` | `get_order` |
//! | `POST` | `/v1/orders/:id/accept` | `accept_order` |
//! | `POST` | `/v1/orders/:id/reject` | `reject_order` |
//! | `POST` | `/v1/orders/:id/deliver` | `deliver_order` |
//! | `POST` | `/v1/orders/:id/revision` | `request_revision` |
//! | `POST` | `/v1/orders/:id/complete` | `complete_order` |
//! | `POST` | `/v1/orders/:id/cancel` | `cancel_order` |
//! | `POST` | `/v1/orders/:id/dispute` | `dispute_order` |
//!
//! Placing an order moves the listing price from the buyer's balance into
//! escrow. Status changes go through
//! [`apply_order_transition`](crate::settlement::apply_order_transition),
//! which releases or refunds the escrow as the target status requires.
//!
//! | Action | Who | From |
//! |--------|-----|------|
//! | accept, reject | seller | `PENDING` |
//! | deliver | seller | `IN_PROGRESS`, `REVISION_REQUESTED` |
//! | revision, complete | buyer | `DELIVERED` |
//! | dispute | buyer | `DELIVERED`, `REVISION_REQUESTED` |
//! | cancel | buyer | `PENDING` |
//! | cancel | admin | `PENDING`, `IN_PROGRESS`, `REVISION_REQUESTED` |

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use linkex_core::ValidationError;
use linkex_state::{Lifecycle, OrderStatus};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::audit::NewAuditEvent;
use crate::auth::{CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{
    extract_query, extract_validated_json, OrderPage, Page, PageParams, Validate,
};
use crate::routes::listings::is_public;
use crate::routes::{load_order, parse_filter};
use crate::settlement::apply_order_transition;
use crate::state::{warn_unpersisted, AppState, OrderRecord};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderRequest {
    pub listing_id: Uuid,
    /// Page the placed link should point to.
    pub target_url: String,
    pub anchor_text: String,
    /// Instructions for the seller.
    #[serde(default)]
    pub notes: Option<String>,
}

impl Validate for CreateOrderRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        linkex_core::validate_http_url(&self.target_url)?;
        linkex_core::validate_text("anchor_text", &self.anchor_text, 1, 200)?;
        if let Some(notes) = &self.notes {
            linkex_core::validate_text("notes", notes, 0, 5_000)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct DeliverRequest {
    /// URL of the published article carrying the link.
    pub live_url: String,
}

impl Validate for DeliverRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        linkex_core::validate_http_url(&self.live_url).map(|_| ())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RevisionRequest {
    pub note: String,
}

impl Validate for RevisionRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        linkex_core::validate_text("note", &self.note, 1, 2_000).map(|_| ())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct DisputeRequest {
    pub reason: String,
}

impl Validate for DisputeRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        linkex_core::validate_text("reason", &self.reason, 1, 2_000).map(|_| ())
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderQuery {
    /// `buyer` or `seller`; both when absent.
    pub role: Option<String>,
    /// Order status, e.g. `DELIVERED`.
    pub status: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/orders", post(create_order).get(list_orders))
        .route("/v1/orders/:id", get(get_order))
        .route("/v1/orders/:id/accept", post(accept_order))
        .route("/v1/orders/:id/reject", post(reject_order))
        .route("/v1/orders/:id/deliver", post(deliver_order))
        .route("/v1/orders/:id/revision", post(request_revision))
        .route("/v1/orders/:id/complete", post(complete_order))
        .route("/v1/orders/:id/cancel", post(cancel_order))
        .route("/v1/orders/:id/dispute", post(dispute_order))
}

// ---------------------------------------------------------------------------
// Actor rules
// ---------------------------------------------------------------------------

fn require_seller(order: &OrderRecord, caller: &CallerIdentity) -> Result<(), AppError> {
    if caller.user_id == order.seller_id && !caller.operator {
        Ok(())
    } else {
        Err(AppError::Forbidden("only the seller may do this".into()))
    }
}

fn require_buyer(order: &OrderRecord, caller: &CallerIdentity) -> Result<(), AppError> {
    if caller.user_id == order.buyer_id && !caller.operator {
        Ok(())
    } else {
        Err(AppError::Forbidden("only the buyer may do this".into()))
    }
}

fn require_status(order: &OrderRecord, allowed: &[OrderStatus]) -> Result<(), AppError> {
    if allowed.contains(&order.status) {
        Ok(())
    } else {
        Err(AppError::Conflict(format!(
            "order is {}; this action is not available",
            order.status.as_str()
        )))
    }
}

fn require_cancel_rights(order: &OrderRecord, caller: &CallerIdentity) -> Result<(), AppError> {
    if caller.has_role(Role::Admin) {
        return require_status(
            order,
            &[
                OrderStatus::Pending,
                OrderStatus::InProgress,
                OrderStatus::RevisionRequested,
            ],
        );
    }
    require_buyer(order, caller)?;
    require_status(order, &[OrderStatus::Pending])
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/orders — Buy a listing. The price is held in escrow.
#[utoipa::path(
    post,
    path = "/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order placed, funds in escrow", body = OrderRecord),
        (status = 402, description = "Wallet balance too low", body = crate::error::ErrorBody),
        (status = 404, description = "Listing not found or not for sale", body = crate::error::ErrorBody),
        (status = 409, description = "Buyer owns the listing", body = crate::error::ErrorBody),
    ),
    tag = "orders"
)]
pub(crate) async fn create_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderRecord>), AppError> {
    let buyer_id = caller.account_id()?;
    let req = extract_validated_json(body)?;
    let target_url = linkex_core::validate_http_url(&req.target_url)?;

    // Same lock as site deletion: the site cannot disappear between the
    // availability check and the order insert.
    let (listing, order, posting) = {
        let _guard = state.catalog_lock.lock();
        let listing = state
            .listings
            .get(&req.listing_id)
            .ok_or_else(|| AppError::NotFound(format!("listing {} not found", req.listing_id)))?;
        let site = state.sites.get(&listing.site_id);
        if !is_public(&listing, site.as_ref()) {
            return Err(AppError::NotFound(format!(
                "listing {} is not available",
                listing.id
            )));
        }
        if listing.seller_id == buyer_id {
            return Err(AppError::Conflict("you cannot order your own listing".into()));
        }

        let now = Utc::now();
        let order = OrderRecord {
            id: Uuid::new_v4(),
            listing_id: listing.id,
            site_id: listing.site_id,
            buyer_id,
            seller_id: listing.seller_id,
            price: listing.price,
            target_url,
            anchor_text: req.anchor_text.trim().to_string(),
            notes: req
                .notes
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            live_url: None,
            revision_note: None,
            dispute_reason: None,
            status: OrderStatus::Pending,
            history: Vec::new(),
            fee: None,
            delivered_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        let posting = state
            .ledger
            .hold_for_order(buyer_id, order.id, order.price)?;
        state.orders.insert(order.id, order.clone());
        (listing, order, posting)
    };

    // Committed from here on; write-through failures are logged, not returned.
    warn_unpersisted(state.persist_posting(&posting).await, "escrow posting", order.id);
    warn_unpersisted(state.persist_order(&order).await, "order", order.id);

    state
        .notify(
            order.seller_id,
            "order.placed",
            format!("New order for \"{}\"", listing.title),
            Some(order.id),
        )
        .await;
    state
        .audit(
            NewAuditEvent::new("order", order.id, "CREATED", Some(buyer_id)).with_metadata(
                serde_json::json!({
                    "listing_id": listing.id,
                    "seller_id": order.seller_id,
                    "price_cents": order.price.cents(),
                }),
            ),
        )
        .await;
    tracing::info!(order_id = %order.id, listing_id = %listing.id, price = %order.price, "order placed");
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /v1/orders — The caller's orders, newest first.
#[utoipa::path(
    get,
    path = "/v1/orders",
    params(OrderQuery),
    responses(
        (status = 200, description = "One page of orders", body = OrderPage),
        (status = 400, description = "Unknown role or status filter", body = crate::error::ErrorBody),
    ),
    tag = "orders"
)]
pub(crate) async fn list_orders(
    State(state): State<AppState>,
    caller: CallerIdentity,
    query: Result<Query<OrderQuery>, QueryRejection>,
) -> Result<Json<Page<OrderRecord>>, AppError> {
    let user = caller.account_id()?;
    let q = extract_query(query)?;
    let status = parse_filter("status", q.status.as_deref(), OrderStatus::from_name)?;
    let (as_buyer, as_seller) = match q.role.as_deref() {
        None => (true, true),
        Some("buyer") => (true, false),
        Some("seller") => (false, true),
        Some(other) => {
            return Err(AppError::BadRequest(format!(
                "unknown role '{other}'; expected buyer or seller"
            )))
        }
    };

    let mut items = state.orders.filter(|o| {
        ((as_buyer && o.buyer_id == user) || (as_seller && o.seller_id == user))
            && status.map_or(true, |s| o.status == s)
    });
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let page = PageParams {
        page: q.page,
        per_page: q.per_page,
    };
    Ok(Json(Page::paginate(items, &page)))
}

/// GET /v1/orders/:id — An order. Parties and staff only.
#[utoipa::path(
    get,
    path = "/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order", body = OrderRecord),
        (status = 404, description = "Order not found", body = crate::error::ErrorBody),
    ),
    tag = "orders"
)]
pub(crate) async fn get_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderRecord>, AppError> {
    let order = load_order(&state, id)?;
    if !caller.is_staff() && !order.is_party(caller.user_id) {
        return Err(AppError::NotFound(format!("order {id} not found")));
    }
    Ok(Json(order))
}

/// POST /v1/orders/:id/accept — Seller starts work.
#[utoipa::path(
    post,
    path = "/v1/orders/{id}/accept",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order in progress", body = OrderRecord),
        (status = 403, description = "Not the seller", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
    ),
    tag = "orders"
)]
pub(crate) async fn accept_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderRecord>, AppError> {
    let done = apply_order_transition(
        &state,
        id,
        OrderStatus::InProgress,
        caller.actor(),
        None,
        |order| require_seller(order, &caller),
    )
    .await?;
    Ok(Json(done.order))
}

/// POST /v1/orders/:id/reject — Seller declines; the buyer is refunded.
#[utoipa::path(
    post,
    path = "/v1/orders/{id}/reject",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order rejected and refunded", body = OrderRecord),
        (status = 403, description = "Not the seller", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
    ),
    tag = "orders"
)]
pub(crate) async fn reject_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderRecord>, AppError> {
    let done = apply_order_transition(
        &state,
        id,
        OrderStatus::Rejected,
        caller.actor(),
        None,
        |order| require_seller(order, &caller),
    )
    .await?;
    Ok(Json(done.order))
}

/// POST /v1/orders/:id/deliver — Seller reports the live placement.
#[utoipa::path(
    post,
    path = "/v1/orders/{id}/deliver",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = DeliverRequest,
    responses(
        (status = 200, description = "Order delivered", body = OrderRecord),
        (status = 403, description = "Not the seller", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
    ),
    tag = "orders"
)]
pub(crate) async fn deliver_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<DeliverRequest>, JsonRejection>,
) -> Result<Json<OrderRecord>, AppError> {
    let req = extract_validated_json(body)?;
    let live_url = linkex_core::validate_http_url(&req.live_url)?;
    let done = apply_order_transition(
        &state,
        id,
        OrderStatus::Delivered,
        caller.actor(),
        None,
        |order| {
            require_seller(order, &caller)?;
            order.live_url = Some(live_url);
            Ok(())
        },
    )
    .await?;
    Ok(Json(done.order))
}

/// POST /v1/orders/:id/revision — Buyer asks for changes.
#[utoipa::path(
    post,
    path = "/v1/orders/{id}/revision",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = RevisionRequest,
    responses(
        (status = 200, description = "Revision requested", body = OrderRecord),
        (status = 403, description = "Not the buyer", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
    ),
    tag = "orders"
)]
pub(crate) async fn request_revision(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<RevisionRequest>, JsonRejection>,
) -> Result<Json<OrderRecord>, AppError> {
    let req = extract_validated_json(body)?;
    let note = req.note.trim().to_string();
    let done = apply_order_transition(
        &state,
        id,
        OrderStatus::RevisionRequested,
        caller.actor(),
        Some(note.clone()),
        |order| {
            require_buyer(order, &caller)?;
            order.revision_note = Some(note);
            Ok(())
        },
    )
    .await?;
    Ok(Json(done.order))
}

/// POST /v1/orders/:id/complete — Buyer confirms; escrow goes to the seller.
#[utoipa::path(
    post,
    path = "/v1/orders/{id}/complete",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order completed, seller paid", body = OrderRecord),
        (status = 403, description = "Not the buyer", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
    ),
    tag = "orders"
)]
pub(crate) async fn complete_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderRecord>, AppError> {
    let done = apply_order_transition(
        &state,
        id,
        OrderStatus::Completed,
        caller.actor(),
        None,
        |order| {
            require_buyer(order, &caller)?;
            require_status(order, &[OrderStatus::Delivered])
        },
    )
    .await?;
    Ok(Json(done.order))
}

/// POST /v1/orders/:id/cancel — Cancel and refund the buyer.
#[utoipa::path(
    post,
    path = "/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order cancelled and refunded", body = OrderRecord),
        (status = 403, description = "Caller may not cancel", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
    ),
    tag = "orders"
)]
pub(crate) async fn cancel_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderRecord>, AppError> {
    let done = apply_order_transition(
        &state,
        id,
        OrderStatus::Cancelled,
        caller.actor(),
        None,
        |order| require_cancel_rights(order, &caller),
    )
    .await?;
    Ok(Json(done.order))
}

/// POST /v1/orders/:id/dispute — Buyer escalates to an admin.
#[utoipa::path(
    post,
    path = "/v1/orders/{id}/dispute",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = DisputeRequest,
    responses(
        (status = 200, description = "Order disputed", body = OrderRecord),
        (status = 403, description = "Not the buyer", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
    ),
    tag = "orders"
)]
pub(crate) async fn dispute_order(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<DisputeRequest>, JsonRejection>,
) -> Result<Json<OrderRecord>, AppError> {
    let req = extract_validated_json(body)?;
    let reason = req.reason.trim().to_string();
    let done = apply_order_transition(
        &state,
        id,
        OrderStatus::Disputed,
        caller.actor(),
        Some(reason.clone()),
        |order| {
            require_buyer(order, &caller)?;
            order.dispute_reason = Some(reason);
            Ok(())
        },
    )
    .await?;
    Ok(Json(done.order))
}
