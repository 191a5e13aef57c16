//! # Admin API
//!
//! Moderation and back-office tooling. Site moderation, the user list,
//! bans and the ticket queue are open to employees; everything that moves
//! money or changes roles requires an admin.
//!
//! | Method | Path | Handler | Role |
//! |--------|------|---------|------|
//! | `GET` | `/v1/admin/stats` | `stats` | employee |
//! | `GET` | `/v1/admin/users` | `list_users` | employee |
//! | `POST` | `/v1/admin/users/:id/ban` | `ban_user` | employee |
//! | `POST` | `/v1/admin/users/:id/unban` | `unban_user` | employee |
//! | `POST` | `/v1/admin/users/:id/role` | `set_role` | admin |
//! | `GET` | `/v1/admin/sites` | `list_sites` | employee |
//! | `POST` | `/v1/admin/sites/:id/approve` | `approve_site` | employee |
//! | `POST` | `/v1/admin/sites/:id/reject` | `reject_site` | employee |
//! | `POST` | `/v1/admin/sites/:id/suspend` | `suspend_site` | employee |
//! | `GET` | `/v1/admin/funding-requests` | `list_funding_requests` | admin |
//! | `POST` | `/v1/admin/funding-requests/:id/approve` | `approve_funding_request` | admin |
//! | `POST` | `/v1/admin/funding-requests/:id/reject` | `reject_funding_request` | admin |
//! | `POST` | `/v1/admin/orders/:id/resolve` | `resolve_dispute` | admin |
//! | `POST` | `/v1/admin/orders/auto-complete` | `run_auto_complete` | admin |
//! | `POST` | `/v1/admin/wallets/:user_id/adjust` | `adjust_wallet` | admin |
//! | `GET` | `/v1/admin/fees` | `get_fees` | admin |
//! | `PUT` | `/v1/admin/fees` | `update_fees` | admin |
//! | `GET` | `/v1/admin/fee-records` | `list_fee_records` | admin |
//! | `GET` | `/v1/admin/ledger/reconcile` | `reconcile_ledger` | admin |
//! | `GET` | `/v1/admin/audit` | `list_audit_events` | admin |
//! | `GET` | `/v1/admin/audit/verify` | `verify_audit_chain` | admin |
//! | `GET` | `/v1/admin/tickets` | `list_all_tickets` | employee |

use std::collections::BTreeMap;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use linkex_core::{Money, ValidationError};
use linkex_ledger::{FeeRecord, FeeSchedule, Reconciliation};
use linkex_state::{
    advance, ExchangeStatus, Lifecycle, OrderStatus, RequestKind, RequestStatus, SiteStatus,
    TicketStatus,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::audit::{AuditEvent, ChainIntegrity, NewAuditEvent};
use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_json, extract_query, extract_validated_json, Validate};
use crate::routes::wallet::{escrow_held_for, WalletView};
use crate::routes::{load_user, parse_filter};
use crate::settlement::{apply_order_transition, auto_complete_sweep, SweepReport};
use crate::state::{
    AppState, FundingRequestRecord, OrderRecord, SiteRecord, TicketRecord, UserRecord,
};

const DEFAULT_AUDIT_LIMIT: usize = 100;
const MAX_AUDIT_LIMIT: usize = 1_000;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Marketplace-wide counters.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AdminStats {
    /// Users by role.
    pub users: BTreeMap<String, usize>,
    pub banned_users: usize,
    /// Sites by moderation status.
    pub sites: BTreeMap<String, usize>,
    /// Orders by status.
    pub orders: BTreeMap<String, usize>,
    pub open_exchanges: usize,
    /// Held in escrow across all open orders, in cents.
    pub escrow: i64,
    /// Platform fees collected, in cents.
    pub fee_revenue: i64,
    pub pending_deposits: usize,
    pub pending_withdrawals: usize,
    pub open_tickets: usize,
    /// HTTP requests served since startup.
    pub requests_served: u64,
    /// HTTP responses with a 4xx or 5xx status since startup.
    pub request_errors: u64,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserSearchQuery {
    /// Case-insensitive substring of username or email.
    pub q: Option<String>,
}

/// Reason attached to a ban, rejection or suspension.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ReasonRequest {
    pub reason: String,
}

impl Validate for ReasonRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        linkex_core::validate_text("reason", &self.reason, 1, 1_000).map(|_| ())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SetRoleRequest {
    /// USER, EMPLOYEE or ADMIN.
    pub role: Role,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StatusQuery {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FundingQuery {
    /// PENDING, APPROVED or REJECTED.
    pub status: Option<String>,
    /// DEPOSIT or WITHDRAWAL.
    pub kind: Option<String>,
}

/// Optional note recorded with a funding decision.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct DecisionRequest {
    #[serde(default)]
    pub note: Option<String>,
}

impl Validate for DecisionRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(note) = &self.note {
            linkex_core::validate_text("note", note, 0, 1_000)?;
        }
        Ok(())
    }
}

/// How a disputed order ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeOutcome {
    ReleaseToSeller,
    RefundBuyer,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ResolveDisputeRequest {
    pub outcome: DisputeOutcome,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct AdjustWalletRequest {
    /// Signed amount in cents. Negative amounts debit the wallet.
    pub amount: i64,
    pub memo: String,
}

impl Validate for AdjustWalletRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.amount == 0 {
            return Err(ValidationError::InvalidAmount("0".into()));
        }
        linkex_core::validate_text("memo", &self.memo, 1, 500).map(|_| ())
    }
}

/// Fee schedule with amounts in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct FeeScheduleBody {
    pub order_commission_bps: u32,
    pub withdrawal_fee_bps: u32,
    pub referral_commission_bps: u32,
    pub min_deposit: i64,
    pub min_withdrawal: i64,
}

impl From<FeeSchedule> for FeeScheduleBody {
    fn from(s: FeeSchedule) -> Self {
        Self {
            order_commission_bps: s.order_commission_bps,
            withdrawal_fee_bps: s.withdrawal_fee_bps,
            referral_commission_bps: s.referral_commission_bps,
            min_deposit: s.min_deposit.cents(),
            min_withdrawal: s.min_withdrawal.cents(),
        }
    }
}

impl From<FeeScheduleBody> for FeeSchedule {
    fn from(b: FeeScheduleBody) -> Self {
        Self {
            order_commission_bps: b.order_commission_bps,
            withdrawal_fee_bps: b.withdrawal_fee_bps,
            referral_commission_bps: b.referral_commission_bps,
            min_deposit: Money::from_cents(b.min_deposit),
            min_withdrawal: Money::from_cents(b.min_withdrawal),
        }
    }
}

/// One platform fee.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FeeRecordView {
    pub id: Uuid,
    /// ORDER_COMMISSION or WITHDRAWAL_FEE.
    pub source: String,
    /// Order or funding request the fee was taken from.
    pub reference_id: Uuid,
    pub payer_id: Uuid,
    pub gross: i64,
    pub fee: i64,
    pub created_at: DateTime<Utc>,
}

impl From<FeeRecord> for FeeRecordView {
    fn from(r: FeeRecord) -> Self {
        Self {
            id: r.id,
            source: r.source.as_str().to_string(),
            reference_id: r.reference_id,
            payer_id: r.payer_id,
            gross: r.gross.cents(),
            fee: r.fee.cents(),
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditQuery {
    /// e.g. `order`, `site`, `funding_request`.
    pub resource_type: Option<String>,
    /// Defaults to 100, at most 1000.
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/stats", get(stats))
        .route("/v1/admin/users", get(list_users))
        .route("/v1/admin/users/:id/ban", post(ban_user))
        .route("/v1/admin/users/:id/unban", post(unban_user))
        .route("/v1/admin/users/:id/role", post(set_role))
        .route("/v1/admin/sites", get(list_sites))
        .route("/v1/admin/sites/:id/approve", post(approve_site))
        .route("/v1/admin/sites/:id/reject", post(reject_site))
        .route("/v1/admin/sites/:id/suspend", post(suspend_site))
        .route("/v1/admin/funding-requests", get(list_funding_requests))
        .route(
            "/v1/admin/funding-requests/:id/approve",
            post(approve_funding_request),
        )
        .route(
            "/v1/admin/funding-requests/:id/reject",
            post(reject_funding_request),
        )
        .route("/v1/admin/orders/auto-complete", post(run_auto_complete))
        .route("/v1/admin/orders/:id/resolve", post(resolve_dispute))
        .route("/v1/admin/wallets/:user_id/adjust", post(adjust_wallet))
        .route("/v1/admin/fees", get(get_fees).put(update_fees))
        .route("/v1/admin/fee-records", get(list_fee_records))
        .route("/v1/admin/ledger/reconcile", get(reconcile_ledger))
        .route("/v1/admin/audit", get(list_audit_events))
        .route("/v1/admin/audit/verify", get(verify_audit_chain))
        .route("/v1/admin/tickets", get(list_all_tickets))
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// GET /v1/admin/stats
#[utoipa::path(
    get,
    path = "/v1/admin/stats",
    responses(
        (status = 200, description = "Marketplace counters", body = AdminStats),
        (status = 403, description = "Staff only", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub(crate) async fn stats(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<AdminStats>, AppError> {
    require_role(&caller, Role::Employee)?;

    let users = [Role::User, Role::Employee, Role::Admin]
        .into_iter()
        .map(|r| (r.as_str().to_string(), state.users.count(|u| u.role == r)))
        .collect();
    let sites = SiteStatus::ALL
        .into_iter()
        .map(|s| (s.as_str().to_string(), state.sites.count(|x| x.status == s)))
        .collect();
    let orders = OrderStatus::ALL
        .into_iter()
        .map(|s| (s.as_str().to_string(), state.orders.count(|o| o.status == s)))
        .collect();
    let pending = |kind: RequestKind| {
        state
            .funding_requests
            .count(|r| r.kind == kind && r.status == RequestStatus::Pending)
    };
    let totals = state.ledger.totals();

    Ok(Json(AdminStats {
        users,
        banned_users: state.users.count(|u| u.banned),
        sites,
        orders,
        open_exchanges: state
            .exchanges
            .count(|e| matches!(e.status, ExchangeStatus::Pending | ExchangeStatus::Active)),
        escrow: totals.escrow.cents(),
        fee_revenue: totals.fee_revenue.cents(),
        pending_deposits: pending(RequestKind::Deposit),
        pending_withdrawals: pending(RequestKind::Withdrawal),
        open_tickets: state.tickets.count(|t| t.status != TicketStatus::Closed),
        requests_served: state.metrics.requests(),
        request_errors: state.metrics.errors(),
    }))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// GET /v1/admin/users — Search accounts, newest first.
#[utoipa::path(
    get,
    path = "/v1/admin/users",
    params(UserSearchQuery),
    responses((status = 200, description = "Matching users", body = Vec<UserRecord>)),
    tag = "admin"
)]
pub(crate) async fn list_users(
    State(state): State<AppState>,
    caller: CallerIdentity,
    query: Result<Query<UserSearchQuery>, QueryRejection>,
) -> Result<Json<Vec<UserRecord>>, AppError> {
    require_role(&caller, Role::Employee)?;
    let q = extract_query(query)?;
    let needle = q
        .q
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());
    let mut users = state.users.filter(|u| match &needle {
        None => true,
        Some(n) => u.username.to_lowercase().contains(n) || u.email.contains(n),
    });
    users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(users))
}

/// Employees may act on plain users only; admins on anyone but themselves.
fn check_authority(caller: &CallerIdentity, target: &UserRecord) -> Result<(), AppError> {
    if !caller.operator && target.id == caller.user_id {
        return Err(AppError::Conflict("you cannot change your own account standing".into()));
    }
    if target.role >= Role::Employee && !caller.has_role(Role::Admin) {
        return Err(AppError::Forbidden("only an admin can act on staff accounts".into()));
    }
    Ok(())
}

/// POST /v1/admin/users/:id/ban — Ban a user and end their sessions.
#[utoipa::path(
    post,
    path = "/v1/admin/users/{id}/ban",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = ReasonRequest,
    responses(
        (status = 200, description = "User banned", body = UserRecord),
        (status = 409, description = "Already banned", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub(crate) async fn ban_user(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ReasonRequest>, JsonRejection>,
) -> Result<Json<UserRecord>, AppError> {
    require_role(&caller, Role::Employee)?;
    let req = extract_validated_json(body)?;
    let reason = req.reason.trim().to_string();

    let updated = state
        .users
        .try_update(&id, |user| {
            check_authority(&caller, user)?;
            if user.banned {
                return Err(AppError::Conflict(format!("user {id} is already banned")));
            }
            user.banned = true;
            user.ban_reason = Some(reason.clone());
            user.updated_at = Utc::now();
            Ok(user.clone())
        })
        .ok_or_else(|| AppError::NotFound(format!("user {id} not found")))??;
    state.persist_user(&updated).await?;

    let revoked = state.sessions.revoke_user(id, None);
    state.forget_sessions(&revoked).await?;

    state
        .audit(
            NewAuditEvent::new("user", id, "BANNED", caller.actor())
                .with_metadata(serde_json::json!({ "reason": reason, "sessions_revoked": revoked.len() })),
        )
        .await;
    tracing::warn!(user_id = %id, sessions_revoked = revoked.len(), "user banned");
    Ok(Json(updated))
}

/// POST /v1/admin/users/:id/unban
#[utoipa::path(
    post,
    path = "/v1/admin/users/{id}/unban",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User unbanned", body = UserRecord),
        (status = 409, description = "Not banned", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub(crate) async fn unban_user(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<UserRecord>, AppError> {
    require_role(&caller, Role::Employee)?;
    let updated = state
        .users
        .try_update(&id, |user| {
            check_authority(&caller, user)?;
            if !user.banned {
                return Err(AppError::Conflict(format!("user {id} is not banned")));
            }
            user.banned = false;
            user.ban_reason = None;
            user.updated_at = Utc::now();
            Ok(user.clone())
        })
        .ok_or_else(|| AppError::NotFound(format!("user {id} not found")))??;
    state.persist_user(&updated).await?;
    state
        .audit(NewAuditEvent::new("user", id, "UNBANNED", caller.actor()))
        .await;
    Ok(Json(updated))
}

/// POST /v1/admin/users/:id/role — Change a user's role.
#[utoipa::path(
    post,
    path = "/v1/admin/users/{id}/role",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = SetRoleRequest,
    responses(
        (status = 200, description = "Role changed", body = UserRecord),
        (status = 409, description = "Admins cannot demote themselves", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub(crate) async fn set_role(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<SetRoleRequest>, JsonRejection>,
) -> Result<Json<UserRecord>, AppError> {
    require_role(&caller, Role::Admin)?;
    let req = extract_json(body)?;
    if !caller.operator && id == caller.user_id && req.role < Role::Admin {
        return Err(AppError::Conflict("admins cannot demote themselves".into()));
    }

    let (updated, previous) = state
        .users
        .try_update(&id, |user| {
            let previous = user.role;
            user.role = req.role;
            user.updated_at = Utc::now();
            Ok::<_, AppError>((user.clone(), previous))
        })
        .ok_or_else(|| AppError::NotFound(format!("user {id} not found")))??;
    state.persist_user(&updated).await?;
    state
        .audit(
            NewAuditEvent::new("user", id, "ROLE_CHANGED", caller.actor()).with_metadata(
                serde_json::json!({ "from": previous.as_str(), "to": req.role.as_str() }),
            ),
        )
        .await;
    tracing::info!(user_id = %id, from = previous.as_str(), to = req.role.as_str(), "role changed");
    Ok(Json(updated))
}

// ---------------------------------------------------------------------------
// Site moderation
// ---------------------------------------------------------------------------

/// GET /v1/admin/sites — Moderation queue, oldest first.
#[utoipa::path(
    get,
    path = "/v1/admin/sites",
    params(StatusQuery),
    responses((status = 200, description = "Sites", body = Vec<SiteRecord>)),
    tag = "admin"
)]
pub(crate) async fn list_sites(
    State(state): State<AppState>,
    caller: CallerIdentity,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<Vec<SiteRecord>>, AppError> {
    require_role(&caller, Role::Employee)?;
    let q = extract_query(query)?;
    let status = parse_filter("status", q.status.as_deref(), SiteStatus::from_name)?;
    let mut sites = state
        .sites
        .filter(|s| status.map_or(true, |wanted| s.status == wanted));
    sites.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(Json(sites))
}

async fn moderate(
    state: &AppState,
    caller: &CallerIdentity,
    id: Uuid,
    to: SiteStatus,
    reason: Option<String>,
) -> Result<SiteRecord, AppError> {
    require_role(caller, Role::Employee)?;
    let updated = state
        .sites
        .try_update(&id, |site| {
            let mut next = site.clone();
            advance(
                &mut next.status,
                &mut next.history,
                to,
                caller.actor(),
                reason.clone(),
            )?;
            next.moderation_note = reason.clone();
            next.updated_at = Utc::now();
            *site = next.clone();
            Ok::<_, AppError>(next)
        })
        .ok_or_else(|| AppError::NotFound(format!("site {id} not found")))??;
    state.persist_site(&updated).await?;

    let message = match &reason {
        Some(r) => format!("Your site {} is now {}: {r}", updated.domain, to),
        None => format!("Your site {} is now {}", updated.domain, to),
    };
    state
        .notify(
            updated.owner_id,
            &format!("site.{}", to.as_str().to_lowercase()),
            message,
            Some(updated.id),
        )
        .await;
    state
        .audit(
            NewAuditEvent::new("site", id, to.as_str(), caller.actor())
                .with_metadata(serde_json::json!({ "domain": updated.domain, "reason": reason })),
        )
        .await;
    tracing::info!(site_id = %id, domain = %updated.domain, status = %to, "site moderated");
    Ok(updated)
}

/// POST /v1/admin/sites/:id/approve
#[utoipa::path(
    post,
    path = "/v1/admin/sites/{id}/approve",
    params(("id" = Uuid, Path, description = "Site ID")),
    responses(
        (status = 200, description = "Site approved", body = SiteRecord),
        (status = 409, description = "Not awaiting approval", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub(crate) async fn approve_site(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<SiteRecord>, AppError> {
    moderate(&state, &caller, id, SiteStatus::Approved, None)
        .await
        .map(Json)
}

/// POST /v1/admin/sites/:id/reject
#[utoipa::path(
    post,
    path = "/v1/admin/sites/{id}/reject",
    params(("id" = Uuid, Path, description = "Site ID")),
    request_body = ReasonRequest,
    responses(
        (status = 200, description = "Site rejected", body = SiteRecord),
        (status = 409, description = "Not awaiting approval", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub(crate) async fn reject_site(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ReasonRequest>, JsonRejection>,
) -> Result<Json<SiteRecord>, AppError> {
    let req = extract_validated_json(body)?;
    let reason = req.reason.trim().to_string();
    moderate(&state, &caller, id, SiteStatus::Rejected, Some(reason))
        .await
        .map(Json)
}

/// POST /v1/admin/sites/:id/suspend — Pull an approved site from the
/// marketplace. Its listings stop showing; open orders continue.
#[utoipa::path(
    post,
    path = "/v1/admin/sites/{id}/suspend",
    params(("id" = Uuid, Path, description = "Site ID")),
    request_body = ReasonRequest,
    responses(
        (status = 200, description = "Site suspended", body = SiteRecord),
        (status = 409, description = "Site is not approved", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub(crate) async fn suspend_site(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ReasonRequest>, JsonRejection>,
) -> Result<Json<SiteRecord>, AppError> {
    let req = extract_validated_json(body)?;
    let reason = req.reason.trim().to_string();
    moderate(&state, &caller, id, SiteStatus::Suspended, Some(reason))
        .await
        .map(Json)
}

// ---------------------------------------------------------------------------
// Funding requests
// ---------------------------------------------------------------------------

/// GET /v1/admin/funding-requests — Deposit and withdrawal queue, oldest first.
#[utoipa::path(
    get,
    path = "/v1/admin/funding-requests",
    params(FundingQuery),
    responses((status = 200, description = "Funding requests", body = Vec<FundingRequestRecord>)),
    tag = "admin"
)]
pub(crate) async fn list_funding_requests(
    State(state): State<AppState>,
    caller: CallerIdentity,
    query: Result<Query<FundingQuery>, QueryRejection>,
) -> Result<Json<Vec<FundingRequestRecord>>, AppError> {
    require_role(&caller, Role::Admin)?;
    let q = extract_query(query)?;
    let status = parse_filter("status", q.status.as_deref(), RequestStatus::from_name)?;
    let kind = parse_filter("kind", q.kind.as_deref(), RequestKind::from_name)?;
    let mut items = state.funding_requests.filter(|r| {
        status.map_or(true, |s| r.status == s) && kind.map_or(true, |k| r.kind == k)
    });
    items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(Json(items))
}

async fn decide_funding_request(
    state: &AppState,
    caller: &CallerIdentity,
    id: Uuid,
    to: RequestStatus,
    note: Option<String>,
) -> Result<FundingRequestRecord, AppError> {
    require_role(caller, Role::Admin)?;
    let schedule = state.fee_schedule();
    let (record, posting) = state
        .funding_requests
        .try_update(&id, |request| {
            let mut next = request.clone();
            advance(
                &mut next.status,
                &mut next.history,
                to,
                caller.actor(),
                note.clone(),
            )?;
            let posting = match (next.kind, to) {
                (RequestKind::Deposit, RequestStatus::Approved) => Some(state.ledger.deposit(
                    next.user_id,
                    next.amount,
                    Some(next.id),
                    &format!("Deposit via {}", next.method),
                )?),
                (RequestKind::Withdrawal, RequestStatus::Approved) => {
                    let (net, posting) = state.ledger.finalize_withdrawal(next.id, &schedule)?;
                    next.net_payout = Some(net);
                    Some(posting)
                }
                (RequestKind::Withdrawal, RequestStatus::Rejected) => {
                    Some(state.ledger.reverse_withdrawal(next.id)?)
                }
                _ => None,
            };
            let now = Utc::now();
            next.note = note.clone();
            next.decided_by = caller.actor();
            next.decided_at = Some(now);
            next.updated_at = now;
            *request = next.clone();
            Ok::<_, AppError>((next, posting))
        })
        .ok_or_else(|| AppError::NotFound(format!("funding request {id} not found")))??;

    if let Some(posting) = &posting {
        state.persist_posting(posting).await?;
    }
    state.persist_funding_request(&record).await?;

    let kind = record.kind.as_str().to_lowercase();
    let verb = to.as_str().to_lowercase();
    let message = match record.net_payout {
        Some(net) => format!("Your {kind} of {} was {verb}; {net} is on its way", record.amount),
        None => format!("Your {kind} of {} was {verb}", record.amount),
    };
    state
        .notify(record.user_id, &format!("{kind}.{verb}"), message, Some(record.id))
        .await;
    state
        .audit(
            NewAuditEvent::new("funding_request", id, to.as_str(), caller.actor()).with_metadata(
                serde_json::json!({
                    "kind": record.kind.as_str(),
                    "user_id": record.user_id,
                    "amount_cents": record.amount.cents(),
                    "net_payout_cents": record.net_payout.map(|m| m.cents()),
                    "note": record.note,
                }),
            ),
        )
        .await;
    tracing::info!(
        request_id = %id,
        kind = record.kind.as_str(),
        status = %to,
        amount = %record.amount,
        "funding request decided"
    );
    Ok(record)
}

/// POST /v1/admin/funding-requests/:id/approve — Credit a deposit or pay
/// out a withdrawal.
#[utoipa::path(
    post,
    path = "/v1/admin/funding-requests/{id}/approve",
    params(("id" = Uuid, Path, description = "Funding request ID")),
    request_body = DecisionRequest,
    responses(
        (status = 200, description = "Request approved", body = FundingRequestRecord),
        (status = 409, description = "Already decided", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub(crate) async fn approve_funding_request(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<DecisionRequest>, JsonRejection>,
) -> Result<Json<FundingRequestRecord>, AppError> {
    let req = extract_validated_json(body)?;
    decide_funding_request(&state, &caller, id, RequestStatus::Approved, req.note)
        .await
        .map(Json)
}

/// POST /v1/admin/funding-requests/:id/reject — Decline a request. A
/// withdrawal's held funds return to the balance.
#[utoipa::path(
    post,
    path = "/v1/admin/funding-requests/{id}/reject",
    params(("id" = Uuid, Path, description = "Funding request ID")),
    request_body = DecisionRequest,
    responses(
        (status = 200, description = "Request rejected", body = FundingRequestRecord),
        (status = 409, description = "Already decided", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub(crate) async fn reject_funding_request(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<DecisionRequest>, JsonRejection>,
) -> Result<Json<FundingRequestRecord>, AppError> {
    let req = extract_validated_json(body)?;
    decide_funding_request(&state, &caller, id, RequestStatus::Rejected, req.note)
        .await
        .map(Json)
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// POST /v1/admin/orders/:id/resolve — Settle a disputed order.
#[utoipa::path(
    post,
    path = "/v1/admin/orders/{id}/resolve",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = ResolveDisputeRequest,
    responses(
        (status = 200, description = "Dispute resolved", body = OrderRecord),
        (status = 409, description = "Order is not disputed", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub(crate) async fn resolve_dispute(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ResolveDisputeRequest>, JsonRejection>,
) -> Result<Json<OrderRecord>, AppError> {
    require_role(&caller, Role::Admin)?;
    let req = extract_json(body)?;
    let note = req
        .note
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    let to = match req.outcome {
        DisputeOutcome::ReleaseToSeller => OrderStatus::Completed,
        DisputeOutcome::RefundBuyer => OrderStatus::Refunded,
    };
    let done = apply_order_transition(&state, id, to, caller.actor(), note, |order| {
        if order.status == OrderStatus::Disputed {
            Ok(())
        } else {
            Err(AppError::Conflict(format!(
                "order is {}, not DISPUTED",
                order.status.as_str()
            )))
        }
    })
    .await?;
    Ok(Json(done.order))
}

/// POST /v1/admin/orders/auto-complete — Run the auto-complete sweep now.
#[utoipa::path(
    post,
    path = "/v1/admin/orders/auto-complete",
    responses((status = 200, description = "Sweep report", body = SweepReport)),
    tag = "admin"
)]
pub(crate) async fn run_auto_complete(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<SweepReport>, AppError> {
    require_role(&caller, Role::Admin)?;
    Ok(Json(auto_complete_sweep(&state, Utc::now()).await))
}

// ---------------------------------------------------------------------------
// Wallets, fees, ledger
// ---------------------------------------------------------------------------

/// POST /v1/admin/wallets/:user_id/adjust — Manual balance correction.
#[utoipa::path(
    post,
    path = "/v1/admin/wallets/{user_id}/adjust",
    params(("user_id" = Uuid, Path, description = "Wallet owner")),
    request_body = AdjustWalletRequest,
    responses(
        (status = 200, description = "Wallet after adjustment", body = WalletView),
        (status = 402, description = "Debit exceeds balance", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub(crate) async fn adjust_wallet(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(user_id): Path<Uuid>,
    body: Result<Json<AdjustWalletRequest>, JsonRejection>,
) -> Result<Json<WalletView>, AppError> {
    require_role(&caller, Role::Admin)?;
    let req = extract_validated_json(body)?;
    let user = load_user(&state, user_id)?;
    let amount = Money::from_cents(req.amount);
    let memo = req.memo.trim();

    let posting = state.ledger.adjust(user.id, amount, memo)?;
    state.persist_posting(&posting).await?;
    state
        .notify(
            user.id,
            "wallet.adjusted",
            format!("Your balance was adjusted by {amount}: {memo}"),
            None,
        )
        .await;
    state
        .audit(
            NewAuditEvent::new("wallet", user.id, "ADJUSTED", caller.actor()).with_metadata(
                serde_json::json!({ "amount_cents": amount.cents(), "memo": memo }),
            ),
        )
        .await;

    let wallet = state
        .ledger
        .wallet(user.id)
        .ok_or_else(|| AppError::Internal(format!("wallet for {} vanished", user.id)))?;
    Ok(Json(WalletView::new(
        wallet,
        escrow_held_for(&state, user.id),
    )))
}

/// GET /v1/admin/fees
#[utoipa::path(
    get,
    path = "/v1/admin/fees",
    responses((status = 200, description = "Current fee schedule", body = FeeScheduleBody)),
    tag = "admin"
)]
pub(crate) async fn get_fees(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<FeeScheduleBody>, AppError> {
    require_role(&caller, Role::Admin)?;
    Ok(Json(state.fee_schedule().into()))
}

/// PUT /v1/admin/fees — Replace the fee schedule. Applies to settlements
/// and funding decisions from now on.
#[utoipa::path(
    put,
    path = "/v1/admin/fees",
    request_body = FeeScheduleBody,
    responses(
        (status = 200, description = "Fee schedule updated", body = FeeScheduleBody),
        (status = 422, description = "Rate above 100% or non-positive minimum", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub(crate) async fn update_fees(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<FeeScheduleBody>, JsonRejection>,
) -> Result<Json<FeeScheduleBody>, AppError> {
    require_role(&caller, Role::Admin)?;
    let schedule: FeeSchedule = extract_json(body)?.into();
    schedule.validate()?;

    let previous = std::mem::replace(&mut *state.fees.write(), schedule);
    state.persist_fee_schedule(&schedule).await?;
    state
        .audit(
            NewAuditEvent::new("settings", Uuid::nil(), "FEES_UPDATED", caller.actor())
                .with_metadata(serde_json::json!({
                    "from": FeeScheduleBody::from(previous),
                    "to": FeeScheduleBody::from(schedule),
                })),
        )
        .await;
    tracing::info!(schedule = ?schedule, "fee schedule updated");
    Ok(Json(schedule.into()))
}

/// GET /v1/admin/fee-records — Fees collected, newest first.
#[utoipa::path(
    get,
    path = "/v1/admin/fee-records",
    responses((status = 200, description = "Fee records", body = Vec<FeeRecordView>)),
    tag = "admin"
)]
pub(crate) async fn list_fee_records(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<FeeRecordView>>, AppError> {
    require_role(&caller, Role::Admin)?;
    Ok(Json(
        state
            .ledger
            .fee_records()
            .into_iter()
            .map(FeeRecordView::from)
            .collect(),
    ))
}

/// GET /v1/admin/ledger/reconcile — Replay the ledger and check that every
/// cent is accounted for.
#[utoipa::path(
    get,
    path = "/v1/admin/ledger/reconcile",
    responses((status = 200, description = "Reconciliation report; amounts in cents")),
    tag = "admin"
)]
pub(crate) async fn reconcile_ledger(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Reconciliation>, AppError> {
    require_role(&caller, Role::Admin)?;
    let report = state.ledger.reconcile();
    if !report.balanced {
        tracing::error!(
            held = %report.held,
            expected = %report.expected,
            mismatches = report.wallet_mismatches.len(),
            "ledger does not reconcile"
        );
    }
    Ok(Json(report))
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// GET /v1/admin/audit — Recent audit events, newest first.
#[utoipa::path(
    get,
    path = "/v1/admin/audit",
    params(AuditQuery),
    responses((status = 200, description = "Audit events", body = Vec<AuditEvent>)),
    tag = "admin"
)]
pub(crate) async fn list_audit_events(
    State(state): State<AppState>,
    caller: CallerIdentity,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> Result<Json<Vec<AuditEvent>>, AppError> {
    require_role(&caller, Role::Admin)?;
    let q = extract_query(query)?;
    let limit = q
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);
    Ok(Json(state.audit.recent(q.resource_type.as_deref(), limit)))
}

/// GET /v1/admin/audit/verify — Check the audit hash chain.
#[utoipa::path(
    get,
    path = "/v1/admin/audit/verify",
    responses((status = 200, description = "Chain integrity report", body = ChainIntegrity)),
    tag = "admin"
)]
pub(crate) async fn verify_audit_chain(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<ChainIntegrity>, AppError> {
    require_role(&caller, Role::Admin)?;
    let report = state.audit.verify();
    if !report.chain_valid {
        tracing::error!(
            broken_links = report.broken_links,
            tampered_events = report.tampered_events,
            "audit chain verification failed"
        );
    }
    Ok(Json(report))
}

// ---------------------------------------------------------------------------
// Support queue
// ---------------------------------------------------------------------------

/// GET /v1/admin/tickets — All tickets, least recently updated first.
#[utoipa::path(
    get,
    path = "/v1/admin/tickets",
    params(StatusQuery),
    responses((status = 200, description = "Tickets", body = Vec<TicketRecord>)),
    tag = "admin"
)]
pub(crate) async fn list_all_tickets(
    State(state): State<AppState>,
    caller: CallerIdentity,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<Vec<TicketRecord>>, AppError> {
    require_role(&caller, Role::Employee)?;
    let q = extract_query(query)?;
    let status = parse_filter("status", q.status.as_deref(), TicketStatus::from_name)?;
    let mut items = state
        .tickets
        .filter(|t| status.map_or(true, |s| t.status == s));
    items.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
    Ok(Json(items))
}
