//! # Wallet API
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `GET` | `/v1/wallet` | `get_wallet` |
//! | `GET` | `/v1/wallet/transactions` | `list_transactions` |
//! | `POST` | `/v1/wallet/deposits` | `request_deposit` |
//! | `POST` | `/v1/wallet/withdrawals` | `request_withdrawal` |
//! | `GET` | `/v1/wallet/requests` | `list_requests` |
//!
//! Deposits are credited when an admin approves the request. Withdrawals
//! take the amount out of the spendable balance immediately and hold it
//! until the request is approved (paid out) or rejected (returned).
//! Amounts are integer cents.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use linkex_core::{Money, ValidationError};
use linkex_ledger::{LedgerEntry, Wallet};
use linkex_state::{RequestKind, RequestStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::NewAuditEvent;
use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{
    extract_query, extract_validated_json, Page, PageParams, TransactionPage, Validate,
};
use crate::state::{warn_unpersisted, AppState, FundingRequestRecord};

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// A wallet as shown to its owner.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WalletView {
    pub user_id: Uuid,
    /// Spendable balance in cents.
    pub balance: i64,
    /// Held for pending withdrawal requests.
    pub pending_withdrawal: i64,
    /// Held in escrow for the caller's open orders as buyer.
    pub in_escrow: i64,
    pub total_deposited: i64,
    pub total_withdrawn: i64,
    pub total_earned: i64,
    pub total_spent: i64,
    pub updated_at: DateTime<Utc>,
}

impl WalletView {
    pub(crate) fn new(wallet: Wallet, in_escrow: Money) -> Self {
        Self {
            user_id: wallet.user_id,
            balance: wallet.balance.cents(),
            pending_withdrawal: wallet.pending_withdrawal.cents(),
            in_escrow: in_escrow.cents(),
            total_deposited: wallet.total_deposited.cents(),
            total_withdrawn: wallet.total_withdrawn.cents(),
            total_earned: wallet.total_earned.cents(),
            total_spent: wallet.total_spent.cents(),
            updated_at: wallet.updated_at,
        }
    }
}

/// One wallet ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionView {
    pub id: Uuid,
    /// Entry kind, e.g. `DEPOSIT` or `ORDER_PAYMENT`.
    pub kind: String,
    /// Signed change to the balance, in cents.
    pub amount: i64,
    pub balance_after: i64,
    /// Order, funding request or payout the entry belongs to.
    pub reference_id: Option<Uuid>,
    pub memo: String,
    pub created_at: DateTime<Utc>,
}

impl From<LedgerEntry> for TransactionView {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id,
            kind: entry.kind.as_str().to_string(),
            amount: entry.amount.cents(),
            balance_after: entry.balance_after.cents(),
            reference_id: entry.reference_id,
            memo: entry.memo,
            created_at: entry.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct DepositRequest {
    /// Amount in cents.
    #[schema(value_type = i64)]
    pub amount: Money,
    /// Payment method, e.g. `bank_transfer`.
    pub method: String,
    /// Reference of the incoming payment for the reviewer.
    pub external_reference: String,
}

impl Validate for DepositRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        check_funding(self.amount, &self.method, &self.external_reference)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct WithdrawalRequest {
    /// Amount in cents.
    #[schema(value_type = i64)]
    pub amount: Money,
    pub method: String,
    /// Where to send the money (account number, PayPal address, ...).
    pub payout_details: String,
}

impl Validate for WithdrawalRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        check_funding(self.amount, &self.method, &self.payout_details)
    }
}

fn check_funding(amount: Money, method: &str, details: &str) -> Result<(), ValidationError> {
    if !amount.is_positive() {
        return Err(ValidationError::InvalidAmount(amount.to_string()));
    }
    linkex_core::validate_text("method", method, 1, 64)?;
    linkex_core::validate_text("details", details, 1, 500)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Router & helpers
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/wallet", get(get_wallet))
        .route("/v1/wallet/transactions", get(list_transactions))
        .route("/v1/wallet/deposits", post(request_deposit))
        .route("/v1/wallet/withdrawals", post(request_withdrawal))
        .route("/v1/wallet/requests", get(list_requests))
}

/// Escrow currently held for `user_id`'s open purchases.
pub(crate) fn escrow_held_for(state: &AppState, user_id: Uuid) -> Money {
    state
        .orders
        .filter(|o| o.buyer_id == user_id && o.status.is_open())
        .into_iter()
        .filter_map(|o| state.ledger.escrow_for(o.id))
        .fold(Money::ZERO, |acc, hold| {
            acc.checked_add(hold.amount).unwrap_or(acc)
        })
}

fn new_request(
    user_id: Uuid,
    kind: RequestKind,
    amount: Money,
    method: &str,
    details: &str,
) -> FundingRequestRecord {
    let now = Utc::now();
    FundingRequestRecord {
        id: Uuid::new_v4(),
        user_id,
        kind,
        amount,
        method: method.trim().to_string(),
        details: details.trim().to_string(),
        status: RequestStatus::Pending,
        note: None,
        net_payout: None,
        decided_by: None,
        decided_at: None,
        history: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /v1/wallet — The caller's balances.
#[utoipa::path(
    get,
    path = "/v1/wallet",
    responses(
        (status = 200, description = "Wallet", body = WalletView),
        (status = 401, description = "Not signed in", body = crate::error::ErrorBody),
    ),
    tag = "wallet"
)]
pub(crate) async fn get_wallet(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<WalletView>, AppError> {
    let user = caller.account_id()?;
    let wallet = state
        .ledger
        .wallet(user)
        .ok_or_else(|| AppError::NotFound(format!("no wallet for user {user}")))?;
    Ok(Json(WalletView::new(wallet, escrow_held_for(&state, user))))
}

/// GET /v1/wallet/transactions — Ledger entries, newest first.
#[utoipa::path(
    get,
    path = "/v1/wallet/transactions",
    params(PageParams),
    responses((status = 200, description = "One page of entries", body = TransactionPage)),
    tag = "wallet"
)]
pub(crate) async fn list_transactions(
    State(state): State<AppState>,
    caller: CallerIdentity,
    query: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Page<TransactionView>>, AppError> {
    let user = caller.account_id()?;
    let params = extract_query(query)?;
    let items = state
        .ledger
        .entries_for(user)
        .into_iter()
        .map(TransactionView::from)
        .collect();
    Ok(Json(Page::paginate(items, &params)))
}

/// POST /v1/wallet/deposits — Ask for a deposit to be credited.
#[utoipa::path(
    post,
    path = "/v1/wallet/deposits",
    request_body = DepositRequest,
    responses(
        (status = 201, description = "Deposit request pending review", body = FundingRequestRecord),
        (status = 422, description = "Below the minimum deposit", body = crate::error::ErrorBody),
    ),
    tag = "wallet"
)]
pub(crate) async fn request_deposit(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<DepositRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FundingRequestRecord>), AppError> {
    let user = caller.account_id()?;
    let req = extract_validated_json(body)?;
    let minimum = state.fee_schedule().min_deposit;
    if req.amount < minimum {
        return Err(AppError::Validation(format!(
            "deposit {} is below the minimum of {minimum}",
            req.amount
        )));
    }

    let record = new_request(
        user,
        RequestKind::Deposit,
        req.amount,
        &req.method,
        &req.external_reference,
    );
    state.funding_requests.insert(record.id, record.clone());
    state.persist_funding_request(&record).await?;
    state
        .audit(
            NewAuditEvent::new("funding_request", record.id, "DEPOSIT_REQUESTED", Some(user))
                .with_metadata(serde_json::json!({ "amount_cents": record.amount.cents() })),
        )
        .await;
    tracing::info!(request_id = %record.id, amount = %record.amount, "deposit requested");
    Ok((StatusCode::CREATED, Json(record)))
}

/// POST /v1/wallet/withdrawals — Ask for a payout. The amount is held now.
#[utoipa::path(
    post,
    path = "/v1/wallet/withdrawals",
    request_body = WithdrawalRequest,
    responses(
        (status = 201, description = "Withdrawal pending review, funds held", body = FundingRequestRecord),
        (status = 402, description = "Wallet balance too low", body = crate::error::ErrorBody),
        (status = 422, description = "Below the minimum withdrawal", body = crate::error::ErrorBody),
    ),
    tag = "wallet"
)]
pub(crate) async fn request_withdrawal(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<WithdrawalRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FundingRequestRecord>), AppError> {
    let user = caller.account_id()?;
    let req = extract_validated_json(body)?;
    let record = new_request(
        user,
        RequestKind::Withdrawal,
        req.amount,
        &req.method,
        &req.payout_details,
    );

    let posting =
        state
            .ledger
            .hold_withdrawal(user, record.id, record.amount, &state.fee_schedule())?;
    state.funding_requests.insert(record.id, record.clone());
    warn_unpersisted(state.persist_posting(&posting).await, "withdrawal hold", record.id);
    warn_unpersisted(
        state.persist_funding_request(&record).await,
        "funding request",
        record.id,
    );
    state
        .audit(
            NewAuditEvent::new("funding_request", record.id, "WITHDRAWAL_REQUESTED", Some(user))
                .with_metadata(serde_json::json!({ "amount_cents": record.amount.cents() })),
        )
        .await;
    tracing::info!(request_id = %record.id, amount = %record.amount, "withdrawal requested");
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /v1/wallet/requests — The caller's deposit and withdrawal requests.
#[utoipa::path(
    get,
    path = "/v1/wallet/requests",
    responses((status = 200, description = "Funding requests, newest first", body = Vec<FundingRequestRecord>)),
    tag = "wallet"
)]
pub(crate) async fn list_requests(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<FundingRequestRecord>>, AppError> {
    let user = caller.account_id()?;
    let mut items = state.funding_requests.filter(|r| r.user_id == user);
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(items))
}
