//! # API Route Modules
//!
//! Route modules for the Linkex marketplace API:
//!
//! - `auth` — Registration, login, sessions and password changes.
//! - `users` — Public profiles and profile edits.
//! - `sites` — Site registration and owner management, plus the public
//!   exchange-partner browse.
//! - `listings` — Seller offers and the public marketplace browse.
//! - `orders` — Guest-post orders with escrow through the order lifecycle.
//! - `exchanges` — Reciprocal link exchanges between site owners.
//! - `wallet` — Balances, transaction history, deposit and withdrawal requests.
//! - `notifications` — Per-user inbox.
//! - `tickets` — Support tickets.
//! - `referrals` — Referral code and commission history.
//! - `admin` — Moderation, funding approvals, disputes, fees, ledger
//!   reconciliation and audit.

pub mod admin;
pub mod auth;
pub mod exchanges;
pub mod listings;
pub mod notifications;
pub mod orders;
pub mod referrals;
pub mod sites;
pub mod tickets;
pub mod users;
pub mod wallet;

use uuid::Uuid;

use crate::error::AppError;
use crate::state::{AppState, OrderRecord, SiteRecord, UserRecord};

pub(crate) fn load_user(state: &AppState, id: Uuid) -> Result<UserRecord, AppError> {
    state
        .users
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("user {id} not found")))
}

pub(crate) fn load_site(state: &AppState, id: Uuid) -> Result<SiteRecord, AppError> {
    state
        .sites
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("site {id} not found")))
}

pub(crate) fn load_order(state: &AppState, id: Uuid) -> Result<OrderRecord, AppError> {
    state
        .orders
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))
}

/// Parse an upper-case status filter from a query string.
pub(crate) fn parse_filter<T>(
    field: &str,
    value: Option<&str>,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, AppError> {
    match value {
        None => Ok(None),
        Some(raw) => parse(&raw.to_ascii_uppercase())
            .map(Some)
            .ok_or_else(|| AppError::BadRequest(format!("unknown {field} '{raw}'"))),
    }
}
