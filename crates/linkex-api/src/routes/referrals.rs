//! # Referrals API
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `GET` | `/v1/referrals` | `referral_summary` |
//!
//! A referrer earns one commission per referred user, on that user's first
//! completed purchase.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use linkex_core::Money;
use linkex_ledger::ReferralPayout;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::routes::load_user;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReferredUser {
    pub id: Uuid,
    pub username: String,
    pub joined: DateTime<Utc>,
    /// Whether the commission for this user has been paid.
    pub commission_paid: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PayoutView {
    pub referred_id: Uuid,
    pub order_id: Uuid,
    /// Commission in cents.
    pub amount: i64,
    pub paid_at: DateTime<Utc>,
}

impl From<ReferralPayout> for PayoutView {
    fn from(p: ReferralPayout) -> Self {
        Self {
            referred_id: p.referred_id,
            order_id: p.order_id,
            amount: p.amount.cents(),
            paid_at: p.paid_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReferralSummary {
    /// Share this code at registration.
    pub code: String,
    /// Commission rate in basis points of the referred user's order price.
    pub commission_bps: u32,
    pub referred: Vec<ReferredUser>,
    pub payouts: Vec<PayoutView>,
    /// Sum of all payouts, in cents.
    pub total_earned: i64,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/referrals", get(referral_summary))
}

/// GET /v1/referrals — The caller's referral code and earnings.
#[utoipa::path(
    get,
    path = "/v1/referrals",
    responses(
        (status = 200, description = "Referral summary", body = ReferralSummary),
        (status = 401, description = "Not signed in", body = crate::error::ErrorBody),
    ),
    tag = "referrals"
)]
pub(crate) async fn referral_summary(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<ReferralSummary>, AppError> {
    let user = load_user(&state, caller.account_id()?)?;

    let mut referred: Vec<ReferredUser> = state
        .users
        .filter(|u| u.referred_by == Some(user.id))
        .into_iter()
        .map(|u| ReferredUser {
            commission_paid: state.ledger.referral_paid_for(u.id),
            id: u.id,
            username: u.username,
            joined: u.created_at,
        })
        .collect();
    referred.sort_by(|a, b| b.joined.cmp(&a.joined));

    let payouts = state.ledger.referral_payouts_for(user.id);
    let total = payouts
        .iter()
        .try_fold(Money::ZERO, |acc, p| acc.checked_add(p.amount))
        .ok_or_else(|| AppError::Internal("referral total overflowed".into()))?;

    Ok(Json(ReferralSummary {
        code: user.referral_code,
        commission_bps: state.fee_schedule().referral_commission_bps,
        referred,
        payouts: payouts.into_iter().map(PayoutView::from).collect(),
        total_earned: total.cents(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::test_support::{fund, seed_listing, seed_site, seed_user, send, test_app, test_state};
    use axum::http::StatusCode;
    use linkex_state::SiteStatus;
    use serde_json::json;

    #[tokio::test]
    async fn commission_shows_up_after_first_completed_order() {
        let state = test_state();
        let app = test_app(&state);
        let (referrer, referrer_token) = seed_user(&state, "ref", Role::User);
        let (seller, seller_token) = seed_user(&state, "seller", Role::User);
        let (mut buyer, buyer_token) = seed_user(&state, "buyer", Role::User);
        buyer.referred_by = Some(referrer.id);
        state.users.insert(buyer.id, buyer.clone());

        let (_, body) = send(&app, "GET", "/v1/referrals", Some(&referrer_token), None).await;
        assert_eq!(body["code"], referrer.referral_code.as_str());
        assert_eq!(body["referred"][0]["commission_paid"], false);
        assert_eq!(body["total_earned"], 0);

        fund(&state, buyer.id, 20_000);
        let site = seed_site(&state, seller.id, "referral-test.com", SiteStatus::Approved);
        let listing = seed_listing(&state, &site, 10_000);
        let (status, order) = send(
            &app,
            "POST",
            "/v1/orders",
            Some(&buyer_token),
            Some(json!({
                "listing_id": listing.id,
                "target_url": "https://buyer.example/page",
                "anchor_text": "best widgets",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = order["id"].as_str().unwrap().to_string();
        for (path, token, body) in [
            ("accept", &seller_token, None),
            (
                "deliver",
                &seller_token,
                Some(json!({ "live_url": "https://referral-test.com/post" })),
            ),
            ("complete", &buyer_token, None),
        ] {
            let (status, _) =
                send(&app, "POST", &format!("/v1/orders/{id}/{path}"), Some(token), body).await;
            assert_eq!(status, StatusCode::OK, "{path}");
        }

        let (_, body) = send(&app, "GET", "/v1/referrals", Some(&referrer_token), None).await;
        // 5% of 100.00
        assert_eq!(body["total_earned"], 500);
        assert_eq!(body["payouts"][0]["order_id"], id.as_str());
        assert_eq!(body["referred"][0]["commission_paid"], true);
    }

    #[tokio::test]
    async fn requires_account() {
        let state = test_state();
        let app = test_app(&state);
        let (status, _) = send(&app, "GET", "/v1/referrals", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
