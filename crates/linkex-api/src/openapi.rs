//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI spec,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Adds the session bearer token security scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some(
                            "Session token from /v1/auth/login or /v1/auth/register.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

/// Assembled OpenAPI spec for the entire API surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Linkex Marketplace API",
        version = "0.1.0",
        description = "Guest-post and link-exchange marketplace.\n\nProvides:\n- **Accounts** with session tokens, profiles and referral codes\n- **Sites and listings** with staff moderation\n- **Guest-post orders** paid into escrow and released on completion\n- **Link exchanges** between site owners\n- **Wallets** with admin-approved deposits and withdrawals\n- **Support tickets**, notifications and admin tooling\n\nAuthentication: `Authorization: Bearer <session token>`. Browse endpoints, health probes and `/metrics` are public. All amounts are integer cents.",
        license(name = "AGPL-3.0-or-later"),
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    paths(
        // ── Auth ────────────────────────────────────────────────────────
        crate::routes::auth::register,
        crate::routes::auth::login,
        crate::routes::auth::logout,
        crate::routes::auth::me,
        crate::routes::auth::change_password,
        // ── Users ───────────────────────────────────────────────────────
        crate::routes::users::get_profile,
        crate::routes::users::update_me,
        // ── Sites ───────────────────────────────────────────────────────
        crate::routes::sites::create_site,
        crate::routes::sites::my_sites,
        crate::routes::sites::get_site,
        crate::routes::sites::update_site,
        crate::routes::sites::delete_site,
        crate::routes::sites::exchange_sites,
        // ── Listings ────────────────────────────────────────────────────
        crate::routes::listings::create_listing,
        crate::routes::listings::browse_listings,
        crate::routes::listings::get_listing,
        crate::routes::listings::update_listing,
        crate::routes::listings::deactivate_listing,
        // ── Orders ──────────────────────────────────────────────────────
        crate::routes::orders::create_order,
        crate::routes::orders::list_orders,
        crate::routes::orders::get_order,
        crate::routes::orders::accept_order,
        crate::routes::orders::reject_order,
        crate::routes::orders::deliver_order,
        crate::routes::orders::request_revision,
        crate::routes::orders::complete_order,
        crate::routes::orders::cancel_order,
        crate::routes::orders::dispute_order,
        // ── Exchanges ───────────────────────────────────────────────────
        crate::routes::exchanges::create_exchange,
        crate::routes::exchanges::list_exchanges,
        crate::routes::exchanges::get_exchange,
        crate::routes::exchanges::accept_exchange,
        crate::routes::exchanges::reject_exchange,
        crate::routes::exchanges::cancel_exchange,
        crate::routes::exchanges::deliver_exchange,
        // ── Wallet ──────────────────────────────────────────────────────
        crate::routes::wallet::get_wallet,
        crate::routes::wallet::list_transactions,
        crate::routes::wallet::request_deposit,
        crate::routes::wallet::request_withdrawal,
        crate::routes::wallet::list_requests,
        // ── Notifications ───────────────────────────────────────────────
        crate::routes::notifications::list_notifications,
        crate::routes::notifications::unread_count,
        crate::routes::notifications::mark_read,
        crate::routes::notifications::mark_all_read,
        // ── Tickets ─────────────────────────────────────────────────────
        crate::routes::tickets::create_ticket,
        crate::routes::tickets::list_tickets,
        crate::routes::tickets::get_ticket,
        crate::routes::tickets::reply_ticket,
        crate::routes::tickets::close_ticket,
        crate::routes::tickets::reopen_ticket,
        // ── Referrals ───────────────────────────────────────────────────
        crate::routes::referrals::referral_summary,
        // ── Admin ───────────────────────────────────────────────────────
        crate::routes::admin::stats,
        crate::routes::admin::list_users,
        crate::routes::admin::ban_user,
        crate::routes::admin::unban_user,
        crate::routes::admin::set_role,
        crate::routes::admin::list_sites,
        crate::routes::admin::approve_site,
        crate::routes::admin::reject_site,
        crate::routes::admin::suspend_site,
        crate::routes::admin::list_funding_requests,
        crate::routes::admin::approve_funding_request,
        crate::routes::admin::reject_funding_request,
        crate::routes::admin::resolve_dispute,
        crate::routes::admin::run_auto_complete,
        crate::routes::admin::adjust_wallet,
        crate::routes::admin::get_fees,
        crate::routes::admin::update_fees,
        crate::routes::admin::list_fee_records,
        crate::routes::admin::reconcile_ledger,
        crate::routes::admin::list_audit_events,
        crate::routes::admin::verify_audit_chain,
        crate::routes::admin::list_all_tickets,
    ),
    components(
        schemas(
            // ── Records ─────────────────────────────────────────────────
            crate::auth::Role,
            crate::state::UserRecord,
            crate::state::SiteRecord,
            crate::state::ListingKind,
            crate::state::LinkType,
            crate::state::ListingRecord,
            crate::state::OrderRecord,
            crate::state::ExchangeRecord,
            crate::state::FundingRequestRecord,
            crate::state::NotificationRecord,
            crate::state::TicketMessage,
            crate::state::TicketRecord,
            crate::audit::AuditEvent,
            crate::audit::ChainIntegrity,
            crate::settlement::SweepReport,
            crate::extractors::ListingPage,
            crate::extractors::OrderPage,
            crate::extractors::TransactionPage,
            // ── Errors ──────────────────────────────────────────────────
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            // ── Auth / users ────────────────────────────────────────────
            crate::routes::auth::RegisterRequest,
            crate::routes::auth::LoginRequest,
            crate::routes::auth::ChangePasswordRequest,
            crate::routes::auth::SessionResponse,
            crate::routes::users::PublicProfile,
            crate::routes::users::UpdateProfileRequest,
            // ── Catalog ─────────────────────────────────────────────────
            crate::routes::sites::CreateSiteRequest,
            crate::routes::sites::UpdateSiteRequest,
            crate::routes::listings::CreateListingRequest,
            crate::routes::listings::UpdateListingRequest,
            // ── Orders / exchanges ──────────────────────────────────────
            crate::routes::orders::CreateOrderRequest,
            crate::routes::orders::DeliverRequest,
            crate::routes::orders::RevisionRequest,
            crate::routes::orders::DisputeRequest,
            crate::routes::exchanges::CreateExchangeRequest,
            crate::routes::exchanges::ExchangeDeliveryRequest,
            // ── Wallet / referrals ──────────────────────────────────────
            crate::routes::wallet::WalletView,
            crate::routes::wallet::TransactionView,
            crate::routes::wallet::DepositRequest,
            crate::routes::wallet::WithdrawalRequest,
            crate::routes::referrals::ReferralSummary,
            crate::routes::referrals::ReferredUser,
            crate::routes::referrals::PayoutView,
            // ── Inbox / support ─────────────────────────────────────────
            crate::routes::notifications::UnreadCount,
            crate::routes::notifications::MarkedRead,
            crate::routes::tickets::CreateTicketRequest,
            crate::routes::tickets::TicketReplyRequest,
            // ── Admin ───────────────────────────────────────────────────
            crate::routes::admin::AdminStats,
            crate::routes::admin::ReasonRequest,
            crate::routes::admin::SetRoleRequest,
            crate::routes::admin::DecisionRequest,
            crate::routes::admin::DisputeOutcome,
            crate::routes::admin::ResolveDisputeRequest,
            crate::routes::admin::AdjustWalletRequest,
            crate::routes::admin::FeeScheduleBody,
            crate::routes::admin::FeeRecordView,
        ),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Registration, login, sessions and password changes"),
        (name = "users", description = "Public profiles and profile edits"),
        (name = "sites", description = "Site registration, owner management and exchange-partner browse"),
        (name = "listings", description = "Seller offers and the public marketplace"),
        (name = "orders", description = "Guest-post orders with escrow"),
        (name = "exchanges", description = "Reciprocal link exchanges between site owners"),
        (name = "wallet", description = "Balances, transactions, deposit and withdrawal requests"),
        (name = "notifications", description = "Per-user inbox"),
        (name = "tickets", description = "Support tickets"),
        (name = "referrals", description = "Referral code and commissions"),
        (name = "admin", description = "Moderation, funding approvals, disputes, fees, ledger and audit"),
    )
)]
pub struct ApiDoc;

/// Serves the OpenAPI JSON spec at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json — Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_generates() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "Linkex Marketplace API");
        assert!(!spec.paths.paths.is_empty());
    }

    #[test]
    fn spec_covers_every_area() {
        let spec = ApiDoc::openapi();
        for path in [
            "/v1/auth/register",
            "/v1/listings",
            "/v1/orders/{id}/complete",
            "/v1/exchanges/{id}/deliver",
            "/v1/wallet/withdrawals",
            "/v1/notifications/read-all",
            "/v1/tickets/{id}/reply",
            "/v1/referrals",
            "/v1/admin/funding-requests/{id}/approve",
            "/v1/admin/ledger/reconcile",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn spec_has_bearer_scheme_and_page_aliases() {
        let spec = ApiDoc::openapi();
        let components = spec.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
        for name in ["ListingPage", "OrderPage", "TransactionPage", "ErrorBody"] {
            assert!(components.schemas.contains_key(name), "missing schema {name}");
        }
    }

    #[tokio::test]
    async fn served_as_json() {
        use crate::test_support::{send, test_app, test_state};
        let state = test_state();
        let app = test_app(&state);
        let (status, body) = send(&app, "GET", "/openapi.json", None, None).await;
        assert_eq!(status, axum::http::StatusCode::OK);
        assert_eq!(body["info"]["title"], "Linkex Marketplace API");
    }
}
