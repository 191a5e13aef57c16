//! # Marketplace End-to-End
//!
//! Drives the public HTTP surface through the flows a real deployment sees:
//! registration with a referral code, site moderation, funding approval,
//! a guest-post order from escrow to payout, a link exchange, withdrawals
//! and the admin ledger checks that tie it all together.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use linkex_api::config::AppConfig;
use linkex_api::state::AppState;

const OPERATOR: &str = "integration-operator-token";

fn test_app() -> axum::Router {
    let config = AppConfig {
        admin_token: Some(OPERATOR.to_string()),
        ..AppConfig::default()
    };
    linkex_api::app(AppState::with_config(config).unwrap())
}

async fn call(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Register an account and return `(user_id, token, referral_code)`.
async fn register(app: &axum::Router, username: &str, referral: Option<&str>) -> (String, String, String) {
    let mut body = json!({
        "username": username,
        "email": format!("{username}@example.com"),
        "password": "correct horse battery",
    });
    if let Some(code) = referral {
        body["referral_code"] = json!(code);
    }
    let (status, body) = call(app, "POST", "/v1/auth/register", None, Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    (
        body["user"]["id"].as_str().unwrap().to_string(),
        body["token"].as_str().unwrap().to_string(),
        body["user"]["referral_code"].as_str().unwrap().to_string(),
    )
}

/// Register a site and have the operator approve it.
async fn approved_site(app: &axum::Router, token: &str, domain: &str, exchange: bool) -> String {
    let (status, site) = call(
        app,
        "POST",
        "/v1/sites",
        Some(token),
        Some(json!({
            "domain": domain,
            "title": format!("{domain} blog"),
            "category": "technology",
            "language": "en",
            "domain_authority": 42,
            "monthly_traffic": 15000,
            "allows_exchange": exchange,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{site}");
    assert_eq!(site["status"], "PENDING");
    let id = site["id"].as_str().unwrap().to_string();

    let (status, site) = call(
        app,
        "POST",
        &format!("/v1/admin/sites/{id}/approve"),
        Some(OPERATOR),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{site}");
    assert_eq!(site["status"], "APPROVED");
    id
}

/// Request a deposit and have the operator approve it.
async fn deposit(app: &axum::Router, token: &str, cents: i64) {
    let (status, request) = call(
        app,
        "POST",
        "/v1/wallet/deposits",
        Some(token),
        Some(json!({
            "amount": cents,
            "method": "bank_transfer",
            "external_reference": "TX-001",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{request}");
    let id = request["id"].as_str().unwrap();
    let (status, body) = call(
        app,
        "POST",
        &format!("/v1/admin/funding-requests/{id}/approve"),
        Some(OPERATOR),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "APPROVED");
}

async fn balance(app: &axum::Router, token: &str) -> i64 {
    let (status, wallet) = call(app, "GET", "/v1/wallet", Some(token), None).await;
    assert_eq!(status, StatusCode::OK);
    wallet["balance"].as_i64().unwrap()
}

#[tokio::test]
async fn guest_post_order_settles_with_commission_and_referral() {
    let app = test_app();
    let (_, referrer, code) = register(&app, "referrer", None).await;
    let (_, seller, _) = register(&app, "seller", None).await;
    let (_, buyer, _) = register(&app, "buyer", Some(&code)).await;

    let site_id = approved_site(&app, &seller, "techblog.example.com", false).await;
    let (status, listing) = call(
        &app,
        "POST",
        "/v1/listings",
        Some(&seller),
        Some(json!({
            "site_id": site_id,
            "kind": "GUEST_POST",
            "title": "Sponsored article on techblog",
            "description": "1000 words, one dofollow link",
            "price": 25_000,
            "turnaround_days": 5,
            "link_type": "DOFOLLOW",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{listing}");
    let listing_id = listing["id"].as_str().unwrap().to_string();

    // Anonymous browse sees the approved site's listing.
    let (status, page) = call(&app, "GET", "/v1/listings", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);

    deposit(&app, &buyer, 30_000).await;
    assert_eq!(balance(&app, &buyer).await, 30_000);

    let (status, order) = call(
        &app,
        "POST",
        "/v1/orders",
        Some(&buyer),
        Some(json!({
            "listing_id": listing_id,
            "target_url": "https://buyer.example/landing",
            "anchor_text": "best widgets",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(order["status"], "PENDING");
    let order_id = order["id"].as_str().unwrap().to_string();

    // Price moved from balance into escrow.
    let (_, wallet) = call(&app, "GET", "/v1/wallet", Some(&buyer), None).await;
    assert_eq!(wallet["balance"], 5_000);
    assert_eq!(wallet["in_escrow"], 25_000);

    for (action, token, body) in [
        ("accept", &seller, None),
        (
            "deliver",
            &seller,
            Some(json!({ "live_url": "https://techblog.example.com/widgets" })),
        ),
        ("revision", &buyer, Some(json!({ "note": "please move the link up" }))),
        (
            "deliver",
            &seller,
            Some(json!({ "live_url": "https://techblog.example.com/widgets-v2" })),
        ),
        ("complete", &buyer, None),
    ] {
        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/orders/{order_id}/{action}"),
            Some(token),
            body,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{action}: {body}");
    }

    let (_, order) = call(&app, "GET", &format!("/v1/orders/{order_id}"), Some(&buyer), None).await;
    assert_eq!(order["status"], "COMPLETED");

    // 10% commission withheld from the seller; 5% referral paid by the platform.
    assert_eq!(balance(&app, &seller).await, 22_500);
    assert_eq!(balance(&app, &referrer).await, 1_250);
    let (_, referrals) = call(&app, "GET", "/v1/referrals", Some(&referrer), None).await;
    assert_eq!(referrals["total_earned"], 1_250);
    assert_eq!(referrals["referred"][0]["commission_paid"], true);

    let (status, recon) =
        call(&app, "GET", "/v1/admin/ledger/reconcile", Some(OPERATOR), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recon["balanced"], true, "{recon}");

    // Parties were notified along the way.
    let (_, unread) = call(&app, "GET", "/v1/notifications/unread-count", Some(&seller), None).await;
    assert!(unread["unread"].as_u64().unwrap() >= 1, "{unread}");

    let (status, chain) = call(&app, "GET", "/v1/admin/audit/verify", Some(OPERATOR), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chain["chain_valid"], true);
}

#[tokio::test]
async fn order_needs_funds_and_non_parties_cannot_see_it() {
    let app = test_app();
    let (_, seller, _) = register(&app, "seller2", None).await;
    let (_, buyer, _) = register(&app, "buyer2", None).await;
    let (_, stranger, _) = register(&app, "stranger", None).await;
    let site_id = approved_site(&app, &seller, "news.example.org", false).await;
    let (_, listing) = call(
        &app,
        "POST",
        "/v1/listings",
        Some(&seller),
        Some(json!({
            "site_id": site_id,
            "kind": "LINK_INSERTION",
            "title": "Link in existing article",
            "description": "Insert into an evergreen post",
            "price": 8_000,
            "turnaround_days": 2,
            "link_type": "NOFOLLOW",
        })),
    )
    .await;
    let order_body = json!({
        "listing_id": listing["id"],
        "target_url": "https://buyer2.example/",
        "anchor_text": "buyer two",
    });

    let (status, body) = call(&app, "POST", "/v1/orders", Some(&buyer), Some(order_body.clone())).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED, "{body}");
    assert_eq!(body["error"]["code"], "INSUFFICIENT_FUNDS");

    deposit(&app, &buyer, 10_000).await;
    let (status, order) = call(&app, "POST", "/v1/orders", Some(&buyer), Some(order_body)).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = order["id"].as_str().unwrap();

    let (status, _) = call(&app, "GET", &format!("/v1/orders/{id}"), Some(&stranger), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Buyer cancels before acceptance; the full price comes back.
    let (status, _) = call(&app, "POST", &format!("/v1/orders/{id}/cancel"), Some(&buyer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(balance(&app, &buyer).await, 10_000);
}

#[tokio::test]
async fn link_exchange_completes_after_both_placements() {
    let app = test_app();
    let (_, alice, _) = register(&app, "alice", None).await;
    let (_, bob, _) = register(&app, "bob", None).await;
    let alice_site = approved_site(&app, &alice, "alice.example.com", true).await;
    let bob_site = approved_site(&app, &bob, "bob.example.net", true).await;

    let (status, partners) = call(&app, "GET", "/v1/exchange-sites", Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(partners.to_string().contains("bob.example.net"));

    let (status, exchange) = call(
        &app,
        "POST",
        "/v1/exchanges",
        Some(&alice),
        Some(json!({
            "requester_site_id": alice_site,
            "target_site_id": bob_site,
            "message": "swap links?",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{exchange}");
    let id = exchange["id"].as_str().unwrap().to_string();

    // Only the target owner may accept.
    let (status, _) = call(&app, "POST", &format!("/v1/exchanges/{id}/accept"), Some(&alice), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, exchange) = call(&app, "POST", &format!("/v1/exchanges/{id}/accept"), Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(exchange["status"], "ACTIVE");

    let (_, exchange) = call(
        &app,
        "POST",
        &format!("/v1/exchanges/{id}/deliver"),
        Some(&alice),
        Some(json!({ "placement_url": "https://alice.example.com/partners" })),
    )
    .await;
    assert_eq!(exchange["status"], "ACTIVE");
    let (_, exchange) = call(
        &app,
        "POST",
        &format!("/v1/exchanges/{id}/deliver"),
        Some(&bob),
        Some(json!({ "placement_url": "https://bob.example.net/friends" })),
    )
    .await;
    assert_eq!(exchange["status"], "COMPLETED");
}

#[tokio::test]
async fn withdrawal_holds_then_settles_and_banned_users_are_locked_out() {
    let app = test_app();
    let (user_id, user, _) = register(&app, "earner", None).await;
    deposit(&app, &user, 5_000).await;

    let (status, request) = call(
        &app,
        "POST",
        "/v1/wallet/withdrawals",
        Some(&user),
        Some(json!({
            "amount": 3_000,
            "method": "paypal",
            "payout_details": "earner@example.com",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{request}");
    let (_, wallet) = call(&app, "GET", "/v1/wallet", Some(&user), None).await;
    assert_eq!(wallet["balance"], 2_000);
    assert_eq!(wallet["pending_withdrawal"], 3_000);

    let id = request["id"].as_str().unwrap();
    let (status, _) = call(
        &app,
        "POST",
        &format!("/v1/admin/funding-requests/{id}/approve"),
        Some(OPERATOR),
        Some(json!({ "note": "paid" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, wallet) = call(&app, "GET", "/v1/wallet", Some(&user), None).await;
    assert_eq!(wallet["pending_withdrawal"], 0);
    assert_eq!(wallet["total_withdrawn"], 3_000);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/v1/admin/users/{user_id}/ban"),
        Some(OPERATOR),
        Some(json!({ "reason": "chargeback fraud" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "GET", "/v1/wallet", Some(&user), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = call(
        &app,
        "POST",
        "/v1/auth/login",
        None,
        Some(json!({ "login": "earner", "password": "correct horse battery" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_endpoints_reject_plain_users() {
    let app = test_app();
    let (_, user, _) = register(&app, "curious", None).await;
    for uri in ["/v1/admin/stats", "/v1/admin/fees", "/v1/admin/audit"] {
        let (status, _) = call(&app, "GET", uri, Some(&user), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        let (status, _) = call(&app, "GET", uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
    }
}
