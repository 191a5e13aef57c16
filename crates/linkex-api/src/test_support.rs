//! Fixtures shared by router tests.
//!
//! Users are seeded straight into the stores with a live session, which
//! skips password stretching; `/v1/auth` tests exercise the real path.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use linkex_core::Money;
use linkex_state::SiteStatus;
use tower::ServiceExt;
use uuid::Uuid;

use crate::auth::{generate_session_token, token_hash, Role};
use crate::config::AppConfig;
use crate::state::{
    AppState, LinkType, ListingKind, ListingRecord, SessionRecord, SiteRecord, UserRecord,
};

pub const OPERATOR_TOKEN: &str = "operator-test-token";

pub fn test_state() -> AppState {
    AppState::with_config(AppConfig {
        admin_token: Some(OPERATOR_TOKEN.into()),
        ..AppConfig::default()
    })
    .unwrap()
}

pub fn test_app(state: &AppState) -> Router {
    crate::app(state.clone())
}

/// Insert a user with an open wallet and return it with a bearer token.
pub fn seed_user(state: &AppState, username: &str, role: Role) -> (UserRecord, String) {
    let user = UserRecord::new_for_tests(username, role);
    state.users.insert(user.id, user.clone());
    state.ledger.open_wallet(user.id);
    let token = generate_session_token();
    state.sessions.insert(SessionRecord {
        token_hash: token_hash(&token),
        user_id: user.id,
        created_at: Utc::now(),
        expires_at: Utc::now() + Duration::hours(1),
    });
    (user, token)
}

pub fn fund(state: &AppState, user_id: Uuid, cents: i64) {
    state
        .ledger
        .deposit(user_id, Money::from_cents(cents), None, "test funding")
        .unwrap();
}

pub fn seed_site(state: &AppState, owner_id: Uuid, domain: &str, status: SiteStatus) -> SiteRecord {
    let now = Utc::now();
    let site = SiteRecord {
        id: Uuid::new_v4(),
        owner_id,
        domain: domain.to_string(),
        title: format!("{domain} blog"),
        category: "technology".into(),
        language: "en".into(),
        domain_authority: 40,
        monthly_traffic: 12_000,
        allows_exchange: true,
        status,
        moderation_note: None,
        history: vec![],
        created_at: now,
        updated_at: now,
    };
    state.sites.insert(site.id, site.clone());
    site
}

pub fn seed_listing(state: &AppState, site: &SiteRecord, cents: i64) -> ListingRecord {
    let now = Utc::now();
    let listing = ListingRecord {
        id: Uuid::new_v4(),
        site_id: site.id,
        seller_id: site.owner_id,
        kind: ListingKind::GuestPost,
        title: format!("Guest post on {}", site.domain),
        description: "Original article with one contextual link.".into(),
        price: Money::from_cents(cents),
        turnaround_days: 5,
        link_type: LinkType::Dofollow,
        active: true,
        created_at: now,
        updated_at: now,
    };
    state.listings.insert(listing.id, listing.clone());
    listing
}

/// Send one request through `app` and decode the JSON response body.
///
/// Non-JSON and empty bodies decode to `Value::Null`.
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}
