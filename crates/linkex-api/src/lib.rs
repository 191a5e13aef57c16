//! # linkex-api — Linkex Marketplace HTTP Service
//!
//! Axum service for a guest-post and link-exchange marketplace. Site
//! owners list placements on their sites, buyers order them with funds
//! held in escrow, and site owners trade links with each other.
//!
//! ## API Surface
//!
//! | Prefix | Module | Domain |
//! |--------|--------|--------|
//! | `/v1/auth/*` | [`routes::auth`] | Registration, login, sessions |
//! | `/v1/users/*` | [`routes::users`] | Profiles |
//! | `/v1/sites/*`, `/v1/exchange-sites` | [`routes::sites`] | Site registration |
//! | `/v1/listings/*` | [`routes::listings`] | Marketplace offers |
//! | `/v1/orders/*` | [`routes::orders`] | Guest-post orders with escrow |
//! | `/v1/exchanges/*` | [`routes::exchanges`] | Link exchanges |
//! | `/v1/wallet/*` | [`routes::wallet`] | Balances and funding requests |
//! | `/v1/notifications/*` | [`routes::notifications`] | Inbox |
//! | `/v1/tickets/*` | [`routes::tickets`] | Support |
//! | `/v1/referrals` | [`routes::referrals`] | Referral earnings |
//! | `/v1/admin/*` | [`routes::admin`] | Moderation and back office |
//! | `/openapi.json` | [`openapi`] | Generated OpenAPI spec |
//! | `/health/*`, `/metrics` | here | Probes and Prometheus scrape |
//!
//! ## Middleware
//!
//! Outermost first: `TraceLayer` → metrics → auth → rate limit → body limit
//! → handler. Login and registration sit behind a second, stricter limiter.

pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod settlement;
pub mod state;

#[cfg(test)]
mod test_support;

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::IntoResponse;
use axum::{Extension, Router};
use linkex_state::Lifecycle;

use crate::middleware::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes and `/metrics` are mounted outside the auth and rate-limit
/// layers so they remain reachable without credentials.
pub fn app(state: AppState) -> Router {
    let limiter = RateLimiter::new(state.config.rate_limit.clone());
    let auth_limiter = RateLimiter::new(state.config.auth_rate_limit.clone());

    let credentials = routes::auth::public_router()
        .route_layer(from_fn_with_state(auth_limiter, rate_limit_middleware));

    let mut api = Router::new()
        .merge(credentials)
        .merge(routes::auth::router())
        .merge(routes::users::router())
        .merge(routes::sites::router())
        .merge(routes::listings::router())
        .merge(routes::orders::router())
        .merge(routes::exchanges::router())
        .merge(routes::wallet::router())
        .merge(routes::notifications::router())
        .merge(routes::tickets::router())
        .merge(routes::referrals::router())
        .merge(routes::admin::router())
        .merge(openapi::router())
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(from_fn_with_state(limiter, rate_limit_middleware))
        .layer(from_fn_with_state(state.clone(), auth::auth_middleware));

    if state.config.metrics_enabled {
        api = api
            .layer(from_fn(middleware::metrics::metrics_middleware))
            .layer(Extension(state.metrics.clone()));
    }

    let api = api
        .layer(middleware::tracing_layer::layer())
        .with_state(state.clone());

    let mut unauthenticated = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness));
    if state.config.metrics_enabled {
        unauthenticated =
            unauthenticated.route("/metrics", axum::routing::get(prometheus_metrics));
    }
    let unauthenticated = unauthenticated.with_state(state);

    Router::new().merge(unauthenticated).merge(api)
}

/// GET /metrics — Prometheus scrape endpoint.
///
/// Marketplace gauges are refreshed from the stores on each scrape.
async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = &state.metrics;

    let mut by_role: HashMap<&'static str, usize> = HashMap::new();
    for user in state.users.list() {
        *by_role.entry(user.role.as_str()).or_default() += 1;
    }
    metrics.users_total().reset();
    for (role, count) in &by_role {
        metrics
            .users_total()
            .with_label_values(&[role])
            .set(*count as f64);
    }

    let mut sites: HashMap<&'static str, usize> = HashMap::new();
    for site in state.sites.list() {
        *sites.entry(site.status.as_str()).or_default() += 1;
    }
    metrics.sites_total().reset();
    for (status, count) in &sites {
        metrics
            .sites_total()
            .with_label_values(&[status])
            .set(*count as f64);
    }

    let mut orders: HashMap<&'static str, usize> = HashMap::new();
    for order in state.orders.list() {
        *orders.entry(order.status.as_str()).or_default() += 1;
    }
    metrics.orders_total().reset();
    for (status, count) in &orders {
        metrics
            .orders_total()
            .with_label_values(&[status])
            .set(*count as f64);
    }

    let totals = state.ledger.totals();
    metrics.escrow_cents().set(totals.escrow.cents() as f64);
    metrics
        .fee_revenue_cents()
        .set(totals.fee_revenue.cents() as f64);

    match metrics.gather_and_encode() {
        Ok(body) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode Prometheus metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e).into_response()
        }
    }
}

/// Liveness probe — always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe — 200 "ready", or 503 when the ledger or fee schedule
/// lock is wedged or a configured database does not answer.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if !state.ledger.responsive(Duration::from_millis(250)) {
        return (StatusCode::SERVICE_UNAVAILABLE, "ledger locked").into_response();
    }
    if state.fees.try_read_for(Duration::from_millis(250)).is_none() {
        return (StatusCode::SERVICE_UNAVAILABLE, "fee schedule locked").into_response();
    }

    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!("Database health check failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
        }
    }

    (StatusCode::OK, "ready").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::config::AppConfig;
    use crate::middleware::rate_limit::RateLimitConfig;
    use crate::test_support::{seed_user, send, test_app, test_state};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    async fn get_text(app: &Router, uri: &str) -> (StatusCode, String, Option<String>) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap(), content_type)
    }

    #[tokio::test]
    async fn health_probes() {
        let app = test_app(&test_state());
        let (status, body, _) = get_text(&app, "/health/liveness").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
        let (status, body, _) = get_text(&app, "/health/readiness").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ready");
    }

    #[tokio::test]
    async fn readiness_fails_while_fee_schedule_is_write_locked() {
        let state = test_state();
        let app = test_app(&state);
        let held = state.fees.write();
        let (status, body, _) = get_text(&app, "/health/readiness").await;
        drop(held);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "fee schedule locked");
        let (status, _, _) = get_text(&app, "/health/readiness").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_scrape_includes_requests_and_gauges() {
        let state = test_state();
        let app = test_app(&state);
        seed_user(&state, "metrics", Role::User);
        send(&app, "GET", "/v1/listings", None, None).await;

        let (status, body, content_type) = get_text(&app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.unwrap().starts_with("text/plain"));
        assert!(body.contains("linkex_http_requests_total"));
        assert!(body.contains("linkex_users_total{role=\"USER\"} 1"));
        assert!(body.contains("linkex_escrow_cents 0"));
    }

    #[tokio::test]
    async fn metrics_can_be_disabled() {
        let state = AppState::with_config(AppConfig {
            metrics_enabled: false,
            ..AppConfig::default()
        })
        .unwrap();
        let app = app(state);
        let (status, _, _) = get_text(&app, "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn auth_endpoints_have_their_own_limit() {
        let state = AppState::with_config(AppConfig {
            auth_rate_limit: RateLimitConfig {
                max_requests: 2,
                window_secs: 60,
            },
            ..AppConfig::default()
        })
        .unwrap();
        let app = app(state);
        let login = json!({ "login": "nobody", "password": "irrelevant-password" });
        for _ in 0..2 {
            let (status, _) = send(&app, "POST", "/v1/auth/login", None, Some(login.clone())).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
        let (status, _) = send(&app, "POST", "/v1/auth/login", None, Some(login)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        // Other routes are still served.
        let (status, _) = send(&app, "GET", "/v1/listings", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_bearer_token_is_rejected() {
        let app = test_app(&test_state());
        let (status, body) = send(&app, "GET", "/v1/auth/me", Some("not-a-session"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }
}
