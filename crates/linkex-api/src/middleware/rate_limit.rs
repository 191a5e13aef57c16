//! # Per-Client Rate Limiting
//!
//! Fixed-window request counter keyed by client address. The address is
//! the first hop of `X-Forwarded-For`; requests without one share the
//! `"anonymous"` bucket.
//!
//! Two limiters are installed: a global one on every `/v1` route and a
//! stricter one in front of login and registration. Each is passed to
//! [`rate_limit_middleware`] as router state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;

use crate::error::AppError;

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u64,
    /// Window duration in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 600,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone)]
struct BucketState {
    count: u64,
    window_start: Instant,
}

/// Shared rate limiter state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given config.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count a request against `key`. Returns the seconds until the window
    /// resets when the key is over its limit.
    fn check(&self, key: &str, now: Instant) -> Result<(), u64> {
        let window = Duration::from_secs(self.config.window_secs);
        let mut buckets = self.buckets.lock();

        // Drop idle buckets so the map does not grow with every address seen.
        if buckets.len() > 10_000 {
            buckets.retain(|_, b| now.duration_since(b.window_start) < window);
        }

        let bucket = buckets.entry(key.to_string()).or_insert(BucketState {
            count: 0,
            window_start: now,
        });

        if now.duration_since(bucket.window_start) >= window {
            bucket.count = 0;
            bucket.window_start = now;
        }

        if bucket.count >= self.config.max_requests {
            let elapsed = now.duration_since(bucket.window_start);
            let remaining = window.saturating_sub(elapsed).as_secs().max(1);
            Err(remaining)
        } else {
            bucket.count += 1;
            Ok(())
        }
    }
}

fn client_key(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

/// Middleware that enforces per-client rate limits.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request);
    if let Err(retry_after_secs) = limiter.check(&key, Instant::now()) {
        tracing::warn!(client = %key, retry_after_secs, "rate limit exceeded");
        return AppError::RateLimited { retry_after_secs }.into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window_secs: 60,
        })
    }

    #[test]
    fn allows_up_to_limit_then_refuses() {
        let l = limiter(3);
        let now = Instant::now();
        assert!(l.check("a", now).is_ok());
        assert!(l.check("a", now).is_ok());
        assert!(l.check("a", now).is_ok());
        let retry = l.check("a", now).unwrap_err();
        assert!((1..=60).contains(&retry));
    }

    #[test]
    fn keys_are_independent() {
        let l = limiter(1);
        let now = Instant::now();
        assert!(l.check("a", now).is_ok());
        assert!(l.check("b", now).is_ok());
        assert!(l.check("a", now).is_err());
    }

    #[test]
    fn window_resets() {
        let l = limiter(1);
        let start = Instant::now();
        assert!(l.check("a", start).is_ok());
        assert!(l.check("a", start).is_err());
        assert!(l.check("a", start + Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn key_uses_first_forwarded_hop() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(client_key(&request), "203.0.113.9");

        let bare = Request::builder().body(axum::body::Body::empty()).unwrap();
        assert_eq!(client_key(&bare), "anonymous");
    }
}
