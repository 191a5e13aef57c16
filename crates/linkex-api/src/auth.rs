//! # Authentication & Authorization
//!
//! Bearer-token sessions with role-based access control.
//!
//! ## Credentials
//!
//! ```text
//! Authorization: Bearer {session token}     issued by register/login
//! Authorization: Bearer {operator token}    LINKEX_ADMIN_TOKEN, synthetic admin
//! ```
//!
//! Session tokens are 32 random bytes, hex-encoded. Only the SHA-256 of a
//! token is kept, so a leaked session table cannot be replayed.
//!
//! ## CallerIdentity
//!
//! [`auth_middleware`] resolves the header into a [`CallerIdentity`] and
//! puts it into the request extensions. Requests without an
//! `Authorization` header pass through anonymously; handlers that need a
//! caller take `CallerIdentity` as an extractor, which rejects with 401.

use axum::extract::{Request, State};
use axum::http::header;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ── Role ────────────────────────────────────────────────────────────────────

/// Marketplace roles, ordered by privilege level.
///
/// `User < Employee < Admin`, so `>=` answers "at least this role".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Buys and sells placements.
    User,
    /// Moderates sites and answers support tickets.
    Employee,
    /// Full access, including money, users and fees.
    Admin,
}

impl Role {
    /// Canonical name, as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Employee => "EMPLOYEE",
            Self::Admin => "ADMIN",
        }
    }

    /// Parse a canonical name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "USER" => Some(Self::User),
            "EMPLOYEE" => Some(Self::Employee),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

// ── CallerIdentity ──────────────────────────────────────────────────────────

/// Identity of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// The caller's user id. Nil for the operator token.
    pub user_id: Uuid,
    /// The caller's role.
    pub role: Role,
    /// Hash of the session token used, so logout can revoke exactly it.
    pub session_hash: Option<String>,
    /// Authenticated with the static operator token rather than a session.
    pub operator: bool,
}

impl CallerIdentity {
    /// Check if the caller has at least the given minimum role.
    pub fn has_role(&self, minimum: Role) -> bool {
        self.role >= minimum
    }

    /// Whether the caller is staff (employee or admin).
    pub fn is_staff(&self) -> bool {
        self.has_role(Role::Employee)
    }

    /// The caller's user account, or 400 for the operator token, which has
    /// no account, wallet or profile.
    pub fn account_id(&self) -> Result<Uuid, AppError> {
        if self.operator {
            Err(AppError::BadRequest(
                "operator token has no user account; log in as a user".into(),
            ))
        } else {
            Ok(self.user_id)
        }
    }

    /// Actor recorded in transition histories and audit events.
    pub fn actor(&self) -> Option<Uuid> {
        (!self.operator).then_some(self.user_id)
    }
}

#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("authentication required".into()))
    }
}

/// Check that the caller has at least the required role.
/// Returns 403 Forbidden if the caller's role is insufficient.
pub fn require_role(caller: &CallerIdentity, minimum: Role) -> Result<(), AppError> {
    if caller.has_role(minimum) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "role '{}' required, caller has '{}'",
            minimum.as_str(),
            caller.role.as_str()
        )))
    }
}

// ── Passwords & Tokens ──────────────────────────────────────────────────────

/// Rounds of SHA-256 applied to each password.
pub const PASSWORD_ITERATIONS: u32 = 100_000;

const PASSWORD_SCHEME: &str = "sha256-iter";

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex(&bytes)
}

fn stretch(password: &str, salt: &str, iterations: u32) -> String {
    let mut digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(password.as_bytes())
        .finalize();
    for _ in 1..iterations {
        digest = Sha256::new()
            .chain_update(digest)
            .chain_update(salt.as_bytes())
            .finalize();
    }
    hex(&digest)
}

/// Hash a password as `sha256-iter$<iterations>$<salt hex>$<hash hex>`.
///
/// CPU-bound; call from `spawn_blocking` in request handlers.
pub fn hash_password(password: &str) -> String {
    let salt = random_hex(16);
    let hash = stretch(password, &salt, PASSWORD_ITERATIONS);
    format!("{PASSWORD_SCHEME}${PASSWORD_ITERATIONS}${salt}${hash}")
}

/// Check `password` against a stored hash. Malformed hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    if scheme != PASSWORD_SCHEME || iterations == 0 {
        return false;
    }
    constant_time_token_eq(&stretch(password, salt, iterations), expected)
}

/// Generate a fresh session token (32 random bytes, hex).
pub fn generate_session_token() -> String {
    random_hex(32)
}

/// SHA-256 of a session token, the form in which sessions are stored.
pub fn token_hash(token: &str) -> String {
    hex(&Sha256::digest(token.as_bytes()))
}

/// Constant-time comparison of secrets.
///
/// When lengths differ, performs a dummy comparison so the mismatch is not
/// observable through timing.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Resolve the bearer token into a [`CallerIdentity`].
///
/// - no `Authorization` header: anonymous, passes through
/// - operator token: synthetic admin
/// - unknown or expired session: 401
/// - banned account: 403
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header_value = match request.headers().get(header::AUTHORIZATION) {
        None => return next.run(request).await,
        Some(v) => v.to_str().unwrap_or_default().to_string(),
    };

    let Some(provided) = header_value.strip_prefix("Bearer ") else {
        tracing::warn!("authentication failed: non-Bearer authorization scheme");
        return AppError::Unauthorized("authorization header must use Bearer scheme".into())
            .into_response();
    };
    let provided = provided.trim();

    match resolve_identity(&state, provided) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

fn resolve_identity(state: &AppState, provided: &str) -> Result<CallerIdentity, AppError> {
    if let Some(expected) = &state.config.admin_token {
        if constant_time_token_eq(provided, expected) {
            return Ok(CallerIdentity {
                user_id: Uuid::nil(),
                role: Role::Admin,
                session_hash: None,
                operator: true,
            });
        }
    }

    let hash = token_hash(provided);
    let session = state.sessions.get(&hash).ok_or_else(|| {
        tracing::warn!("authentication failed: unknown session token");
        AppError::Unauthorized("invalid or expired session".into())
    })?;

    if session.expires_at <= Utc::now() {
        state.sessions.remove(&hash);
        tracing::info!(user_id = %session.user_id, "rejected expired session");
        return Err(AppError::Unauthorized("invalid or expired session".into()));
    }

    let user = state
        .users
        .get(&session.user_id)
        .ok_or_else(|| AppError::Unauthorized("invalid or expired session".into()))?;

    if user.banned {
        tracing::warn!(user_id = %user.id, "rejected session of banned user");
        return Err(AppError::Forbidden("account is banned".into()));
    }

    Ok(CallerIdentity {
        user_id: user.id,
        role: user.role,
        session_hash: Some(hash),
        operator: false,
    })
}
