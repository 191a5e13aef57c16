//! # Accounts & Sessions API
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/v1/auth/register` | `register` |
//! | `POST` | `/v1/auth/login` | `login` |
//! | `POST` | `/v1/auth/logout` | `logout` |
//! | `GET` | `/v1/auth/me` | `me` |
//! | `POST` | `/v1/auth/password` | `change_password` |
//!
//! Register and login are mounted separately by [`crate::app`] so they get
//! the stricter auth rate limit.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use linkex_core::{Email, ReferralCode, Username, ValidationError};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::NewAuditEvent;
use crate::auth::{
    generate_session_token, hash_password, token_hash, verify_password, CallerIdentity, Role,
};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::state::{AppState, SessionRecord, UserRecord};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;

// -- Request / response types -------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    /// 8–128 characters.
    pub password: String,
    /// Code of the user who referred this account.
    #[serde(default)]
    pub referral_code: Option<String>,
}

impl Validate for RegisterRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        Username::new(&self.username)?;
        Email::new(&self.email)?;
        check_password(&self.password)?;
        if let Some(code) = &self.referral_code {
            ReferralCode::parse(code)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    /// Username or email.
    pub login: String,
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        linkex_core::validate_text("login", &self.login, 1, 254)?;
        linkex_core::validate_text("password", &self.password, 1, MAX_PASSWORD_LEN)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

impl Validate for ChangePasswordRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        check_password(&self.new_password)
    }
}

/// A freshly issued session.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    /// Bearer token. Shown once; only its hash is stored.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserRecord,
}

fn check_password(password: &str) -> Result<(), ValidationError> {
    let len = password.chars().count();
    if (MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        Ok(())
    } else {
        Err(ValidationError::TextLength {
            field: "password",
            min: MIN_PASSWORD_LEN,
            max: MAX_PASSWORD_LEN,
        })
    }
}

// -- Routers ------------------------------------------------------------------

/// Registration and login.
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/v1/auth/register", post(register))
        .route("/v1/auth/login", post(login))
}

/// Session management for signed-in callers.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/auth/logout", post(logout))
        .route("/v1/auth/me", get(me))
        .route("/v1/auth/password", post(change_password))
}

// -- Helpers ------------------------------------------------------------------

async fn hash_off_thread(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(format!("password hashing task failed: {e}")))
}

async fn verify_off_thread(password: String, stored: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .map_err(|e| AppError::Internal(format!("password verification task failed: {e}")))
}

/// Issue and persist a session for `user_id`.
async fn issue_session(state: &AppState, user_id: Uuid) -> Result<(String, SessionRecord), AppError> {
    let token = generate_session_token();
    let now = Utc::now();
    let session = SessionRecord {
        token_hash: token_hash(&token),
        user_id,
        created_at: now,
        expires_at: now + Duration::hours(state.config.session_ttl_hours),
    };
    state.sessions.insert(session.clone());
    state.persist_session(&session).await?;
    Ok((token, session))
}

fn find_by_login(state: &AppState, login: &str) -> Option<UserRecord> {
    let needle = login.trim().to_ascii_lowercase();
    state
        .users
        .filter(|u| u.email == needle || u.username.to_ascii_lowercase() == needle)
        .into_iter()
        .next()
}

/// Create an account and its wallet. Uniqueness of username, email and
/// referral code is checked and claimed under the catalog lock.
async fn create_account(
    state: &AppState,
    username: Username,
    email: Email,
    password_hash: String,
    role: Role,
    referred_by: Option<Uuid>,
) -> Result<UserRecord, AppError> {
    let now = Utc::now();
    let record = {
        let _guard = state.catalog_lock.lock();
        let canonical = username.canonical();
        if state
            .users
            .any(|u| u.username.to_ascii_lowercase() == canonical)
        {
            return Err(AppError::Conflict(format!(
                "username '{username}' is already taken"
            )));
        }
        if state.users.any(|u| u.email == email.as_str()) {
            return Err(AppError::Conflict(format!(
                "email '{email}' is already registered"
            )));
        }

        let mut id = Uuid::new_v4();
        while state
            .users
            .any(|u| u.referral_code == ReferralCode::for_user(&id).as_str())
        {
            id = Uuid::new_v4();
        }
        let record = UserRecord {
            id,
            username: username.as_str().to_string(),
            email: email.as_str().to_string(),
            password_hash,
            role,
            display_name: None,
            bio: None,
            country: None,
            referral_code: ReferralCode::for_user(&id).as_str().to_string(),
            referred_by,
            banned: false,
            ban_reason: None,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(id, record.clone());
        record
    };

    state.persist_user(&record).await?;
    let wallet = state.ledger.open_wallet(record.id);
    state
        .persist_posting(&linkex_ledger::Posting {
            wallets: vec![wallet],
            ..Default::default()
        })
        .await?;
    state
        .audit(
            NewAuditEvent::new("user", record.id, "REGISTERED", Some(record.id)).with_metadata(
                serde_json::json!({ "role": role.as_str(), "referred_by": referred_by }),
            ),
        )
        .await;
    tracing::info!(user_id = %record.id, role = role.as_str(), "account created");
    Ok(record)
}

/// Create the configured first admin when no account exists yet.
///
/// Returns the created account, or `None` when nothing was configured or
/// users already exist.
pub async fn bootstrap_admin(state: &AppState) -> Result<Option<UserRecord>, AppError> {
    let Some(admin) = state.config.bootstrap_admin.clone() else {
        return Ok(None);
    };
    if !state.users.is_empty() {
        return Ok(None);
    }
    let email = Email::new(&admin.email)?;
    check_password(&admin.password)?;
    let username = Username::new("admin")?;
    let hash = hash_off_thread(admin.password).await?;
    let record = create_account(state, username, email, hash, Role::Admin, None).await?;
    tracing::warn!(user_id = %record.id, email = %record.email, "bootstrap admin account created");
    Ok(Some(record))
}

// -- Handlers -----------------------------------------------------------------

/// POST /v1/auth/register — Create an account and sign in.
#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = SessionResponse),
        (status = 409, description = "Username or email taken", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid field or unknown referral code", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
pub(crate) async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let req = extract_validated_json(body)?;
    let username = Username::new(&req.username)?;
    let email = Email::new(&req.email)?;

    let referred_by = match &req.referral_code {
        Some(code) => {
            let code = ReferralCode::parse(code)?;
            let referrer = state
                .users
                .filter(|u| u.referral_code == code.as_str())
                .into_iter()
                .next()
                .ok_or_else(|| AppError::Validation(format!("unknown referral code '{code}'")))?;
            Some(referrer.id)
        }
        None => None,
    };

    let hash = hash_off_thread(req.password).await?;
    let user = create_account(&state, username, email, hash, Role::User, referred_by).await?;

    if let Some(referrer) = referred_by {
        state
            .notify(
                referrer,
                "referral.signup",
                format!("{} signed up with your referral code", user.username),
                Some(user.id),
            )
            .await;
    }

    let (token, session) = issue_session(&state, user.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            token,
            expires_at: session.expires_at,
            user,
        }),
    ))
}

/// POST /v1/auth/login — Exchange credentials for a session token.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = SessionResponse),
        (status = 401, description = "Wrong credentials", body = crate::error::ErrorBody),
        (status = 403, description = "Account banned", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
pub(crate) async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let invalid = || AppError::Unauthorized("invalid login or password".into());

    let Some(user) = find_by_login(&state, &req.login) else {
        // Spend the same work as a real check so timing does not reveal
        // which logins exist.
        hash_off_thread(req.password).await?;
        tracing::info!("login failed: unknown account");
        return Err(invalid());
    };
    if !verify_off_thread(req.password, user.password_hash.clone()).await? {
        tracing::info!(user_id = %user.id, "login failed: wrong password");
        return Err(invalid());
    }
    if user.banned {
        return Err(AppError::Forbidden("account is banned".into()));
    }

    let (token, session) = issue_session(&state, user.id).await?;
    tracing::info!(user_id = %user.id, "signed in");
    Ok(Json(SessionResponse {
        token,
        expires_at: session.expires_at,
        user,
    }))
}

/// POST /v1/auth/logout — Revoke the session used for this request.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session revoked"),
        (status = 401, description = "Not signed in", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
pub(crate) async fn logout(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<StatusCode, AppError> {
    caller.account_id()?;
    if let Some(hash) = caller.session_hash {
        state.sessions.remove(&hash);
        state.forget_sessions(&[hash]).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/auth/me — The signed-in account.
#[utoipa::path(
    get,
    path = "/v1/auth/me",
    responses(
        (status = 200, description = "Current account", body = UserRecord),
        (status = 401, description = "Not signed in", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
pub(crate) async fn me(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<UserRecord>, AppError> {
    let id = caller.account_id()?;
    state
        .users
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("user {id} not found")))
}

/// POST /v1/auth/password — Change password and sign out other sessions.
#[utoipa::path(
    post,
    path = "/v1/auth/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 401, description = "Current password wrong", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
pub(crate) async fn change_password(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let id = caller.account_id()?;
    let req = extract_validated_json(body)?;
    let user = state
        .users
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("user {id} not found")))?;
    if !verify_off_thread(req.current_password, user.password_hash).await? {
        return Err(AppError::Unauthorized("current password is incorrect".into()));
    }

    let hash = hash_off_thread(req.new_password).await?;
    let updated = state
        .users
        .update(&id, |u| {
            u.password_hash = hash;
            u.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::NotFound(format!("user {id} not found")))?;
    state.persist_user(&updated).await?;

    let revoked = state.sessions.revoke_user(id, caller.session_hash.as_deref());
    state.forget_sessions(&revoked).await?;
    state
        .audit(
            NewAuditEvent::new("user", id, "PASSWORD_CHANGED", Some(id))
                .with_metadata(serde_json::json!({ "sessions_revoked": revoked.len() })),
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}
