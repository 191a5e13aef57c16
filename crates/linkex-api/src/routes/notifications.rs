//! # Notifications API
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `GET` | `/v1/notifications` | `list_notifications` |
//! | `GET` | `/v1/notifications/unread-count` | `unread_count` |
//! | `POST` | `/v1/notifications/:id/read` | `mark_read` |
//! | `POST` | `/v1/notifications/read-all` | `mark_all_read` |

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::extract_query;
use crate::state::{AppState, NotificationRecord};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NotificationQuery {
    /// Only unread notifications.
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UnreadCount {
    pub unread: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MarkedRead {
    /// Notifications that changed from unread to read.
    pub updated: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/notifications", get(list_notifications))
        .route("/v1/notifications/unread-count", get(unread_count))
        .route("/v1/notifications/read-all", post(mark_all_read))
        .route("/v1/notifications/:id/read", post(mark_read))
}

/// GET /v1/notifications — The caller's notifications, newest first.
#[utoipa::path(
    get,
    path = "/v1/notifications",
    params(NotificationQuery),
    responses((status = 200, description = "Notifications", body = Vec<NotificationRecord>)),
    tag = "notifications"
)]
pub(crate) async fn list_notifications(
    State(state): State<AppState>,
    caller: CallerIdentity,
    query: Result<Query<NotificationQuery>, QueryRejection>,
) -> Result<Json<Vec<NotificationRecord>>, AppError> {
    let user = caller.account_id()?;
    let q = extract_query(query)?;
    let mut items = state
        .notifications
        .filter(|n| n.user_id == user && (!q.unread_only || !n.read));
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(items))
}

/// GET /v1/notifications/unread-count
#[utoipa::path(
    get,
    path = "/v1/notifications/unread-count",
    responses((status = 200, description = "Unread notifications", body = UnreadCount)),
    tag = "notifications"
)]
pub(crate) async fn unread_count(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<UnreadCount>, AppError> {
    let user = caller.account_id()?;
    let unread = state.notifications.count(|n| n.user_id == user && !n.read);
    Ok(Json(UnreadCount { unread }))
}

/// POST /v1/notifications/:id/read
#[utoipa::path(
    post,
    path = "/v1/notifications/{id}/read",
    params(("id" = Uuid, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "Notification marked read", body = NotificationRecord),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "notifications"
)]
pub(crate) async fn mark_read(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationRecord>, AppError> {
    let user = caller.account_id()?;
    let not_found = || AppError::NotFound(format!("notification {id} not found"));
    let updated = state
        .notifications
        .try_update(&id, |n| {
            if n.user_id != user {
                return Err(not_found());
            }
            n.read = true;
            Ok(n.clone())
        })
        .ok_or_else(not_found)??;
    state.persist_notifications(std::slice::from_ref(&updated)).await?;
    Ok(Json(updated))
}

/// POST /v1/notifications/read-all
#[utoipa::path(
    post,
    path = "/v1/notifications/read-all",
    responses((status = 200, description = "All notifications marked read", body = MarkedRead)),
    tag = "notifications"
)]
pub(crate) async fn mark_all_read(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<MarkedRead>, AppError> {
    let user = caller.account_id()?;
    let changed = state
        .notifications
        .update_where(|n| n.user_id == user && !n.read, |n| n.read = true);
    state.persist_notifications(&changed).await?;
    Ok(Json(MarkedRead {
        updated: changed.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::test_support::{seed_user, send, test_app, test_state};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn read_flow() {
        let state = test_state();
        let app = test_app(&state);
        let (user, token) = seed_user(&state, "nina", Role::User);
        for i in 0..3 {
            state.notify(user.id, "test.ping", format!("ping {i}"), None).await;
        }

        let (_, body) = send(&app, "GET", "/v1/notifications/unread-count", Some(&token), None).await;
        assert_eq!(body["unread"], 3);

        let (_, list) = send(&app, "GET", "/v1/notifications", Some(&token), None).await;
        let first = list[0]["id"].as_str().unwrap().to_string();
        let (status, body) = send(
            &app,
            "POST",
            &format!("/v1/notifications/{first}/read"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["read"], true);

        let (_, body) =
            send(&app, "GET", "/v1/notifications?unread_only=true", Some(&token), None).await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (_, body) = send(&app, "POST", "/v1/notifications/read-all", Some(&token), None).await;
        assert_eq!(body["updated"], 2);
        let (_, body) = send(&app, "GET", "/v1/notifications/unread-count", Some(&token), None).await;
        assert_eq!(body["unread"], 0);
    }

    #[tokio::test]
    async fn cannot_read_someone_elses_notification() {
        let state = test_state();
        let app = test_app(&state);
        let (owner, _) = seed_user(&state, "owner", Role::User);
        let (_, other) = seed_user(&state, "other", Role::User);
        state.notify(owner.id, "test.ping", "hello", None).await;
        let id = state.notifications.list()[0].id;

        let (status, _) = send(
            &app,
            "POST",
            &format!("/v1/notifications/{id}/read"),
            Some(&other),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!state.notifications.get(&id).unwrap().read);
    }
}
