//! # Support Tickets API
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/v1/tickets` | `create_ticket` |
//! | `GET` | `/v1/tickets` | `list_tickets` |
//! | `GET` | `/v1/tickets/:id` | `get_ticket` |
//! | `POST` | `/v1/tickets/:id/reply` | `reply_ticket` |
//! | `POST` | `/v1/tickets/:id/close` | `close_ticket` |
//! | `POST` | `/v1/tickets/:id/reopen` | `reopen_ticket` |
//!
//! A staff reply marks the ticket `ANSWERED`; a reply from its owner moves
//! it back to `OPEN`. The staff queue is `GET /v1/admin/tickets`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use linkex_core::ValidationError;
use linkex_state::{Lifecycle, TicketStatus};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::NewAuditEvent;
use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::routes::load_order;
use crate::state::{AppState, TicketMessage, TicketRecord};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateTicketRequest {
    pub subject: String,
    pub message: String,
    /// Order the ticket is about, if any.
    #[serde(default)]
    pub order_id: Option<Uuid>,
}

impl Validate for CreateTicketRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        linkex_core::validate_text("subject", &self.subject, 1, 200)?;
        linkex_core::validate_text("message", &self.message, 1, 10_000)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct TicketReplyRequest {
    pub message: String,
}

impl Validate for TicketReplyRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        linkex_core::validate_text("message", &self.message, 1, 10_000).map(|_| ())
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/tickets", post(create_ticket).get(list_tickets))
        .route("/v1/tickets/:id", get(get_ticket))
        .route("/v1/tickets/:id/reply", post(reply_ticket))
        .route("/v1/tickets/:id/close", post(close_ticket))
        .route("/v1/tickets/:id/reopen", post(reopen_ticket))
}

/// Run `change` on the ticket under its lock if the caller owns it or is
/// staff, then write it through.
async fn modify(
    state: &AppState,
    caller: &CallerIdentity,
    id: Uuid,
    change: impl FnOnce(&mut TicketRecord) -> Result<(), AppError>,
) -> Result<TicketRecord, AppError> {
    let not_found = || AppError::NotFound(format!("ticket {id} not found"));
    let updated = state
        .tickets
        .try_update(&id, |ticket| {
            if !caller.is_staff() && ticket.user_id != caller.user_id {
                return Err(not_found());
            }
            let mut next = ticket.clone();
            change(&mut next)?;
            next.updated_at = Utc::now();
            *ticket = next.clone();
            Ok(next)
        })
        .ok_or_else(not_found)??;
    state.persist_ticket(&updated).await?;
    Ok(updated)
}

fn move_to(ticket: &mut TicketRecord, to: TicketStatus) -> Result<(), AppError> {
    ticket.status = ticket.status.transition(to)?;
    Ok(())
}

/// POST /v1/tickets — Open a support ticket.
#[utoipa::path(
    post,
    path = "/v1/tickets",
    request_body = CreateTicketRequest,
    responses(
        (status = 201, description = "Ticket opened", body = TicketRecord),
        (status = 404, description = "Referenced order not found", body = crate::error::ErrorBody),
    ),
    tag = "tickets"
)]
pub(crate) async fn create_ticket(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateTicketRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TicketRecord>), AppError> {
    let user = caller.account_id()?;
    let req = extract_validated_json(body)?;
    if let Some(order_id) = req.order_id {
        let order = load_order(&state, order_id)?;
        if !order.is_party(user) {
            return Err(AppError::NotFound(format!("order {order_id} not found")));
        }
    }

    let now = Utc::now();
    let record = TicketRecord {
        id: Uuid::new_v4(),
        user_id: user,
        subject: req.subject.trim().to_string(),
        order_id: req.order_id,
        status: TicketStatus::Open,
        messages: vec![TicketMessage {
            author_id: Some(user),
            staff: false,
            body: req.message.trim().to_string(),
            at: now,
        }],
        created_at: now,
        updated_at: now,
    };
    state.tickets.insert(record.id, record.clone());
    state.persist_ticket(&record).await?;
    state
        .audit(NewAuditEvent::new("ticket", record.id, "OPENED", Some(user)))
        .await;
    tracing::info!(ticket_id = %record.id, "support ticket opened");
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /v1/tickets — The caller's tickets, most recently updated first.
#[utoipa::path(
    get,
    path = "/v1/tickets",
    responses((status = 200, description = "Caller's tickets", body = Vec<TicketRecord>)),
    tag = "tickets"
)]
pub(crate) async fn list_tickets(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<TicketRecord>>, AppError> {
    let user = caller.account_id()?;
    let mut items = state.tickets.filter(|t| t.user_id == user);
    items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(Json(items))
}

/// GET /v1/tickets/:id — A ticket with its conversation.
#[utoipa::path(
    get,
    path = "/v1/tickets/{id}",
    params(("id" = Uuid, Path, description = "Ticket ID")),
    responses(
        (status = 200, description = "Ticket", body = TicketRecord),
        (status = 404, description = "Ticket not found", body = crate::error::ErrorBody),
    ),
    tag = "tickets"
)]
pub(crate) async fn get_ticket(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<TicketRecord>, AppError> {
    state
        .tickets
        .get(&id)
        .filter(|t| caller.is_staff() || t.user_id == caller.user_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("ticket {id} not found")))
}

/// POST /v1/tickets/:id/reply — Add a message.
#[utoipa::path(
    post,
    path = "/v1/tickets/{id}/reply",
    params(("id" = Uuid, Path, description = "Ticket ID")),
    request_body = TicketReplyRequest,
    responses(
        (status = 200, description = "Reply added", body = TicketRecord),
        (status = 409, description = "Ticket is closed", body = crate::error::ErrorBody),
    ),
    tag = "tickets"
)]
pub(crate) async fn reply_ticket(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<TicketReplyRequest>, JsonRejection>,
) -> Result<Json<TicketRecord>, AppError> {
    let req = extract_validated_json(body)?;
    let staff = caller.is_staff();
    let message = TicketMessage {
        author_id: caller.actor(),
        staff,
        body: req.message.trim().to_string(),
        at: Utc::now(),
    };
    let updated = modify(&state, &caller, id, |ticket| {
        if ticket.status == TicketStatus::Closed {
            return Err(AppError::Conflict("ticket is closed; reopen it first".into()));
        }
        let target = if staff {
            TicketStatus::Answered
        } else {
            TicketStatus::Open
        };
        if ticket.status != target {
            move_to(ticket, target)?;
        }
        ticket.messages.push(message);
        Ok(())
    })
    .await?;

    if staff && updated.user_id != caller.user_id {
        state
            .notify(
                updated.user_id,
                "ticket.answered",
                format!("Support replied to \"{}\"", updated.subject),
                Some(updated.id),
            )
            .await;
    }
    Ok(Json(updated))
}

/// POST /v1/tickets/:id/close
#[utoipa::path(
    post,
    path = "/v1/tickets/{id}/close",
    params(("id" = Uuid, Path, description = "Ticket ID")),
    responses(
        (status = 200, description = "Ticket closed", body = TicketRecord),
        (status = 409, description = "Already closed", body = crate::error::ErrorBody),
    ),
    tag = "tickets"
)]
pub(crate) async fn close_ticket(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<TicketRecord>, AppError> {
    let updated = modify(&state, &caller, id, |t| move_to(t, TicketStatus::Closed)).await?;
    state
        .audit(NewAuditEvent::new("ticket", id, "CLOSED", caller.actor()))
        .await;
    Ok(Json(updated))
}

/// POST /v1/tickets/:id/reopen
#[utoipa::path(
    post,
    path = "/v1/tickets/{id}/reopen",
    params(("id" = Uuid, Path, description = "Ticket ID")),
    responses(
        (status = 200, description = "Ticket reopened", body = TicketRecord),
        (status = 409, description = "Ticket is not closed", body = crate::error::ErrorBody),
    ),
    tag = "tickets"
)]
pub(crate) async fn reopen_ticket(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<TicketRecord>, AppError> {
    let updated = modify(&state, &caller, id, |t| {
        if t.status != TicketStatus::Closed {
            return Err(AppError::Conflict(format!(
                "ticket is {}, not CLOSED",
                t.status.as_str()
            )));
        }
        move_to(t, TicketStatus::Open)
    })
    .await?;
    state
        .audit(NewAuditEvent::new("ticket", id, "REOPENED", caller.actor()))
        .await;
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::test_support::{seed_user, send, test_app, test_state};
    use serde_json::json;

    #[tokio::test]
    async fn conversation_moves_between_open_and_answered() {
        let state = test_state();
        let app = test_app(&state);
        let (user, token) = seed_user(&state, "olga", Role::User);
        let (_, staff) = seed_user(&state, "support", Role::Employee);

        let (status, body) = send(
            &app,
            "POST",
            "/v1/tickets",
            Some(&token),
            Some(json!({ "subject": "Payout late", "message": "Where is my money?" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "OPEN");
        let id = body["id"].as_str().unwrap().to_string();
        let reply = format!("/v1/tickets/{id}/reply");

        let (_, body) = send(&app, "POST", &reply, Some(&staff), Some(json!({ "message": "Checking." }))).await;
        assert_eq!(body["status"], "ANSWERED");
        assert_eq!(body["messages"][1]["staff"], true);
        assert_eq!(
            state
                .notifications
                .count(|n| n.user_id == user.id && n.kind == "ticket.answered"),
            1
        );

        let (_, body) = send(&app, "POST", &reply, Some(&token), Some(json!({ "message": "Thanks" }))).await;
        assert_eq!(body["status"], "OPEN");
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn closed_ticket_must_be_reopened_before_reply() {
        let state = test_state();
        let app = test_app(&state);
        let (_, token) = seed_user(&state, "pat", Role::User);
        let (_, body) = send(
            &app,
            "POST",
            "/v1/tickets",
            Some(&token),
            Some(json!({ "subject": "Question", "message": "Hi" })),
        )
        .await;
        let id = body["id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "POST", &format!("/v1/tickets/{id}/close"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "CLOSED");

        let (status, _) = send(
            &app,
            "POST",
            &format!("/v1/tickets/{id}/reply"),
            Some(&token),
            Some(json!({ "message": "One more thing" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app, "POST", &format!("/v1/tickets/{id}/reopen"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OPEN");

        let (status, _) = send(&app, "POST", &format!("/v1/tickets/{id}/reopen"), Some(&token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn tickets_are_private() {
        let state = test_state();
        let app = test_app(&state);
        let (_, owner) = seed_user(&state, "quinn", Role::User);
        let (_, other) = seed_user(&state, "rita", Role::User);
        let (_, body) = send(
            &app,
            "POST",
            "/v1/tickets",
            Some(&owner),
            Some(json!({ "subject": "Private", "message": "secret" })),
        )
        .await;
        let id = body["id"].as_str().unwrap().to_string();
        let (status, _) = send(&app, "GET", &format!("/v1/tickets/{id}"), Some(&other), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) = send(&app, "GET", "/v1/tickets", Some(&other), None).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ticket_order_must_belong_to_caller() {
        let state = test_state();
        let app = test_app(&state);
        let (_, token) = seed_user(&state, "sam", Role::User);
        let (status, _) = send(
            &app,
            "POST",
            "/v1/tickets",
            Some(&token),
            Some(json!({ "subject": "Order", "message": "?", "order_id": Uuid::new_v4() })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
