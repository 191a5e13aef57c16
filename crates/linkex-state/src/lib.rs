//! # linkex-state — Marketplace Lifecycle State Machines
//!
//! Each record that moves through statuses (orders, exchanges, funding
//! requests, sites, tickets) has an enum here that implements
//! [`Lifecycle`]. The edge table lives next to the enum; API handlers never
//! assign a status field directly, they call [`advance`], which validates
//! the edge and appends a [`TransitionRecord`] to the record's history.
//!
//! | Machine | Terminal states |
//! |---------|-----------------|
//! | [`OrderStatus`] | COMPLETED, REJECTED, CANCELLED, REFUNDED |
//! | [`ExchangeStatus`] | COMPLETED, REJECTED, CANCELLED |
//! | [`RequestStatus`] | APPROVED, REJECTED |
//! | [`SiteStatus`] | none |
//! | [`TicketStatus`] | none |

pub mod exchange;
pub mod lifecycle;
pub mod order;
pub mod request;
pub mod site;
pub mod ticket;

pub use exchange::ExchangeStatus;
pub use lifecycle::{advance, Lifecycle, TransitionError, TransitionRecord};
pub use order::{EscrowOutcome, OrderStatus};
pub use request::{RequestKind, RequestStatus};
pub use site::SiteStatus;
pub use ticket::TicketStatus;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn advance_appends_history() {
        let mut status = OrderStatus::Pending;
        let mut history = Vec::new();
        let actor = Uuid::new_v4();

        advance(
            &mut status,
            &mut history,
            OrderStatus::InProgress,
            Some(actor),
            None,
        )
        .unwrap();

        assert_eq!(status, OrderStatus::InProgress);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from, OrderStatus::Pending);
        assert_eq!(history[0].to, OrderStatus::InProgress);
        assert_eq!(history[0].actor_id, Some(actor));
    }

    #[test]
    fn advance_failure_leaves_record_untouched() {
        let mut status = ExchangeStatus::Pending;
        let mut history = Vec::new();

        let err = advance(
            &mut status,
            &mut history,
            ExchangeStatus::Completed,
            None,
            Some("skip ahead".into()),
        );

        assert!(err.is_err());
        assert_eq!(status, ExchangeStatus::Pending);
        assert!(history.is_empty());
    }

    #[test]
    fn transition_record_serializes_state_names() {
        let rec = TransitionRecord::now(
            SiteStatus::Pending,
            SiteStatus::Approved,
            None,
            Some("looks good".into()),
        );
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["from"], "PENDING");
        assert_eq!(json["to"], "APPROVED");
        assert_eq!(json["note"], "looks good");
    }
}
