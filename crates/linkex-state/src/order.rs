//! # Order Lifecycle
//!
//! ```text
//! PENDING ──accept──▶ IN_PROGRESS ──deliver──▶ DELIVERED ──complete──▶ COMPLETED
//!    │                    │                     │  │
//!    ├─reject─▶ REJECTED  └─cancel─▶ CANCELLED  │  └─revision─▶ REVISION_REQUESTED ─deliver─▶ DELIVERED
//!    └─cancel─▶ CANCELLED                       └─dispute─▶ DISPUTED ─▶ COMPLETED | REFUNDED
//! ```
//!
//! The buyer's money sits in escrow from `PENDING` until a terminal state.
//! [`OrderStatus::settlement`] says what happens to it on entry to each
//! terminal state.

use serde::{Deserialize, Serialize};

use crate::lifecycle::Lifecycle;

/// Fulfillment status of a guest-post order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Placed and paid into escrow; awaiting the seller.
    Pending,
    /// Seller accepted and is writing/placing the content.
    InProgress,
    /// Seller submitted the live URL; awaiting buyer review.
    Delivered,
    /// Buyer asked the seller to change the placement.
    RevisionRequested,
    /// Buyer disputed the delivery; awaiting an admin decision.
    Disputed,
    /// Funds released to the seller. Terminal.
    Completed,
    /// Seller declined the order. Terminal.
    Rejected,
    /// Order withdrawn before fulfillment. Terminal.
    Cancelled,
    /// Dispute resolved in the buyer's favour. Terminal.
    Refunded,
}

/// What happens to the escrowed funds when an order enters a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowOutcome {
    /// Funds stay in escrow.
    Hold,
    /// Funds go to the seller, minus the platform commission.
    ReleaseToSeller,
    /// Funds go back to the buyer in full.
    RefundBuyer,
}

impl OrderStatus {
    /// Every state, in lifecycle order.
    pub const ALL: [OrderStatus; 9] = [
        Self::Pending,
        Self::InProgress,
        Self::Delivered,
        Self::RevisionRequested,
        Self::Disputed,
        Self::Completed,
        Self::Rejected,
        Self::Cancelled,
        Self::Refunded,
    ];

    /// Parse a canonical state name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == name)
    }

    /// Escrow effect of entering this state.
    pub fn settlement(&self) -> EscrowOutcome {
        match self {
            Self::Completed => EscrowOutcome::ReleaseToSeller,
            Self::Rejected | Self::Cancelled | Self::Refunded => EscrowOutcome::RefundBuyer,
            _ => EscrowOutcome::Hold,
        }
    }

    /// Whether the order still needs action from someone (not terminal).
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

impl Lifecycle for OrderStatus {
    const MACHINE: &'static str = "order";

    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Delivered => "DELIVERED",
            Self::RevisionRequested => "REVISION_REQUESTED",
            Self::Disputed => "DISPUTED",
            Self::Completed => "COMPLETED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
        }
    }

    fn valid_transitions(&self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::InProgress, Self::Rejected, Self::Cancelled],
            Self::InProgress => &[Self::Delivered, Self::Cancelled],
            Self::Delivered => &[Self::Completed, Self::RevisionRequested, Self::Disputed],
            Self::RevisionRequested => &[Self::Delivered, Self::Disputed, Self::Cancelled],
            Self::Disputed => &[Self::Completed, Self::Refunded],
            Self::Completed | Self::Rejected | Self::Cancelled | Self::Refunded => &[],
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::TransitionError;

    #[test]
    fn happy_path() {
        let s = OrderStatus::Pending;
        let s = s.transition(OrderStatus::InProgress).unwrap();
        let s = s.transition(OrderStatus::Delivered).unwrap();
        let s = s.transition(OrderStatus::Completed).unwrap();
        assert!(s.is_terminal());
        assert_eq!(s.settlement(), EscrowOutcome::ReleaseToSeller);
    }

    #[test]
    fn revision_loop_returns_to_delivered() {
        let s = OrderStatus::Delivered
            .transition(OrderStatus::RevisionRequested)
            .unwrap();
        assert_eq!(
            s.transition(OrderStatus::Delivered).unwrap(),
            OrderStatus::Delivered
        );
    }

    #[test]
    fn cannot_complete_before_delivery() {
        let err = OrderStatus::InProgress
            .transition(OrderStatus::Completed)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                machine: "order",
                from: "IN_PROGRESS",
                to: "COMPLETED",
            }
        );
    }

    #[test]
    fn buyer_cannot_cancel_after_delivery() {
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn terminal_states_reject_everything() {
        for terminal in [
            OrderStatus::Completed,
            OrderStatus::Rejected,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
        ] {
            assert!(terminal.is_terminal());
            for target in OrderStatus::ALL {
                assert!(matches!(
                    terminal.transition(target),
                    Err(TransitionError::AlreadyTerminal { .. })
                ));
            }
        }
    }

    #[test]
    fn refunding_states_refund_buyer() {
        for s in [
            OrderStatus::Rejected,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
        ] {
            assert_eq!(s.settlement(), EscrowOutcome::RefundBuyer);
        }
        assert_eq!(OrderStatus::Disputed.settlement(), EscrowOutcome::Hold);
    }

    #[test]
    fn dispute_resolves_either_way() {
        assert!(OrderStatus::Disputed.can_transition_to(OrderStatus::Completed));
        assert!(OrderStatus::Disputed.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Disputed.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn names_round_trip() {
        for s in OrderStatus::ALL {
            assert_eq!(OrderStatus::from_name(s.as_str()), Some(s));
            let json = serde_json::to_string(&s).unwrap();
            assert_eq!(json, format!("\"{}\"", s.as_str()));
        }
        assert_eq!(OrderStatus::from_name("SHIPPED"), None);
    }
}
