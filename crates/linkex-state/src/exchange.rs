//! # Link Exchange Lifecycle
//!
//! A reciprocal placement between two site owners. No money moves; the
//! machine only tracks agreement and delivery.
//!
//! `PENDING → ACTIVE → COMPLETED`, with `REJECTED` and `CANCELLED` exits.
//! The move to `COMPLETED` happens once both sides have recorded a
//! placement URL (see [`ExchangeStatus::after_delivery`]).

use serde::{Deserialize, Serialize};

use crate::lifecycle::Lifecycle;

/// Status of a reciprocal link exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeStatus {
    /// Proposed by the requester; awaiting the other owner.
    Pending,
    /// Both owners agreed; placements are being made.
    Active,
    /// Both placements recorded. Terminal.
    Completed,
    /// The other owner declined. Terminal.
    Rejected,
    /// Withdrawn by either party. Terminal.
    Cancelled,
}

impl ExchangeStatus {
    /// Every state.
    pub const ALL: [ExchangeStatus; 5] = [
        Self::Pending,
        Self::Active,
        Self::Completed,
        Self::Rejected,
        Self::Cancelled,
    ];

    /// Parse a canonical state name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == name)
    }

    /// State an `ACTIVE` exchange should move to after a delivery is
    /// recorded, given whether each side has now delivered.
    pub fn after_delivery(requester_delivered: bool, target_delivered: bool) -> Self {
        if requester_delivered && target_delivered {
            Self::Completed
        } else {
            Self::Active
        }
    }
}

impl Lifecycle for ExchangeStatus {
    const MACHINE: &'static str = "exchange";

    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
        }
    }

    fn valid_transitions(&self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Active, Self::Rejected, Self::Cancelled],
            Self::Active => &[Self::Completed, Self::Cancelled],
            Self::Completed | Self::Rejected | Self::Cancelled => &[],
        }
    }
}

impl std::fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_then_complete() {
        let s = ExchangeStatus::Pending
            .transition(ExchangeStatus::Active)
            .unwrap();
        assert_eq!(
            s.transition(ExchangeStatus::Completed).unwrap(),
            ExchangeStatus::Completed
        );
    }

    #[test]
    fn pending_cannot_complete_directly() {
        assert!(ExchangeStatus::Pending
            .transition(ExchangeStatus::Completed)
            .is_err());
    }

    #[test]
    fn active_cannot_be_rejected() {
        assert!(!ExchangeStatus::Active.can_transition_to(ExchangeStatus::Rejected));
    }

    #[test]
    fn completion_requires_both_sides() {
        assert_eq!(
            ExchangeStatus::after_delivery(true, false),
            ExchangeStatus::Active
        );
        assert_eq!(
            ExchangeStatus::after_delivery(false, true),
            ExchangeStatus::Active
        );
        assert_eq!(
            ExchangeStatus::after_delivery(true, true),
            ExchangeStatus::Completed
        );
    }

    #[test]
    fn terminal_states() {
        assert!(ExchangeStatus::Completed.is_terminal());
        assert!(ExchangeStatus::Rejected.is_terminal());
        assert!(ExchangeStatus::Cancelled.is_terminal());
        assert!(!ExchangeStatus::Active.is_terminal());
        assert_eq!(ExchangeStatus::from_name("ACTIVE"), Some(ExchangeStatus::Active));
    }
}
