//! # Funding Request Approval
//!
//! Deposits and withdrawals are requested by users and decided by an admin.
//! One decision per request: `PENDING → APPROVED | REJECTED`.

use serde::{Deserialize, Serialize};

use crate::lifecycle::Lifecycle;

/// Direction of a funding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestKind {
    /// Money entering the platform; credited on approval.
    Deposit,
    /// Money leaving the platform; held on request, paid out on approval.
    Withdrawal,
}

impl RequestKind {
    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::Withdrawal => "WITHDRAWAL",
        }
    }

    /// Parse a canonical name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "DEPOSIT" => Some(Self::Deposit),
            "WITHDRAWAL" => Some(Self::Withdrawal),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admin approval status of a funding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// Awaiting an admin decision.
    Pending,
    /// Approved. Terminal.
    Approved,
    /// Rejected. Terminal.
    Rejected,
}

impl RequestStatus {
    /// Parse a canonical state name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl Lifecycle for RequestStatus {
    const MACHINE: &'static str = "funding request";

    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    fn valid_transitions(&self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Approved, Self::Rejected],
            Self::Approved | Self::Rejected => &[],
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::TransitionError;

    #[test]
    fn single_decision() {
        let approved = RequestStatus::Pending
            .transition(RequestStatus::Approved)
            .unwrap();
        let err = approved.transition(RequestStatus::Rejected).unwrap_err();
        assert_eq!(
            err,
            TransitionError::AlreadyTerminal {
                machine: "funding request",
                state: "APPROVED",
            }
        );
    }

    #[test]
    fn pending_cannot_stay_pending() {
        assert!(RequestStatus::Pending
            .transition(RequestStatus::Pending)
            .is_err());
    }

    #[test]
    fn kind_names() {
        assert_eq!(RequestKind::from_name("DEPOSIT"), Some(RequestKind::Deposit));
        assert_eq!(RequestKind::Withdrawal.to_string(), "WITHDRAWAL");
        assert_eq!(RequestKind::from_name("deposit"), None);
    }
}
