//! # Site Moderation
//!
//! Sellers submit sites; staff approve them before any listing or exchange
//! can reference them. The machine has no terminal state: a rejected site
//! can be edited and resubmitted, and a suspended site can be reinstated.

use serde::{Deserialize, Serialize};

use crate::lifecycle::Lifecycle;

/// Moderation status of a website.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteStatus {
    /// Submitted; awaiting review.
    Pending,
    /// Visible in the marketplace.
    Approved,
    /// Review failed; owner may edit and resubmit.
    Rejected,
    /// Pulled from the marketplace by staff.
    Suspended,
}

impl SiteStatus {
    /// Every state.
    pub const ALL: [SiteStatus; 4] = [
        Self::Pending,
        Self::Approved,
        Self::Rejected,
        Self::Suspended,
    ];

    /// Parse a canonical state name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == name)
    }

    /// Whether listings and exchanges may reference a site in this state.
    pub fn is_marketable(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

impl Lifecycle for SiteStatus {
    const MACHINE: &'static str = "site";

    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Suspended => "SUSPENDED",
        }
    }

    fn valid_transitions(&self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Approved, Self::Rejected],
            Self::Approved => &[Self::Suspended],
            Self::Rejected => &[Self::Pending],
            Self::Suspended => &[Self::Approved],
        }
    }
}

impl std::fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_is_terminal() {
        for s in SiteStatus::ALL {
            assert!(!s.is_terminal(), "{s} should not be terminal");
        }
    }

    #[test]
    fn rejected_site_can_be_resubmitted() {
        let s = SiteStatus::Rejected.transition(SiteStatus::Pending).unwrap();
        assert_eq!(s.transition(SiteStatus::Approved).unwrap(), SiteStatus::Approved);
    }

    #[test]
    fn suspension_round_trip() {
        let s = SiteStatus::Approved
            .transition(SiteStatus::Suspended)
            .unwrap();
        assert!(!s.is_marketable());
        assert!(s.transition(SiteStatus::Approved).unwrap().is_marketable());
    }

    #[test]
    fn pending_cannot_be_suspended() {
        assert!(SiteStatus::Pending.transition(SiteStatus::Suspended).is_err());
    }
}
