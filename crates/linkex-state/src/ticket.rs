//! # Support Ticket Status

use serde::{Deserialize, Serialize};

use crate::lifecycle::Lifecycle;

/// Status of a support ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    /// Waiting for staff.
    Open,
    /// Staff replied; waiting for the user.
    Answered,
    /// Resolved. Can be reopened.
    Closed,
}

impl TicketStatus {
    /// Parse a canonical state name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "OPEN" => Some(Self::Open),
            "ANSWERED" => Some(Self::Answered),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl Lifecycle for TicketStatus {
    const MACHINE: &'static str = "ticket";

    fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Answered => "ANSWERED",
            Self::Closed => "CLOSED",
        }
    }

    fn valid_transitions(&self) -> &'static [Self] {
        match self {
            Self::Open => &[Self::Answered, Self::Closed],
            Self::Answered => &[Self::Open, Self::Closed],
            Self::Closed => &[Self::Open],
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
