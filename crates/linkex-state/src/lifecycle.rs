//! # Lifecycle Trait & Transition Log
//!
//! Shared machinery for every state machine in this crate. A machine is a
//! `Copy` enum that lists its own outgoing edges; [`Lifecycle::transition`]
//! is the only sanctioned way to move between states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised when a requested transition is not an edge of the machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The target state is not reachable from the current state.
    #[error("{machine}: invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Machine name (e.g. "order").
        machine: &'static str,
        /// Current state name.
        from: &'static str,
        /// Requested state name.
        to: &'static str,
    },

    /// The record is already in a terminal state.
    #[error("{machine} is already {state}; no further transitions are allowed")]
    AlreadyTerminal {
        /// Machine name.
        machine: &'static str,
        /// Terminal state name.
        state: &'static str,
    },
}

/// A finite lifecycle with an explicit edge table.
pub trait Lifecycle: Copy + Eq + std::fmt::Debug + 'static {
    /// Human-readable machine name used in error messages.
    const MACHINE: &'static str;

    /// Canonical SCREAMING_SNAKE_CASE name of the state.
    fn as_str(&self) -> &'static str;

    /// States reachable in one step from `self`.
    fn valid_transitions(&self) -> &'static [Self];

    /// Whether no further transitions are possible.
    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Whether `to` is a direct successor of `self`.
    fn can_transition_to(&self, to: Self) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Validate and perform a transition, returning the new state.
    fn transition(self, to: Self) -> Result<Self, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::AlreadyTerminal {
                machine: Self::MACHINE,
                state: self.as_str(),
            });
        }
        if !self.can_transition_to(to) {
            return Err(TransitionError::InvalidTransition {
                machine: Self::MACHINE,
                from: self.as_str(),
                to: to.as_str(),
            });
        }
        Ok(to)
    }
}

/// One entry in a record's transition history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord<S> {
    /// State before the transition.
    pub from: S,
    /// State after the transition.
    pub to: S,
    /// User who caused the transition. `None` for system actions such as
    /// the auto-complete sweep.
    pub actor_id: Option<Uuid>,
    /// Optional free-text note (rejection reason, revision request, …).
    pub note: Option<String>,
    /// When the transition happened.
    pub at: DateTime<Utc>,
}

impl<S: Lifecycle> TransitionRecord<S> {
    /// Build a record stamped with the current time.
    pub fn now(from: S, to: S, actor_id: Option<Uuid>, note: Option<String>) -> Self {
        Self {
            from,
            to,
            actor_id,
            note,
            at: Utc::now(),
        }
    }
}

/// Apply a transition to `state` in place and append the history record.
///
/// On error neither `state` nor `history` is modified.
pub fn advance<S: Lifecycle>(
    state: &mut S,
    history: &mut Vec<TransitionRecord<S>>,
    to: S,
    actor_id: Option<Uuid>,
    note: Option<String>,
) -> Result<(), TransitionError> {
    let from = *state;
    *state = from.transition(to)?;
    history.push(TransitionRecord::now(from, to, actor_id, note));
    Ok(())
}
