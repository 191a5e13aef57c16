//! # Audit Log
//!
//! Append-only, tamper-evident event log. Each event's hash chains to the
//! previous one:
//!
//! ```text
//! event_hash = SHA-256(previous_hash || event_type || resource_type || resource_id || action)
//! ```
//!
//! The first event chains to 64 zeros. Events are kept in memory and
//! written through to `audit_events` by [`AppState::audit`](crate::state::AppState::audit).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

/// Hash the first event chains to.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One audited mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    pub id: Uuid,
    /// Dotted event name, e.g. `order.completed`.
    pub event_type: String,
    /// User who caused the event. `None` for the operator token and the
    /// auto-complete sweep.
    pub actor_id: Option<Uuid>,
    pub resource_type: String,
    pub resource_id: Uuid,
    pub action: String,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub previous_hash: String,
    pub event_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Input for [`AuditLog::append`].
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub event_type: String,
    pub actor_id: Option<Uuid>,
    pub resource_type: &'static str,
    pub resource_id: Uuid,
    pub action: String,
    pub metadata: serde_json::Value,
}

impl NewAuditEvent {
    /// Event with empty metadata. `event_type` is `{resource_type}.{action}`.
    pub fn new(
        resource_type: &'static str,
        resource_id: Uuid,
        action: impl Into<String>,
        actor_id: Option<Uuid>,
    ) -> Self {
        let action = action.into();
        Self {
            event_type: format!("{resource_type}.{}", action.to_lowercase()),
            actor_id,
            resource_type,
            resource_id,
            action,
            metadata: serde_json::Value::Null,
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of chain verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChainIntegrity {
    pub total_events: usize,
    /// Events whose `previous_hash` does not match the preceding event.
    pub broken_links: usize,
    /// Events whose stored hash does not match their recomputed hash.
    pub tampered_events: usize,
    pub chain_valid: bool,
    /// First event at which verification failed.
    pub first_failure: Option<Uuid>,
}

fn chain_hash(
    previous_hash: &str,
    event_type: &str,
    resource_type: &str,
    resource_id: Uuid,
    action: &str,
) -> String {
    let digest = Sha256::new()
        .chain_update(previous_hash.as_bytes())
        .chain_update(event_type.as_bytes())
        .chain_update(resource_type.as_bytes())
        .chain_update(resource_id.to_string().as_bytes())
        .chain_update(action.as_bytes())
        .finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// In-memory audit chain.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the chain with persisted events.
    ///
    /// Rows written concurrently can land in the table out of chain order,
    /// so events are relinked by following `previous_hash` from genesis.
    /// Events that do not link stay at the end in their original order,
    /// where [`verify`](Self::verify) reports them.
    pub fn restore(&self, events: Vec<AuditEvent>) {
        *self.events.lock() = relink(events);
    }

    /// Append an event, chaining it to the current head.
    pub fn append(&self, event: NewAuditEvent) -> AuditEvent {
        let mut events = self.events.lock();
        let previous_hash = events
            .last()
            .map(|e| e.event_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let event_hash = chain_hash(
            &previous_hash,
            &event.event_type,
            event.resource_type,
            event.resource_id,
            &event.action,
        );
        let record = AuditEvent {
            id: Uuid::new_v4(),
            event_type: event.event_type,
            actor_id: event.actor_id,
            resource_type: event.resource_type.to_string(),
            resource_id: event.resource_id,
            action: event.action,
            metadata: event.metadata,
            previous_hash,
            event_hash,
            created_at: Utc::now(),
        };
        events.push(record.clone());
        record
    }

    /// Most recent events first, optionally filtered by resource type.
    pub fn recent(&self, resource_type: Option<&str>, limit: usize) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .rev()
            .filter(|e| resource_type.map_or(true, |t| e.resource_type == t))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Events for one resource, oldest first.
    pub fn for_resource(&self, resource_id: Uuid) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.resource_id == resource_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk the chain, checking both links and recomputed hashes.
    pub fn verify(&self) -> ChainIntegrity {
        verify_chain(&self.events.lock())
    }
}

fn relink(events: Vec<AuditEvent>) -> Vec<AuditEvent> {
    let mut by_prev: HashMap<String, VecDeque<usize>> = HashMap::new();
    for (i, e) in events.iter().enumerate() {
        by_prev.entry(e.previous_hash.clone()).or_default().push_back(i);
    }

    let mut taken = vec![false; events.len()];
    let mut order = Vec::with_capacity(events.len());
    let mut head = GENESIS_HASH.to_string();
    while let Some(i) = by_prev.get_mut(&head).and_then(VecDeque::pop_front) {
        taken[i] = true;
        order.push(i);
        head = events[i].event_hash.clone();
    }

    let mut slots: Vec<Option<AuditEvent>> = events.into_iter().map(Some).collect();
    let leftovers: Vec<usize> = (0..slots.len()).filter(|i| !taken[*i]).collect();
    order
        .into_iter()
        .chain(leftovers)
        .filter_map(|i| slots[i].take())
        .collect()
}

fn verify_chain(events: &[AuditEvent]) -> ChainIntegrity {
    let mut broken_links = 0;
    let mut tampered_events = 0;
    let mut first_failure = None;
    let mut expected_prev = GENESIS_HASH;

    for event in events {
        let mut failed = false;
        if event.previous_hash != expected_prev {
            broken_links += 1;
            failed = true;
        }
        let recomputed = chain_hash(
            &event.previous_hash,
            &event.event_type,
            &event.resource_type,
            event.resource_id,
            &event.action,
        );
        if recomputed != event.event_hash {
            tampered_events += 1;
            failed = true;
        }
        if failed && first_failure.is_none() {
            first_failure = Some(event.id);
        }
        expected_prev = &event.event_hash;
    }

    ChainIntegrity {
        total_events: events.len(),
        broken_links,
        tampered_events,
        chain_valid: broken_links == 0 && tampered_events == 0,
        first_failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(log: &AuditLog, action: &str) -> AuditEvent {
        log.append(NewAuditEvent::new("order", Uuid::new_v4(), action, None))
    }

    #[test]
    fn first_event_chains_to_genesis() {
        let log = AuditLog::new();
        let e = sample(&log, "PLACED");
        assert_eq!(e.previous_hash, GENESIS_HASH);
        assert_eq!(e.event_type, "order.placed");
        assert_eq!(e.event_hash.len(), 64);
    }

    #[test]
    fn events_link_to_predecessor() {
        let log = AuditLog::new();
        let a = sample(&log, "PLACED");
        let b = sample(&log, "ACCEPTED");
        assert_eq!(b.previous_hash, a.event_hash);
        let report = log.verify();
        assert!(report.chain_valid);
        assert_eq!(report.total_events, 2);
    }

    #[test]
    fn tampering_is_detected() {
        let log = AuditLog::new();
        sample(&log, "PLACED");
        let victim = sample(&log, "ACCEPTED");
        sample(&log, "DELIVERED");

        let mut events = log.recent(None, 10);
        events.reverse();
        events[1].action = "REJECTED".into();
        log.restore(events);

        let report = log.verify();
        assert!(!report.chain_valid);
        assert_eq!(report.tampered_events, 1);
        assert_eq!(report.broken_links, 0);
        assert_eq!(report.first_failure, Some(victim.id));
    }

    #[test]
    fn removed_event_breaks_link() {
        let log = AuditLog::new();
        sample(&log, "PLACED");
        sample(&log, "ACCEPTED");
        sample(&log, "DELIVERED");

        let mut events = log.recent(None, 10);
        events.reverse();
        events.remove(1);
        log.restore(events);

        let report = log.verify();
        assert_eq!(report.broken_links, 1);
        assert!(!report.chain_valid);
    }

    #[test]
    fn restore_relinks_out_of_order_rows() {
        let log = AuditLog::new();
        let a = sample(&log, "PLACED");
        let b = sample(&log, "ACCEPTED");
        let c = sample(&log, "DELIVERED");

        log.restore(vec![b.clone(), c.clone(), a.clone()]);
        assert!(log.verify().chain_valid);
        let ids: Vec<Uuid> = log.recent(None, 10).into_iter().rev().map(|e| e.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn recent_filters_by_resource_type() {
        let log = AuditLog::new();
        sample(&log, "PLACED");
        log.append(NewAuditEvent::new("site", Uuid::new_v4(), "APPROVED", None));
        assert_eq!(log.recent(Some("site"), 10).len(), 1);
        assert_eq!(log.recent(None, 1).len(), 1);
        assert_eq!(log.recent(None, 1)[0].resource_type, "site");
    }
}
