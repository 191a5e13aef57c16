//! # Order Settlement
//!
//! Every order status change goes through [`apply_order_transition`]. It
//! validates the edge, applies the escrow effect of the target status
//! ([`OrderStatus::settlement`]) and commits the record, all under the
//! order's store lock, so two concurrent requests can never both settle
//! the same order.
//!
//! Completion additionally pays the buyer's referrer, once per referred
//! user. The background [`spawn_auto_complete`] task completes delivered
//! orders the buyer never confirmed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use linkex_ledger::{Posting, Settlement};
use linkex_state::{advance, EscrowOutcome, Lifecycle, OrderStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::NewAuditEvent;
use crate::error::AppError;
use crate::state::{AppState, OrderRecord};

/// Result of a committed order transition.
#[derive(Debug, Clone)]
pub struct OrderTransition {
    pub order: OrderRecord,
    pub from: OrderStatus,
    /// Present when escrow was released to the seller.
    pub settlement: Option<Settlement>,
    /// Referral commission paid on this completion, in cents.
    pub referral_paid: Option<linkex_core::Money>,
}

/// Move `order_id` to `to`.
///
/// `prepare` runs against a copy of the order under the store lock before
/// the edge is validated. It checks status-dependent actor rules and sets
/// the fields the transition carries (live URL, revision note, ...). If it
/// fails, or the edge is invalid, or the ledger refuses, nothing changes.
pub async fn apply_order_transition(
    state: &AppState,
    order_id: Uuid,
    to: OrderStatus,
    actor: Option<Uuid>,
    note: Option<String>,
    prepare: impl FnOnce(&mut OrderRecord) -> Result<(), AppError>,
) -> Result<OrderTransition, AppError> {
    let schedule = state.fee_schedule();
    let committed = state
        .orders
        .try_update(&order_id, |order| {
            let mut next = order.clone();
            prepare(&mut next)?;
            let from = next.status;
            advance(&mut next.status, &mut next.history, to, actor, note.clone())?;

            let now = Utc::now();
            next.updated_at = now;
            if to == OrderStatus::Delivered {
                next.delivered_at = Some(now);
            }

            let (settlement, posting) = match to.settlement() {
                EscrowOutcome::Hold => (None, None),
                EscrowOutcome::ReleaseToSeller => {
                    let (settlement, posting) =
                        state
                            .ledger
                            .release_to_seller(next.id, next.seller_id, &schedule)?;
                    next.fee = Some(settlement.fee);
                    next.completed_at = Some(now);
                    (Some(settlement), Some(posting))
                }
                EscrowOutcome::RefundBuyer => (None, Some(state.ledger.refund_order(next.id)?)),
            };

            *order = next.clone();
            Ok::<_, AppError>((next, from, settlement, posting))
        })
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
    let (order, from, settlement, posting) = committed?;

    if let Some(posting) = &posting {
        state.persist_posting(posting).await?;
    }

    let mut referral_paid = None;
    if to == OrderStatus::Completed {
        if let Some(posting) = pay_referral(state, &order).await? {
            referral_paid = posting.referral.as_ref().map(|r| r.amount);
        }
    }
    state.persist_order(&order).await?;

    tracing::info!(
        order_id = %order.id,
        from = %from,
        to = %to,
        actor = ?actor,
        "order transitioned"
    );

    let recipients = match actor {
        Some(a) if order.is_party(a) => vec![order.counterparty(a)],
        _ => vec![order.buyer_id, order.seller_id],
    };
    let kind = format!("order.{}", to.as_str().to_lowercase());
    for user in recipients {
        state
            .notify(
                user,
                &kind,
                format!("Order for \"{}\" is now {}", order.anchor_text, to),
                Some(order.id),
            )
            .await;
    }

    state
        .audit(
            NewAuditEvent::new("order", order.id, to.as_str(), actor).with_metadata(
                serde_json::json!({
                    "from": from.as_str(),
                    "to": to.as_str(),
                    "note": note,
                    "fee_cents": settlement.as_ref().map(|s| s.fee.cents()),
                    "seller_net_cents": settlement.as_ref().map(|s| s.seller_net.cents()),
                    "referral_cents": referral_paid.map(|m| m.cents()),
                }),
            ),
        )
        .await;

    Ok(OrderTransition {
        order,
        from,
        settlement,
        referral_paid,
    })
}

/// Pay the buyer's referrer for this completed order, if one is owed.
///
/// A failure here does not undo the completion; it is logged.
async fn pay_referral(
    state: &AppState,
    order: &OrderRecord,
) -> Result<Option<Posting>, AppError> {
    let Some(referrer_id) = state.users.get(&order.buyer_id).and_then(|u| u.referred_by) else {
        return Ok(None);
    };
    let schedule = state.fee_schedule();
    let posting = match state.ledger.pay_referral(
        referrer_id,
        order.buyer_id,
        order.id,
        order.price,
        &schedule,
    ) {
        Ok(Some(posting)) => posting,
        Ok(None) => return Ok(None),
        Err(e) => {
            tracing::error!(
                error = %e,
                order_id = %order.id,
                referrer_id = %referrer_id,
                "referral commission not paid"
            );
            return Ok(None);
        }
    };
    state.persist_posting(&posting).await?;

    if let Some(payout) = &posting.referral {
        state
            .notify(
                referrer_id,
                "referral.commission",
                format!("You earned a referral commission of {}", payout.amount),
                Some(order.id),
            )
            .await;
        state
            .audit(
                NewAuditEvent::new("wallet", referrer_id, "REFERRAL_PAID", None).with_metadata(
                    serde_json::json!({
                        "referred_id": payout.referred_id,
                        "order_id": payout.order_id,
                        "amount_cents": payout.amount.cents(),
                    }),
                ),
            )
            .await;
    }
    Ok(Some(posting))
}

// -- Auto-complete ------------------------------------------------------------

/// Outcome of one auto-complete sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SweepReport {
    /// Delivered orders past the review window when the sweep started.
    pub due: usize,
    /// Orders the sweep completed.
    pub completed: Vec<Uuid>,
    /// Orders that could not be completed (changed concurrently or failed).
    pub skipped: usize,
}

/// Complete every order delivered at or before `now - auto_complete_days`.
pub async fn auto_complete_sweep(state: &AppState, now: DateTime<Utc>) -> SweepReport {
    let cutoff = now - chrono::Duration::days(state.config.auto_complete_days);
    let is_due = move |o: &OrderRecord| {
        o.status == OrderStatus::Delivered && o.delivered_at.is_some_and(|d| d <= cutoff)
    };
    let due = state.orders.filter(is_due);

    let mut report = SweepReport {
        due: due.len(),
        ..SweepReport::default()
    };
    for order in due {
        let result = apply_order_transition(
            state,
            order.id,
            OrderStatus::Completed,
            None,
            Some("completed automatically after the review window".into()),
            |current| {
                if is_due(&*current) {
                    Ok(())
                } else {
                    Err(AppError::Conflict("order is no longer awaiting review".into()))
                }
            },
        )
        .await;
        match result {
            Ok(done) => report.completed.push(done.order.id),
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "auto-complete skipped order");
                report.skipped += 1;
            }
        }
    }

    if report.due > 0 {
        tracing::info!(
            due = report.due,
            completed = report.completed.len(),
            skipped = report.skipped,
            "auto-complete sweep finished"
        );
    }
    report
}

/// Run [`auto_complete_sweep`] every `auto_complete_interval_secs`.
pub fn spawn_auto_complete(state: AppState) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(state.config.auto_complete_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            auto_complete_sweep(&state, Utc::now()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::config::AppConfig;
    use crate::state::UserRecord;
    use linkex_core::Money;

    struct Fixture {
        state: AppState,
        buyer: Uuid,
        seller: Uuid,
        order: Uuid,
    }

    fn fixture(referred_by: Option<Uuid>) -> Fixture {
        let state = AppState::with_config(AppConfig::default()).unwrap();
        let mut buyer = UserRecord::new_for_tests("buyer", Role::User);
        buyer.referred_by = referred_by;
        let seller = UserRecord::new_for_tests("seller", Role::User);
        for user in [&buyer, &seller] {
            state.users.insert(user.id, user.clone());
            state.ledger.open_wallet(user.id);
        }
        state
            .ledger
            .deposit(buyer.id, Money::from_cents(20_000), None, "test")
            .unwrap();

        let order_id = Uuid::new_v4();
        state
            .ledger
            .hold_for_order(buyer.id, order_id, Money::from_cents(10_000))
            .unwrap();
        let now = Utc::now();
        state.orders.insert(
            order_id,
            OrderRecord {
                id: order_id,
                listing_id: Uuid::new_v4(),
                site_id: Uuid::new_v4(),
                buyer_id: buyer.id,
                seller_id: seller.id,
                price: Money::from_cents(10_000),
                target_url: "https://buyer.example.com".into(),
                anchor_text: "widgets".into(),
                notes: None,
                live_url: None,
                revision_note: None,
                dispute_reason: None,
                status: OrderStatus::Pending,
                history: vec![],
                fee: None,
                delivered_at: None,
                completed_at: None,
                created_at: now,
                updated_at: now,
            },
        );
        Fixture {
            state,
            buyer: buyer.id,
            seller: seller.id,
            order: order_id,
        }
    }

    async fn step(f: &Fixture, to: OrderStatus) -> Result<OrderTransition, AppError> {
        apply_order_transition(&f.state, f.order, to, None, None, |_| Ok(())).await
    }

    async fn deliver(f: &Fixture) {
        step(f, OrderStatus::InProgress).await.unwrap();
        step(f, OrderStatus::Delivered).await.unwrap();
    }

    fn balance(state: &AppState, user: Uuid) -> i64 {
        state.ledger.wallet(user).unwrap().balance.cents()
    }

    #[tokio::test]
    async fn completion_releases_escrow_minus_fee() {
        let f = fixture(None);
        deliver(&f).await;
        let done = step(&f, OrderStatus::Completed).await.unwrap();

        let settlement = done.settlement.unwrap();
        assert_eq!(settlement.fee, Money::from_cents(1_000));
        assert_eq!(done.order.fee, Some(Money::from_cents(1_000)));
        assert!(done.order.completed_at.is_some());
        assert_eq!(balance(&f.state, f.seller), 9_000);
        assert!(f.state.ledger.escrow_for(f.order).is_none());
        assert!(f.state.ledger.reconcile().balanced);
    }

    #[tokio::test]
    async fn rejection_refunds_buyer() {
        let f = fixture(None);
        step(&f, OrderStatus::Rejected).await.unwrap();
        assert_eq!(balance(&f.state, f.buyer), 20_000);
        assert_eq!(f.state.orders.get(&f.order).unwrap().status, OrderStatus::Rejected);
    }

    #[tokio::test]
    async fn invalid_edge_changes_nothing() {
        let f = fixture(None);
        let err = step(&f, OrderStatus::Completed).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let order = f.state.orders.get(&f.order).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.history.is_empty());
        assert!(f.state.ledger.escrow_for(f.order).is_some());
    }

    #[tokio::test]
    async fn failed_prepare_leaves_order_untouched() {
        let f = fixture(None);
        let err = apply_order_transition(
            &f.state,
            f.order,
            OrderStatus::Cancelled,
            None,
            None,
            |_| Err(AppError::Forbidden("nope".into())),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert_eq!(f.state.orders.get(&f.order).unwrap().status, OrderStatus::Pending);
        assert_eq!(balance(&f.state, f.buyer), 10_000);
    }

    #[tokio::test]
    async fn second_settlement_is_refused() {
        let f = fixture(None);
        step(&f, OrderStatus::Cancelled).await.unwrap();
        assert!(step(&f, OrderStatus::Cancelled).await.is_err());
        assert_eq!(balance(&f.state, f.buyer), 20_000);
    }

    #[tokio::test]
    async fn transitions_notify_and_audit() {
        let f = fixture(None);
        apply_order_transition(
            &f.state,
            f.order,
            OrderStatus::InProgress,
            Some(f.seller),
            None,
            |_| Ok(()),
        )
        .await
        .unwrap();
        let to_buyer = f.state.notifications.filter(|n| n.user_id == f.buyer);
        assert_eq!(to_buyer.len(), 1);
        assert_eq!(to_buyer[0].kind, "order.in_progress");
        assert!(f.state.notifications.filter(|n| n.user_id == f.seller).is_empty());
        assert_eq!(f.state.audit.for_resource(f.order).len(), 1);
    }

    #[tokio::test]
    async fn referral_paid_once_per_referred_buyer() {
        let referrer = UserRecord::new_for_tests("referrer", Role::User);
        let f = fixture(Some(referrer.id));
        f.state.users.insert(referrer.id, referrer.clone());
        f.state.ledger.open_wallet(referrer.id);

        deliver(&f).await;
        let done = step(&f, OrderStatus::Completed).await.unwrap();
        assert_eq!(done.referral_paid, Some(Money::from_cents(500)));
        assert_eq!(balance(&f.state, referrer.id), 500);

        // A second order by the same buyer pays nothing more.
        let second = Uuid::new_v4();
        f.state
            .ledger
            .hold_for_order(f.buyer, second, Money::from_cents(5_000))
            .unwrap();
        let mut order = f.state.orders.get(&f.order).unwrap();
        order.id = second;
        order.status = OrderStatus::Delivered;
        order.history.clear();
        f.state.orders.insert(second, order);
        let again = apply_order_transition(
            &f.state,
            second,
            OrderStatus::Completed,
            None,
            None,
            |_| Ok(()),
        )
        .await
        .unwrap();
        assert_eq!(again.referral_paid, None);
        assert_eq!(balance(&f.state, referrer.id), 500);
        assert!(f.state.ledger.reconcile().balanced);
    }

    #[tokio::test]
    async fn sweep_completes_only_overdue_deliveries() {
        let f = fixture(None);
        deliver(&f).await;

        let report = auto_complete_sweep(&f.state, Utc::now()).await;
        assert_eq!(report, SweepReport::default());

        let later = Utc::now() + chrono::Duration::days(8);
        let report = auto_complete_sweep(&f.state, later).await;
        assert_eq!(report.due, 1);
        assert_eq!(report.completed, vec![f.order]);
        assert_eq!(f.state.orders.get(&f.order).unwrap().status, OrderStatus::Completed);
        assert_eq!(balance(&f.state, f.seller), 9_000);

        let history = f.state.orders.get(&f.order).unwrap().history;
        assert_eq!(history.last().unwrap().actor_id, None);
    }

    #[tokio::test]
    async fn sweep_ignores_disputed_orders() {
        let f = fixture(None);
        deliver(&f).await;
        step(&f, OrderStatus::Disputed).await.unwrap();
        let report = auto_complete_sweep(&f.state, Utc::now() + chrono::Duration::days(30)).await;
        assert_eq!(report.due, 0);
        assert_eq!(f.state.orders.get(&f.order).unwrap().status, OrderStatus::Disputed);
    }
}
