//! Property and concurrency tests for the ledger conservation identity.

use std::sync::Arc;
use std::thread;

use linkex_core::Money;
use linkex_ledger::{FeeSchedule, Ledger, LedgerError};
use proptest::prelude::*;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Op {
    Deposit { user: usize, cents: i64 },
    PlaceOrder { buyer: usize, seller: usize, cents: i64 },
    Complete { order: usize },
    Refund { order: usize },
    RequestWithdrawal { user: usize, cents: i64 },
    ApproveWithdrawal { request: usize },
    RejectWithdrawal { request: usize },
    Referral { referrer: usize, referred: usize, cents: i64 },
    Adjust { user: usize, cents: i64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..4usize, 1..50_000i64).prop_map(|(user, cents)| Op::Deposit { user, cents }),
        (0..4usize, 0..4usize, 1..20_000i64)
            .prop_map(|(buyer, seller, cents)| Op::PlaceOrder { buyer, seller, cents }),
        (0..16usize).prop_map(|order| Op::Complete { order }),
        (0..16usize).prop_map(|order| Op::Refund { order }),
        (0..4usize, 1..20_000i64).prop_map(|(user, cents)| Op::RequestWithdrawal { user, cents }),
        (0..16usize).prop_map(|request| Op::ApproveWithdrawal { request }),
        (0..16usize).prop_map(|request| Op::RejectWithdrawal { request }),
        (0..4usize, 0..4usize, 1..20_000i64)
            .prop_map(|(referrer, referred, cents)| Op::Referral { referrer, referred, cents }),
        (0..4usize, -5_000..5_000i64).prop_map(|(user, cents)| Op::Adjust { user, cents }),
    ]
}

proptest! {
    #[test]
    fn any_operation_sequence_stays_balanced(
        ops in prop::collection::vec(op(), 1..80),
        commission in 0u32..=10_000,
        withdrawal_fee in 0u32..=10_000,
    ) {
        let ledger = Ledger::new();
        let schedule = FeeSchedule {
            order_commission_bps: commission,
            withdrawal_fee_bps: withdrawal_fee,
            ..FeeSchedule::default()
        };
        let users: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for u in &users {
            ledger.open_wallet(*u);
        }
        let mut orders: Vec<(Uuid, Uuid)> = Vec::new();
        let mut requests: Vec<Uuid> = Vec::new();

        for op in ops {
            // Failures are expected (insufficient funds, already settled);
            // the property is that they never break the books.
            match op {
                Op::Deposit { user, cents } => {
                    let _ = ledger.deposit(users[user], Money::from_cents(cents), None, "deposit");
                }
                Op::PlaceOrder { buyer, seller, cents } => {
                    let order = Uuid::new_v4();
                    if ledger.hold_for_order(users[buyer], order, Money::from_cents(cents)).is_ok() {
                        orders.push((order, users[seller]));
                    }
                }
                Op::Complete { order } => {
                    if let Some((id, seller)) = orders.get(order) {
                        let _ = ledger.release_to_seller(*id, *seller, &schedule);
                    }
                }
                Op::Refund { order } => {
                    if let Some((id, _)) = orders.get(order) {
                        let _ = ledger.refund_order(*id);
                    }
                }
                Op::RequestWithdrawal { user, cents } => {
                    let request = Uuid::new_v4();
                    if ledger
                        .hold_withdrawal(users[user], request, Money::from_cents(cents), &schedule)
                        .is_ok()
                    {
                        requests.push(request);
                    }
                }
                Op::ApproveWithdrawal { request } => {
                    if let Some(id) = requests.get(request) {
                        let _ = ledger.finalize_withdrawal(*id, &schedule);
                    }
                }
                Op::RejectWithdrawal { request } => {
                    if let Some(id) = requests.get(request) {
                        let _ = ledger.reverse_withdrawal(*id);
                    }
                }
                Op::Referral { referrer, referred, cents } => {
                    let _ = ledger.pay_referral(
                        users[referrer],
                        users[referred],
                        Uuid::new_v4(),
                        Money::from_cents(cents),
                        &schedule,
                    );
                }
                Op::Adjust { user, cents } => {
                    let _ = ledger.adjust(users[user], Money::from_cents(cents), "correction");
                }
            }

            for w in ledger.wallets() {
                prop_assert!(!w.balance.is_negative());
                prop_assert!(!w.pending_withdrawal.is_negative());
            }
        }

        let report = ledger.reconcile();
        prop_assert!(report.balanced, "unbalanced: {:?}", report);
        prop_assert_eq!(report.held, report.expected);
    }
}

#[test]
fn concurrent_orders_never_overspend() {
    let ledger = Arc::new(Ledger::new());
    let buyer = Uuid::new_v4();
    ledger.open_wallet(buyer);
    ledger
        .deposit(buyer, Money::from_cents(10_000), None, "deposit")
        .unwrap();

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                ledger.hold_for_order(buyer, Uuid::new_v4(), Money::from_cents(1_000))
            })
        })
        .collect();

    let mut placed = 0;
    let mut refused = 0;
    for h in handles {
        match h.join().unwrap() {
            Ok(_) => placed += 1,
            Err(LedgerError::InsufficientFunds { .. }) => refused += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(placed, 10);
    assert_eq!(refused, 22);
    assert_eq!(ledger.wallet(buyer).unwrap().balance, Money::ZERO);
    assert!(ledger.reconcile().balanced);
}

#[test]
fn concurrent_settlement_releases_once() {
    let ledger = Arc::new(Ledger::new());
    let buyer = Uuid::new_v4();
    let seller = Uuid::new_v4();
    ledger.open_wallet(buyer);
    ledger.open_wallet(seller);
    ledger
        .deposit(buyer, Money::from_cents(5_000), None, "deposit")
        .unwrap();
    let order = Uuid::new_v4();
    ledger
        .hold_for_order(buyer, order, Money::from_cents(5_000))
        .unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                if i % 2 == 0 {
                    ledger
                        .release_to_seller(order, seller, &FeeSchedule::default())
                        .map(|_| ())
                } else {
                    ledger.refund_order(order).map(|_| ())
                }
            })
        })
        .collect();

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(Result::is_ok)
        .count();
    assert_eq!(successes, 1);
    assert!(ledger.reconcile().balanced);
}
