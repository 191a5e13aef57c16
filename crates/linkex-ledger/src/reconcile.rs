//! # Reconciliation
//!
//! Recomputes ledger aggregates from the raw records and checks the
//! conservation identity:
//!
//! ```text
//! Σ balance + Σ pending_withdrawal + Σ escrow
//!   = Σ DEPOSIT + Σ ADJUSTMENT + Σ REFERRAL_COMMISSION
//!     − Σ finalized withdrawal gross − Σ ORDER_COMMISSION fees
//! ```
//!
//! It also replays each wallet's entries and compares the result with the
//! stored balance, and compares each wallet's `pending_withdrawal` with its
//! open withdrawal holds.
//!
//! Sums are accumulated in `i128` so a corrupted record cannot overflow the
//! report itself.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use linkex_core::Money;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::records::{
    EntryKind, EscrowHold, FeeRecord, FeeSource, LedgerEntry, ReferralPayout, Wallet,
    WithdrawalHold,
};

/// Headline figures for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    /// Number of wallets.
    pub wallets: usize,
    /// Σ spendable balance.
    pub balance: Money,
    /// Σ funds held for withdrawals.
    pub pending_withdrawal: Money,
    /// Σ funds held in order escrow.
    pub escrow: Money,
    /// Open escrow holds.
    pub open_escrow_holds: usize,
    /// Withdrawals awaiting a decision.
    pub open_withdrawal_holds: usize,
    /// Σ fees of every source.
    pub fee_revenue: Money,
    /// Σ referral commissions paid.
    pub referral_paid: Money,
    /// Σ approved deposits.
    pub deposited: Money,
    /// Σ finalized withdrawals (gross).
    pub withdrawn: Money,
}

/// A wallet whose stored figures disagree with its records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletMismatch {
    /// Wallet owner.
    pub user_id: Uuid,
    /// Stored balance.
    pub recorded_balance: Money,
    /// Balance obtained by summing the wallet's entries.
    pub replayed_balance: Money,
    /// Stored pending withdrawal.
    pub recorded_pending: Money,
    /// Σ open withdrawal holds for the user.
    pub held_pending: Money,
}

/// Result of [`Ledger::reconcile`](crate::Ledger::reconcile).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// `true` when the identity holds and no wallet mismatches.
    pub balanced: bool,
    /// Left side: Σ balance + Σ pending + Σ escrow.
    pub held: Money,
    /// Right side: inflows minus outflows.
    pub expected: Money,
    /// Σ balance.
    pub total_balance: Money,
    /// Σ pending withdrawal.
    pub total_pending_withdrawal: Money,
    /// Σ escrow.
    pub total_escrow: Money,
    /// Σ DEPOSIT entries.
    pub deposits: Money,
    /// Σ ADJUSTMENT entries.
    pub adjustments: Money,
    /// Σ REFERRAL_COMMISSION entries.
    pub referral_commissions: Money,
    /// Σ finalized withdrawal gross.
    pub withdrawals_finalized: Money,
    /// Σ ORDER_COMMISSION fees.
    pub order_fees: Money,
    /// Wallets whose stored figures disagree with their records.
    pub wallet_mismatches: Vec<WalletMismatch>,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

fn sum(amounts: impl Iterator<Item = Money>) -> i128 {
    amounts.map(|m| i128::from(m.cents())).sum()
}

fn clamp(value: i128) -> Money {
    let cents = i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX });
    Money::from_cents(cents)
}

fn entries_of(entries: &[LedgerEntry], kind: EntryKind) -> i128 {
    sum(entries.iter().filter(|e| e.kind == kind).map(|e| e.amount))
}

pub(crate) fn totals<'a>(
    wallets: impl Iterator<Item = &'a Wallet>,
    escrow: impl Iterator<Item = &'a EscrowHold>,
    withdrawals: impl Iterator<Item = &'a WithdrawalHold>,
    fees: &[FeeRecord],
    referrals: impl Iterator<Item = &'a ReferralPayout>,
) -> LedgerTotals {
    let (mut count, mut balance, mut pending, mut deposited, mut withdrawn) = (0, 0, 0, 0, 0);
    for w in wallets {
        count += 1;
        balance += i128::from(w.balance.cents());
        pending += i128::from(w.pending_withdrawal.cents());
        deposited += i128::from(w.total_deposited.cents());
        withdrawn += i128::from(w.total_withdrawn.cents());
    }
    let escrow: Vec<&EscrowHold> = escrow.collect();
    let withdrawals = withdrawals.count();

    LedgerTotals {
        wallets: count,
        balance: clamp(balance),
        pending_withdrawal: clamp(pending),
        escrow: clamp(sum(escrow.iter().map(|h| h.amount))),
        open_escrow_holds: escrow.len(),
        open_withdrawal_holds: withdrawals,
        fee_revenue: clamp(sum(fees.iter().map(|f| f.fee))),
        referral_paid: clamp(sum(referrals.map(|r| r.amount))),
        deposited: clamp(deposited),
        withdrawn: clamp(withdrawn),
    }
}

pub(crate) fn reconcile<'a>(
    wallets: impl Iterator<Item = &'a Wallet>,
    entries: &[LedgerEntry],
    fees: &[FeeRecord],
    escrow: impl Iterator<Item = &'a EscrowHold>,
    withdrawals: impl Iterator<Item = &'a WithdrawalHold>,
) -> Reconciliation {
    let mut replayed: HashMap<Uuid, i128> = HashMap::new();
    for e in entries {
        *replayed.entry(e.user_id).or_default() += i128::from(e.amount.cents());
    }
    let mut held_pending: HashMap<Uuid, i128> = HashMap::new();
    for h in withdrawals {
        *held_pending.entry(h.user_id).or_default() += i128::from(h.amount.cents());
    }

    let (mut balance, mut pending, mut finalized) = (0i128, 0i128, 0i128);
    let mut wallet_mismatches = Vec::new();
    for w in wallets {
        balance += i128::from(w.balance.cents());
        pending += i128::from(w.pending_withdrawal.cents());
        finalized += i128::from(w.total_withdrawn.cents());

        let replayed_balance = replayed.get(&w.user_id).copied().unwrap_or(0);
        let user_held = held_pending.get(&w.user_id).copied().unwrap_or(0);
        if replayed_balance != i128::from(w.balance.cents())
            || user_held != i128::from(w.pending_withdrawal.cents())
        {
            wallet_mismatches.push(WalletMismatch {
                user_id: w.user_id,
                recorded_balance: w.balance,
                replayed_balance: clamp(replayed_balance),
                recorded_pending: w.pending_withdrawal,
                held_pending: clamp(user_held),
            });
        }
    }
    wallet_mismatches.sort_by_key(|m| m.user_id);

    let escrow = sum(escrow.map(|h| h.amount));
    let deposits = entries_of(entries, EntryKind::Deposit);
    let adjustments = entries_of(entries, EntryKind::Adjustment);
    let referral_commissions = entries_of(entries, EntryKind::ReferralCommission);
    let order_fees = sum(
        fees.iter()
            .filter(|f| f.source == FeeSource::OrderCommission)
            .map(|f| f.fee),
    );

    let held = balance + pending + escrow;
    let expected = deposits + adjustments + referral_commissions - finalized - order_fees;

    Reconciliation {
        balanced: held == expected && wallet_mismatches.is_empty(),
        held: clamp(held),
        expected: clamp(expected),
        total_balance: clamp(balance),
        total_pending_withdrawal: clamp(pending),
        total_escrow: clamp(escrow),
        deposits: clamp(deposits),
        adjustments: clamp(adjustments),
        referral_commissions: clamp(referral_commissions),
        withdrawals_finalized: clamp(finalized),
        order_fees: clamp(order_fees),
        wallet_mismatches,
        checked_at: Utc::now(),
    }
}
