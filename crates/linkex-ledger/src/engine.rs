//! # Ledger Engine
//!
//! All ledger state sits behind one `parking_lot::Mutex`. Each public
//! operation takes the lock once, validates every precondition, and only
//! then mutates, so an operation either applies completely or not at all
//! and no two operations interleave.
//!
//! The lock is never held across `.await`; callers in async code invoke
//! these methods directly.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use linkex_core::Money;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::reconcile::{self, LedgerTotals, Reconciliation};
use crate::records::{
    EntryKind, EscrowHold, FeeRecord, FeeSource, HoldChange, LedgerEntry, LedgerParts, Posting,
    ReferralPayout, Settlement, Wallet, WithdrawalHold,
};
use crate::schedule::FeeSchedule;

#[derive(Debug, Default)]
struct LedgerInner {
    wallets: HashMap<Uuid, Wallet>,
    entries: Vec<LedgerEntry>,
    fees: Vec<FeeRecord>,
    escrow: HashMap<Uuid, EscrowHold>,
    withdrawals: HashMap<Uuid, WithdrawalHold>,
    /// Keyed by referred user.
    referrals: HashMap<Uuid, ReferralPayout>,
}

impl LedgerInner {
    fn wallet_mut(&mut self, user_id: Uuid) -> Result<&mut Wallet, LedgerError> {
        self.wallets
            .get_mut(&user_id)
            .ok_or(LedgerError::WalletNotFound(user_id))
    }

    fn push_entry(
        &mut self,
        wallet: &Wallet,
        kind: EntryKind,
        amount: Money,
        reference_id: Option<Uuid>,
        memo: impl Into<String>,
        now: DateTime<Utc>,
    ) -> LedgerEntry {
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            user_id: wallet.user_id,
            kind,
            amount,
            balance_after: wallet.balance,
            reference_id,
            memo: memo.into(),
            created_at: now,
        };
        self.entries.push(entry.clone());
        entry
    }

    fn push_fee(
        &mut self,
        source: FeeSource,
        reference_id: Uuid,
        payer_id: Uuid,
        gross: Money,
        fee: Money,
        now: DateTime<Utc>,
    ) -> FeeRecord {
        let record = FeeRecord {
            id: Uuid::new_v4(),
            source,
            reference_id,
            payer_id,
            gross,
            fee,
            created_at: now,
        };
        self.fees.push(record.clone());
        record
    }
}

fn require_positive(amount: Money) -> Result<(), LedgerError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(LedgerError::NonPositiveAmount(amount))
    }
}

fn add(a: Money, b: Money) -> Result<Money, LedgerError> {
    a.checked_add(b).ok_or(LedgerError::Overflow)
}

fn sub(a: Money, b: Money) -> Result<Money, LedgerError> {
    a.checked_sub(b).ok_or(LedgerError::Overflow)
}

/// The wallet ledger.
///
/// Share it between handlers as `Arc<Ledger>`.
#[derive(Debug, Default)]
pub struct Ledger {
    inner: Mutex<LedgerInner>,
}

impl Ledger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the ledger lock can be taken within `timeout`. Used by the
    /// readiness endpoint to detect a wedged ledger.
    pub fn responsive(&self, timeout: std::time::Duration) -> bool {
        self.inner.try_lock_for(timeout).is_some()
    }

    /// A ledger holding previously persisted records.
    pub fn from_parts(parts: LedgerParts) -> Self {
        let ledger = Self::new();
        ledger.restore(parts);
        ledger
    }

    /// Replace the entire contents with previously persisted records.
    pub fn restore(&self, parts: LedgerParts) {
        let inner = LedgerInner {
            wallets: parts.wallets.into_iter().map(|w| (w.user_id, w)).collect(),
            entries: parts.entries,
            fees: parts.fees,
            escrow: parts.escrow.into_iter().map(|h| (h.order_id, h)).collect(),
            withdrawals: parts
                .withdrawals
                .into_iter()
                .map(|h| (h.request_id, h))
                .collect(),
            referrals: parts
                .referrals
                .into_iter()
                .map(|r| (r.referred_id, r))
                .collect(),
        };
        *self.inner.lock() = inner;
    }

    // -- Mutations ------------------------------------------------------------

    /// Create an empty wallet for `user_id` if it has none. Returns the
    /// wallet either way.
    pub fn open_wallet(&self, user_id: Uuid) -> Wallet {
        self.inner
            .lock()
            .wallets
            .entry(user_id)
            .or_insert_with(|| Wallet::empty(user_id))
            .clone()
    }

    /// Credit an approved deposit.
    pub fn deposit(
        &self,
        user_id: Uuid,
        amount: Money,
        reference_id: Option<Uuid>,
        memo: &str,
    ) -> Result<Posting, LedgerError> {
        require_positive(amount)?;
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let wallet = inner.wallet_mut(user_id)?;
        let balance = add(wallet.balance, amount)?;
        let deposited = add(wallet.total_deposited, amount)?;
        wallet.balance = balance;
        wallet.total_deposited = deposited;
        wallet.updated_at = now;
        let wallet = wallet.clone();

        let entry = inner.push_entry(&wallet, EntryKind::Deposit, amount, reference_id, memo, now);
        tracing::info!(user_id = %user_id, amount = %amount, "deposit credited");
        Ok(Posting {
            wallets: vec![wallet],
            entries: vec![entry],
            ..Posting::default()
        })
    }

    /// Move `amount` from the buyer's balance into escrow for `order_id`.
    pub fn hold_for_order(
        &self,
        buyer_id: Uuid,
        order_id: Uuid,
        amount: Money,
    ) -> Result<Posting, LedgerError> {
        require_positive(amount)?;
        let now = Utc::now();
        let mut inner = self.inner.lock();

        if inner.escrow.contains_key(&order_id) {
            return Err(LedgerError::EscrowExists(order_id));
        }
        let wallet = inner.wallet_mut(buyer_id)?;
        if wallet.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                available: wallet.balance,
                requested: amount,
            });
        }
        let balance = sub(wallet.balance, amount)?;
        let spent = add(wallet.total_spent, amount)?;
        wallet.balance = balance;
        wallet.total_spent = spent;
        wallet.updated_at = now;
        let wallet = wallet.clone();

        let entry = inner.push_entry(
            &wallet,
            EntryKind::OrderPayment,
            amount.negate(),
            Some(order_id),
            "Order payment held in escrow",
            now,
        );
        let hold = EscrowHold {
            order_id,
            buyer_id,
            amount,
            created_at: now,
        };
        inner.escrow.insert(order_id, hold.clone());
        tracing::info!(order_id = %order_id, buyer_id = %buyer_id, amount = %amount, "escrow hold placed");
        Ok(Posting {
            wallets: vec![wallet],
            entries: vec![entry],
            hold: Some(HoldChange::EscrowPlaced(hold)),
            ..Posting::default()
        })
    }

    /// Release the escrow for `order_id` to the seller, less the order
    /// commission.
    pub fn release_to_seller(
        &self,
        order_id: Uuid,
        seller_id: Uuid,
        schedule: &FeeSchedule,
    ) -> Result<(Settlement, Posting), LedgerError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let gross = inner
            .escrow
            .get(&order_id)
            .map(|h| h.amount)
            .ok_or(LedgerError::EscrowNotFound(order_id))?;
        let fee = schedule.order_commission(gross)?;
        let seller_net = sub(gross, fee)?;

        let wallet = inner.wallet_mut(seller_id)?;
        let balance = add(wallet.balance, seller_net)?;
        let earned = add(wallet.total_earned, seller_net)?;
        wallet.balance = balance;
        wallet.total_earned = earned;
        wallet.updated_at = now;
        let wallet = wallet.clone();

        inner.escrow.remove(&order_id);
        let entry = inner.push_entry(
            &wallet,
            EntryKind::SaleProceeds,
            seller_net,
            Some(order_id),
            "Order completed",
            now,
        );
        let fee_record = fee.is_positive().then(|| {
            inner.push_fee(
                FeeSource::OrderCommission,
                order_id,
                seller_id,
                gross,
                fee,
                now,
            )
        });

        let settlement = Settlement {
            order_id,
            gross,
            fee,
            seller_net,
        };
        tracing::info!(
            order_id = %order_id,
            seller_id = %seller_id,
            gross = %gross,
            fee = %fee,
            "escrow released to seller"
        );
        Ok((
            settlement,
            Posting {
                wallets: vec![wallet],
                entries: vec![entry],
                fee: fee_record,
                hold: Some(HoldChange::EscrowCleared(order_id)),
                referral: None,
            },
        ))
    }

    /// Return the escrow for `order_id` to the buyer in full.
    pub fn refund_order(&self, order_id: Uuid) -> Result<Posting, LedgerError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let hold = inner
            .escrow
            .get(&order_id)
            .cloned()
            .ok_or(LedgerError::EscrowNotFound(order_id))?;
        let wallet = inner.wallet_mut(hold.buyer_id)?;
        let balance = add(wallet.balance, hold.amount)?;
        let spent = sub(wallet.total_spent, hold.amount)?;
        wallet.balance = balance;
        wallet.total_spent = spent;
        wallet.updated_at = now;
        let wallet = wallet.clone();

        inner.escrow.remove(&order_id);
        let entry = inner.push_entry(
            &wallet,
            EntryKind::OrderRefund,
            hold.amount,
            Some(order_id),
            "Order refunded",
            now,
        );
        tracing::info!(order_id = %order_id, buyer_id = %hold.buyer_id, amount = %hold.amount, "escrow refunded to buyer");
        Ok(Posting {
            wallets: vec![wallet],
            entries: vec![entry],
            hold: Some(HoldChange::EscrowCleared(order_id)),
            ..Posting::default()
        })
    }

    /// Move `amount` from balance to pending for withdrawal request
    /// `request_id`.
    pub fn hold_withdrawal(
        &self,
        user_id: Uuid,
        request_id: Uuid,
        amount: Money,
        schedule: &FeeSchedule,
    ) -> Result<Posting, LedgerError> {
        require_positive(amount)?;
        if amount < schedule.min_withdrawal {
            return Err(LedgerError::BelowMinimum {
                minimum: schedule.min_withdrawal,
                requested: amount,
            });
        }
        let now = Utc::now();
        let mut inner = self.inner.lock();

        if inner.withdrawals.contains_key(&request_id) {
            return Err(LedgerError::WithdrawalExists(request_id));
        }
        let wallet = inner.wallet_mut(user_id)?;
        if wallet.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                available: wallet.balance,
                requested: amount,
            });
        }
        let balance = sub(wallet.balance, amount)?;
        let pending = add(wallet.pending_withdrawal, amount)?;
        wallet.balance = balance;
        wallet.pending_withdrawal = pending;
        wallet.updated_at = now;
        let wallet = wallet.clone();

        let entry = inner.push_entry(
            &wallet,
            EntryKind::WithdrawalHold,
            amount.negate(),
            Some(request_id),
            "Withdrawal requested",
            now,
        );
        let hold = WithdrawalHold {
            request_id,
            user_id,
            amount,
            created_at: now,
        };
        inner.withdrawals.insert(request_id, hold.clone());
        Ok(Posting {
            wallets: vec![wallet],
            entries: vec![entry],
            hold: Some(HoldChange::WithdrawalPlaced(hold)),
            ..Posting::default()
        })
    }

    /// Pay out an approved withdrawal. Returns the net amount to send to
    /// the user after the withdrawal fee.
    pub fn finalize_withdrawal(
        &self,
        request_id: Uuid,
        schedule: &FeeSchedule,
    ) -> Result<(Money, Posting), LedgerError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let hold = inner
            .withdrawals
            .get(&request_id)
            .cloned()
            .ok_or(LedgerError::WithdrawalNotFound(request_id))?;
        let fee = schedule.withdrawal_fee(hold.amount)?;
        let net = sub(hold.amount, fee)?;

        let wallet = inner.wallet_mut(hold.user_id)?;
        let pending = sub(wallet.pending_withdrawal, hold.amount)?;
        if pending.is_negative() {
            return Err(LedgerError::Overflow);
        }
        let withdrawn = add(wallet.total_withdrawn, hold.amount)?;
        wallet.pending_withdrawal = pending;
        wallet.total_withdrawn = withdrawn;
        wallet.updated_at = now;
        let wallet = wallet.clone();

        inner.withdrawals.remove(&request_id);
        let fee_record = fee.is_positive().then(|| {
            inner.push_fee(
                FeeSource::WithdrawalFee,
                request_id,
                hold.user_id,
                hold.amount,
                fee,
                now,
            )
        });
        tracing::info!(request_id = %request_id, user_id = %hold.user_id, gross = %hold.amount, net = %net, "withdrawal finalized");
        Ok((
            net,
            Posting {
                wallets: vec![wallet],
                fee: fee_record,
                hold: Some(HoldChange::WithdrawalCleared(request_id)),
                ..Posting::default()
            },
        ))
    }

    /// Return a rejected withdrawal's held funds to the balance.
    pub fn reverse_withdrawal(&self, request_id: Uuid) -> Result<Posting, LedgerError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let hold = inner
            .withdrawals
            .get(&request_id)
            .cloned()
            .ok_or(LedgerError::WithdrawalNotFound(request_id))?;
        let wallet = inner.wallet_mut(hold.user_id)?;
        let pending = sub(wallet.pending_withdrawal, hold.amount)?;
        if pending.is_negative() {
            return Err(LedgerError::Overflow);
        }
        let balance = add(wallet.balance, hold.amount)?;
        wallet.pending_withdrawal = pending;
        wallet.balance = balance;
        wallet.updated_at = now;
        let wallet = wallet.clone();

        inner.withdrawals.remove(&request_id);
        let entry = inner.push_entry(
            &wallet,
            EntryKind::WithdrawalRelease,
            hold.amount,
            Some(request_id),
            "Withdrawal rejected, funds returned",
            now,
        );
        Ok(Posting {
            wallets: vec![wallet],
            entries: vec![entry],
            hold: Some(HoldChange::WithdrawalCleared(request_id)),
            ..Posting::default()
        })
    }

    /// Pay the referrer of `referred_id` a commission on `base`, once.
    ///
    /// Returns `Ok(None)` when a commission for this referred user was
    /// already paid, or when the commission rounds to zero.
    pub fn pay_referral(
        &self,
        referrer_id: Uuid,
        referred_id: Uuid,
        order_id: Uuid,
        base: Money,
        schedule: &FeeSchedule,
    ) -> Result<Option<Posting>, LedgerError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        if inner.referrals.contains_key(&referred_id) {
            return Ok(None);
        }
        let commission = schedule.referral_commission(base)?;
        if !commission.is_positive() {
            return Ok(None);
        }

        let wallet = inner.wallet_mut(referrer_id)?;
        let balance = add(wallet.balance, commission)?;
        let earned = add(wallet.total_earned, commission)?;
        wallet.balance = balance;
        wallet.total_earned = earned;
        wallet.updated_at = now;
        let wallet = wallet.clone();

        let entry = inner.push_entry(
            &wallet,
            EntryKind::ReferralCommission,
            commission,
            Some(order_id),
            "Referral commission",
            now,
        );
        let payout = ReferralPayout {
            referrer_id,
            referred_id,
            order_id,
            amount: commission,
            paid_at: now,
        };
        inner.referrals.insert(referred_id, payout.clone());
        tracing::info!(
            referrer_id = %referrer_id,
            referred_id = %referred_id,
            amount = %commission,
            "referral commission paid"
        );
        Ok(Some(Posting {
            wallets: vec![wallet],
            entries: vec![entry],
            referral: Some(payout),
            ..Posting::default()
        }))
    }

    /// Admin correction. `amount` may be negative but must be non-zero and
    /// may not take the balance below zero.
    pub fn adjust(&self, user_id: Uuid, amount: Money, memo: &str) -> Result<Posting, LedgerError> {
        if amount == Money::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let wallet = inner.wallet_mut(user_id)?;
        let balance = add(wallet.balance, amount)?;
        if balance.is_negative() {
            return Err(LedgerError::InsufficientFunds {
                available: wallet.balance,
                requested: amount.negate(),
            });
        }
        wallet.balance = balance;
        wallet.updated_at = now;
        let wallet = wallet.clone();

        let entry = inner.push_entry(&wallet, EntryKind::Adjustment, amount, None, memo, now);
        tracing::warn!(user_id = %user_id, amount = %amount, memo, "manual wallet adjustment");
        Ok(Posting {
            wallets: vec![wallet],
            entries: vec![entry],
            ..Posting::default()
        })
    }

    // -- Queries --------------------------------------------------------------

    /// Wallet for `user_id`.
    pub fn wallet(&self, user_id: Uuid) -> Option<Wallet> {
        self.inner.lock().wallets.get(&user_id).cloned()
    }

    /// All wallets.
    pub fn wallets(&self) -> Vec<Wallet> {
        self.inner.lock().wallets.values().cloned().collect()
    }

    /// Entries for `user_id`, newest first.
    pub fn entries_for(&self, user_id: Uuid) -> Vec<LedgerEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Fee records, newest first.
    pub fn fee_records(&self) -> Vec<FeeRecord> {
        self.inner.lock().fees.iter().rev().cloned().collect()
    }

    /// Open escrow hold for `order_id`.
    pub fn escrow_for(&self, order_id: Uuid) -> Option<EscrowHold> {
        self.inner.lock().escrow.get(&order_id).cloned()
    }

    /// Open withdrawal hold for `request_id`.
    pub fn withdrawal_hold(&self, request_id: Uuid) -> Option<WithdrawalHold> {
        self.inner.lock().withdrawals.get(&request_id).cloned()
    }

    /// Commissions paid to `referrer_id`, newest first.
    pub fn referral_payouts_for(&self, referrer_id: Uuid) -> Vec<ReferralPayout> {
        let mut payouts: Vec<ReferralPayout> = self
            .inner
            .lock()
            .referrals
            .values()
            .filter(|p| p.referrer_id == referrer_id)
            .cloned()
            .collect();
        payouts.sort_by(|a, b| b.paid_at.cmp(&a.paid_at));
        payouts
    }

    /// Whether a commission has been paid for `referred_id`.
    pub fn referral_paid_for(&self, referred_id: Uuid) -> bool {
        self.inner.lock().referrals.contains_key(&referred_id)
    }

    /// Headline aggregates.
    pub fn totals(&self) -> LedgerTotals {
        let inner = self.inner.lock();
        reconcile::totals(
            inner.wallets.values(),
            inner.escrow.values(),
            inner.withdrawals.values(),
            &inner.fees,
            inner.referrals.values(),
        )
    }

    /// Check the conservation identity and every wallet's balance against
    /// its entries.
    pub fn reconcile(&self) -> Reconciliation {
        let inner = self.inner.lock();
        let report = reconcile::reconcile(
            inner.wallets.values(),
            &inner.entries,
            &inner.fees,
            inner.escrow.values(),
            inner.withdrawals.values(),
        );
        if !report.balanced {
            tracing::error!(
                held = %report.held,
                expected = %report.expected,
                mismatches = report.wallet_mismatches.len(),
                "ledger reconciliation failed"
            );
        }
        report
    }
}
