//! # Ledger Records
//!
//! The plain data the engine keeps: wallets, the append-only entry log,
//! fee records, escrow and withdrawal holds, and referral payouts. Every
//! record is `Serialize + Deserialize` so the API layer can return it
//! directly and persist it row-for-row.

use chrono::{DateTime, Utc};
use linkex_core::Money;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user's wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Owner.
    pub user_id: Uuid,
    /// Spendable balance. Never negative.
    pub balance: Money,
    /// Funds held for withdrawals awaiting approval.
    pub pending_withdrawal: Money,
    /// Lifetime approved deposits.
    pub total_deposited: Money,
    /// Lifetime finalized withdrawals (gross, before fees).
    pub total_withdrawn: Money,
    /// Lifetime sale proceeds and referral commissions.
    pub total_earned: Money,
    /// Lifetime order payments net of refunds.
    pub total_spent: Money,
    /// Last mutation.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// An empty wallet.
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            balance: Money::ZERO,
            pending_withdrawal: Money::ZERO,
            total_deposited: Money::ZERO,
            total_withdrawn: Money::ZERO,
            total_earned: Money::ZERO,
            total_spent: Money::ZERO,
            updated_at: Utc::now(),
        }
    }
}

/// Kind of balance movement recorded by a [`LedgerEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    /// Approved deposit (credit).
    Deposit,
    /// Order price moved into escrow (debit).
    OrderPayment,
    /// Escrow returned to the buyer (credit).
    OrderRefund,
    /// Escrow released to the seller, net of commission (credit).
    SaleProceeds,
    /// Withdrawal amount moved to pending (debit).
    WithdrawalHold,
    /// Rejected withdrawal returned to balance (credit).
    WithdrawalRelease,
    /// Referral commission (credit).
    ReferralCommission,
    /// Admin correction (either sign).
    Adjustment,
}

impl EntryKind {
    /// Every kind.
    pub const ALL: [EntryKind; 8] = [
        Self::Deposit,
        Self::OrderPayment,
        Self::OrderRefund,
        Self::SaleProceeds,
        Self::WithdrawalHold,
        Self::WithdrawalRelease,
        Self::ReferralCommission,
        Self::Adjustment,
    ];

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::OrderPayment => "ORDER_PAYMENT",
            Self::OrderRefund => "ORDER_REFUND",
            Self::SaleProceeds => "SALE_PROCEEDS",
            Self::WithdrawalHold => "WITHDRAWAL_HOLD",
            Self::WithdrawalRelease => "WITHDRAWAL_RELEASE",
            Self::ReferralCommission => "REFERRAL_COMMISSION",
            Self::Adjustment => "ADJUSTMENT",
        }
    }

    /// Parse a canonical name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a wallet's transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry id.
    pub id: Uuid,
    /// Wallet owner.
    pub user_id: Uuid,
    /// Movement kind.
    pub kind: EntryKind,
    /// Signed change to the balance.
    pub amount: Money,
    /// Balance immediately after this entry.
    pub balance_after: Money,
    /// Order, funding request, or referred user this entry belongs to.
    pub reference_id: Option<Uuid>,
    /// Human-readable description.
    pub memo: String,
    /// When the entry was posted.
    pub created_at: DateTime<Utc>,
}

/// Where a platform fee came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeSource {
    /// Commission on a completed order.
    OrderCommission,
    /// Fee on an approved withdrawal.
    WithdrawalFee,
}

impl FeeSource {
    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderCommission => "ORDER_COMMISSION",
            Self::WithdrawalFee => "WITHDRAWAL_FEE",
        }
    }

    /// Parse a canonical name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ORDER_COMMISSION" => Some(Self::OrderCommission),
            "WITHDRAWAL_FEE" => Some(Self::WithdrawalFee),
            _ => None,
        }
    }
}

/// Platform revenue captured from one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRecord {
    /// Record id.
    pub id: Uuid,
    /// Fee origin.
    pub source: FeeSource,
    /// Order or funding request id.
    pub reference_id: Uuid,
    /// User whose proceeds or payout the fee was taken from.
    pub payer_id: Uuid,
    /// Amount the fee was computed on.
    pub gross: Money,
    /// Fee taken.
    pub fee: Money,
    /// When the fee was recorded.
    pub created_at: DateTime<Utc>,
}

/// Buyer funds held for an open order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowHold {
    /// Order the funds are held for.
    pub order_id: Uuid,
    /// Buyer the funds came from.
    pub buyer_id: Uuid,
    /// Held amount.
    pub amount: Money,
    /// When the hold was placed.
    pub created_at: DateTime<Utc>,
}

/// Funds held for a withdrawal request awaiting approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalHold {
    /// Funding request id.
    pub request_id: Uuid,
    /// Requesting user.
    pub user_id: Uuid,
    /// Gross amount held.
    pub amount: Money,
    /// When the hold was placed.
    pub created_at: DateTime<Utc>,
}

/// Outcome of releasing an escrow to the seller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Settled order.
    pub order_id: Uuid,
    /// Escrowed amount.
    pub gross: Money,
    /// Platform commission.
    pub fee: Money,
    /// Amount credited to the seller.
    pub seller_net: Money,
}

/// A referral commission paid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralPayout {
    /// User who referred.
    pub referrer_id: Uuid,
    /// Referred user. At most one payout per referred user.
    pub referred_id: Uuid,
    /// Order whose completion triggered the payout.
    pub order_id: Uuid,
    /// Commission credited.
    pub amount: Money,
    /// When the commission was paid.
    pub paid_at: DateTime<Utc>,
}

/// Change to the set of open holds caused by one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldChange {
    /// A new escrow hold was placed.
    EscrowPlaced(EscrowHold),
    /// The escrow hold for this order was removed.
    EscrowCleared(Uuid),
    /// A new withdrawal hold was placed.
    WithdrawalPlaced(WithdrawalHold),
    /// The withdrawal hold for this request was removed.
    WithdrawalCleared(Uuid),
}

/// Every record an operation created or changed.
///
/// The API layer writes a posting through to the database after the
/// in-memory ledger has committed it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Posting {
    /// Wallets in their post-operation state.
    pub wallets: Vec<Wallet>,
    /// New log entries.
    pub entries: Vec<LedgerEntry>,
    /// Fee recorded, if any.
    pub fee: Option<FeeRecord>,
    /// Hold placed or cleared, if any.
    pub hold: Option<HoldChange>,
    /// Referral payout recorded, if any.
    pub referral: Option<ReferralPayout>,
}

/// Complete ledger contents, used to restore the engine on startup.
#[derive(Debug, Clone, Default)]
pub struct LedgerParts {
    /// All wallets.
    pub wallets: Vec<Wallet>,
    /// All log entries, in posting order.
    pub entries: Vec<LedgerEntry>,
    /// All fee records.
    pub fees: Vec<FeeRecord>,
    /// Open escrow holds.
    pub escrow: Vec<EscrowHold>,
    /// Open withdrawal holds.
    pub withdrawals: Vec<WithdrawalHold>,
    /// All referral payouts.
    pub referrals: Vec<ReferralPayout>,
}
