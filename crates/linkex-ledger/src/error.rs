//! Ledger errors.

use linkex_core::Money;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by [`Ledger`](crate::Ledger) operations.
///
/// Every failing operation leaves the ledger exactly as it was.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The user has no wallet.
    #[error("wallet not found for user {0}")]
    WalletNotFound(Uuid),

    /// Balance too low for the requested debit.
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Spendable balance at the time of the request.
        available: Money,
        /// Amount the operation tried to debit.
        requested: Money,
    },

    /// Amounts must be strictly positive (adjustments must be non-zero).
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Money),

    /// Amount is below the configured minimum for this operation.
    #[error("amount {requested} is below the minimum of {minimum}")]
    BelowMinimum {
        /// Configured minimum.
        minimum: Money,
        /// Requested amount.
        requested: Money,
    },

    /// No escrow hold exists for the order.
    #[error("no escrow hold for order {0}")]
    EscrowNotFound(Uuid),

    /// The order already has an escrow hold.
    #[error("order {0} already has an escrow hold")]
    EscrowExists(Uuid),

    /// No pending withdrawal exists for the request.
    #[error("no pending withdrawal for request {0}")]
    WithdrawalNotFound(Uuid),

    /// The request already has a pending withdrawal.
    #[error("request {0} already has a pending withdrawal")]
    WithdrawalExists(Uuid),

    /// Arithmetic exceeded the representable range.
    #[error("ledger arithmetic overflow")]
    Overflow,

    /// Fee schedule failed validation.
    #[error("invalid fee schedule: {0}")]
    InvalidSchedule(String),
}
