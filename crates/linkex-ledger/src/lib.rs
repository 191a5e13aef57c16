#![deny(missing_docs)]

//! # linkex-ledger — Wallet Ledger
//!
//! Bookkeeping for marketplace money. Buyers deposit into a wallet, order
//! payments move into escrow, completed orders release escrow to the seller
//! less the platform commission, and withdrawals are held until an admin
//! approves or rejects them.
//!
//! Every mutation goes through [`Ledger`], which serializes operations
//! under a single lock and returns a [`Posting`] describing exactly which
//! records changed. [`Ledger::reconcile`] checks the conservation identity
//! documented in [`reconcile`].
//!
//! Amounts are [`linkex_core::Money`] cents throughout.

pub mod engine;
pub mod error;
pub mod reconcile;
pub mod records;
pub mod schedule;

pub use engine::Ledger;
pub use error::LedgerError;
pub use reconcile::{LedgerTotals, Reconciliation, WalletMismatch};
pub use records::{
    EntryKind, EscrowHold, FeeRecord, FeeSource, HoldChange, LedgerEntry, LedgerParts, Posting,
    ReferralPayout, Settlement, Wallet, WithdrawalHold,
};
pub use schedule::FeeSchedule;
