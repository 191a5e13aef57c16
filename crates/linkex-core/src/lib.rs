#![deny(missing_docs)]

//! # linkex-core — Foundational Types for the Linkex Marketplace
//!
//! Every other crate in the workspace depends on this one. It has no internal
//! crate dependencies.
//!
//! ## Design Principles
//!
//! 1. **Integer money.** [`Money`] is a cent count. Fees are computed in
//!    basis points with half-up rounding; no `f64` ever reaches a balance.
//!
//! 2. **Validated newtypes.** [`Email`], [`Username`], [`SiteDomain`] and
//!    [`ReferralCode`] validate at construction (including serde
//!    deserialization), so handlers receive values that are already normal.
//!
//! 3. **[`LinkexError`] hierarchy.** Structured errors with `thiserror`.

pub mod error;
pub mod identity;
pub mod money;
pub mod web;

pub use error::{LinkexError, ValidationError};
pub use identity::{Email, ReferralCode, Username};
pub use money::{Money, BPS_DENOMINATOR};
pub use web::{validate_http_url, validate_text, SiteDomain};
