//! # Error Hierarchy
//!
//! Structured error types shared by every crate in the workspace, built with
//! `thiserror`. Each validation failure carries the offending input so that
//! API responses and logs are actionable without a debugger.

use thiserror::Error;

/// Top-level error type for the Linkex domain crates.
#[derive(Error, Debug)]
pub enum LinkexError {
    /// Domain primitive validation failure.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Arithmetic on money overflowed the representable range.
    #[error("money overflow: {0}")]
    MoneyOverflow(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Validation errors for domain primitive newtypes.
///
/// Each primitive enforces its format at construction time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Money string is not a non-negative decimal with at most two places.
    #[error("invalid amount: \"{0}\" (expected a non-negative decimal with at most 2 places, e.g. 12.50)")]
    InvalidAmount(String),

    /// Email address fails basic syntax checks.
    #[error("invalid email address: \"{0}\"")]
    InvalidEmail(String),

    /// Username is too short, too long, or contains disallowed characters.
    #[error("invalid username: \"{0}\" (expected 3-32 characters of A-Z, a-z, 0-9, '_' or '-')")]
    InvalidUsername(String),

    /// Site domain is not a valid public hostname.
    #[error("invalid site domain: \"{0}\"")]
    InvalidDomain(String),

    /// Referral code is not 8 uppercase alphanumeric characters.
    #[error("invalid referral code: \"{0}\" (expected 8 uppercase alphanumeric characters)")]
    InvalidReferralCode(String),

    /// URL is not an absolute http(s) URL.
    #[error("invalid URL: \"{0}\" (expected http:// or https://)")]
    InvalidUrl(String),

    /// Free-text field is empty or exceeds its length limit.
    #[error("field '{field}' must be between {min} and {max} characters")]
    TextLength {
        /// Name of the offending field.
        field: &'static str,
        /// Minimum length in characters.
        min: usize,
        /// Maximum length in characters.
        max: usize,
    },
}
