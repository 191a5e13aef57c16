//! # Account Identity Newtypes
//!
//! Validated primitives that identify a marketplace account: [`Email`],
//! [`Username`], and the shareable [`ReferralCode`]. Each is validated once
//! at construction; downstream code never re-checks the format.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ValidationError;

/// Normalized email address (trimmed, lowercased).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// Validate and normalize an email address.
    ///
    /// Requires exactly one `@`, a non-empty local part, and a domain that
    /// contains a dot and no whitespace. Limited to 254 characters.
    pub fn new(input: impl AsRef<str>) -> Result<Self, ValidationError> {
        let raw = input.as_ref();
        let s = raw.trim().to_ascii_lowercase();
        let invalid = || ValidationError::InvalidEmail(raw.to_string());

        if s.is_empty() || s.len() > 254 || s.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        let mut parts = s.split('@');
        let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
            (Some(l), Some(d), None) => (l, d),
            _ => return Err(invalid()),
        };
        if local.is_empty() || domain.len() < 3 || !domain.contains('.') {
            return Err(invalid());
        }
        if domain.starts_with('.') || domain.ends_with('.') || domain.contains("..") {
            return Err(invalid());
        }
        Ok(Self(s))
    }

    /// The normalized address.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Email {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Email> for String {
    fn from(value: Email) -> Self {
        value.0
    }
}

impl std::fmt::Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Public account handle.
///
/// Case is preserved for display; uniqueness checks compare
/// [`Username::canonical`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Validate a username: 3-32 characters of `[A-Za-z0-9_-]`.
    pub fn new(input: impl AsRef<str>) -> Result<Self, ValidationError> {
        let s = input.as_ref().trim();
        let ok_len = (3..=32).contains(&s.chars().count());
        let ok_chars = s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if ok_len && ok_chars {
            Ok(Self(s.to_string()))
        } else {
            Err(ValidationError::InvalidUsername(input.as_ref().to_string()))
        }
    }

    /// The username as entered.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased form used for uniqueness comparisons.
    pub fn canonical(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl TryFrom<String> for Username {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

impl std::fmt::Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Eight-character referral code handed out to every account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReferralCode(String);

impl ReferralCode {
    /// Length of every referral code.
    pub const LEN: usize = 8;

    /// Derive the referral code for a user id.
    ///
    /// The first eight hex characters of `SHA-256(uuid)`, uppercased, so the
    /// code is stable across restarts without being stored separately.
    pub fn for_user(user_id: &Uuid) -> Self {
        let digest = Sha256::digest(user_id.as_bytes());
        let hex: String = digest
            .iter()
            .take(Self::LEN / 2)
            .map(|b| format!("{b:02X}"))
            .collect();
        Self(hex)
    }

    /// Parse a user-supplied code. Lowercase input is accepted and uppercased.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, ValidationError> {
        let s = input.as_ref().trim().to_ascii_uppercase();
        if s.len() == Self::LEN && s.chars().all(|c| c.is_ascii_alphanumeric()) {
            Ok(Self(s))
        } else {
            Err(ValidationError::InvalidReferralCode(
                input.as_ref().to_string(),
            ))
        }
    }

    /// The code string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ReferralCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ReferralCode> for String {
    fn from(value: ReferralCode) -> Self {
        value.0
    }
}

impl std::fmt::Display for ReferralCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
