//! # Web Primitives
//!
//! [`SiteDomain`] normalizes whatever a seller pastes ("https://www.Blog.io/about")
//! into the bare hostname used for uniqueness checks. [`validate_http_url`]
//! and [`validate_text`] cover the free-form fields on listings, orders and
//! tickets.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A normalized public hostname identifying a website.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SiteDomain(String);

impl SiteDomain {
    /// Normalize and validate a site domain.
    ///
    /// Strips scheme, leading `www.`, port, path, query and fragment, then
    /// lowercases. Each label must be 1-63 characters of `[a-z0-9-]` not
    /// starting or ending with `-`; at least two labels; at most 253 chars.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, ValidationError> {
        let raw = input.as_ref();
        let invalid = || ValidationError::InvalidDomain(raw.to_string());

        let mut s = raw.trim().to_ascii_lowercase();
        for scheme in ["https://", "http://"] {
            if let Some(rest) = s.strip_prefix(scheme) {
                s = rest.to_string();
                break;
            }
        }
        let host_end = s.find(['/', '?', '#']).unwrap_or(s.len());
        s.truncate(host_end);
        if let Some(colon) = s.find(':') {
            s.truncate(colon);
        }
        let s = s.trim_end_matches('.');
        let s = s.strip_prefix("www.").unwrap_or(s);

        if s.is_empty() || s.len() > 253 {
            return Err(invalid());
        }
        let labels: Vec<&str> = s.split('.').collect();
        if labels.len() < 2 {
            return Err(invalid());
        }
        for label in &labels {
            let ok = !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
            if !ok {
                return Err(invalid());
            }
        }
        // The top-level label is never all digits; this rejects bare IPv4.
        if labels
            .last()
            .map(|tld| tld.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(true)
        {
            return Err(invalid());
        }
        Ok(Self(s.to_string()))
    }

    /// The normalized hostname.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SiteDomain {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SiteDomain> for String {
    fn from(value: SiteDomain) -> Self {
        value.0
    }
}

impl std::fmt::Display for SiteDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check that `url` is an absolute `http`/`https` URL with a valid host.
///
/// Returns the trimmed URL.
pub fn validate_http_url(url: &str) -> Result<String, ValidationError> {
    let trimmed = url.trim();
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .ok_or_else(|| ValidationError::InvalidUrl(url.to_string()))?;
    if trimmed.len() > 2048 || rest.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidUrl(url.to_string()));
    }
    SiteDomain::parse(rest).map_err(|_| ValidationError::InvalidUrl(url.to_string()))?;
    Ok(trimmed.to_string())
}

/// Trim `value` and check its character count lies within `min..=max`.
pub fn validate_text(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();
    if len < min || len > max {
        return Err(ValidationError::TextLength { field, min, max });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_strips_scheme_www_and_path() {
        let d = SiteDomain::parse("https://www.Tech-Blog.io/about?x=1").unwrap();
        assert_eq!(d.as_str(), "tech-blog.io");
    }

    #[test]
    fn domain_strips_port() {
        let d = SiteDomain::parse("http://example.com:8080/").unwrap();
        assert_eq!(d.as_str(), "example.com");
    }

    #[test]
    fn domain_keeps_subdomains() {
        let d = SiteDomain::parse("blog.example.co.uk").unwrap();
        assert_eq!(d.as_str(), "blog.example.co.uk");
    }

    #[test]
    fn domain_rejects_invalid() {
        for bad in [
            "",
            "localhost",
            "-bad.com",
            "bad-.com",
            "exa mple.com",
            "ex_ample.com",
            "192.168.0.1",
            "a..com",
            "https://",
        ] {
            assert!(SiteDomain::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn www_and_bare_domain_are_equal() {
        assert_eq!(
            SiteDomain::parse("www.example.com").unwrap(),
            SiteDomain::parse("EXAMPLE.com").unwrap()
        );
    }

    #[test]
    fn http_url_validation() {
        assert!(validate_http_url("https://example.com/post/1").is_ok());
        assert!(validate_http_url("http://blog.example.com").is_ok());
        assert!(validate_http_url("ftp://example.com").is_err());
        assert!(validate_http_url("example.com").is_err());
        assert!(validate_http_url("https://exa mple.com").is_err());
    }

    #[test]
    fn text_validation_trims_and_bounds() {
        assert_eq!(validate_text("title", "  hi  ", 1, 10).unwrap(), "hi");
        assert!(validate_text("title", "   ", 1, 10).is_err());
        assert!(validate_text("title", "abcdefghijk", 1, 10).is_err());
    }
}
