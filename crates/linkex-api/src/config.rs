//! # Service Configuration
//!
//! Everything the service reads from the environment, parsed once at
//! startup. Parsing goes through a lookup closure so tests can supply
//! variables without touching the process environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `PORT` | 8080 |
//! | `DATABASE_URL` | unset (in-memory only) |
//! | `LINKEX_ADMIN_TOKEN` | unset |
//! | `SESSION_TTL_HOURS` | 168 |
//! | `RATE_LIMIT_MAX_REQUESTS` / `RATE_LIMIT_WINDOW_SECS` | 600 / 60 |
//! | `AUTH_RATE_LIMIT_MAX_REQUESTS` | 20 |
//! | `AUTO_COMPLETE_DAYS` | 7 |
//! | `AUTO_COMPLETE_INTERVAL_SECS` | 3600 |
//! | `LINKEX_METRICS_ENABLED` | true |
//! | `ORDER_COMMISSION_BPS` / `WITHDRAWAL_FEE_BPS` / `REFERRAL_COMMISSION_BPS` | 1000 / 0 / 500 |
//! | `BOOTSTRAP_ADMIN_EMAIL` / `BOOTSTRAP_ADMIN_PASSWORD` | unset |

use std::str::FromStr;

use linkex_ledger::FeeSchedule;
use thiserror::Error;

use crate::middleware::rate_limit::RateLimitConfig;

/// Configuration errors. Any of these aborts startup.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed or is out of range.
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    /// A variable that only makes sense together with another is set alone.
    #[error("{0}")]
    Incomplete(String),
}

/// Credentials for the first admin account, created when the user table is
/// empty.
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Application configuration.
///
/// Custom `Debug` redacts the admin token and database URL to prevent
/// credential leakage in logs.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Postgres connection string. `None` runs the service in-memory only.
    pub database_url: Option<String>,
    /// Static operator token that authenticates as an admin.
    pub admin_token: Option<String>,
    /// Session lifetime in hours.
    pub session_ttl_hours: i64,
    /// Limit applied to every request.
    pub rate_limit: RateLimitConfig,
    /// Stricter limit for login and registration.
    pub auth_rate_limit: RateLimitConfig,
    /// Days after delivery before an order completes on its own.
    pub auto_complete_days: i64,
    /// Seconds between auto-complete sweeps.
    pub auto_complete_interval_secs: u64,
    /// Whether the request metrics middleware is installed.
    pub metrics_enabled: bool,
    /// Initial fee schedule. Admins may change it at runtime.
    pub fees: FeeSchedule,
    /// First admin account.
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "admin_token",
                &self.admin_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("session_ttl_hours", &self.session_ttl_hours)
            .field("rate_limit", &self.rate_limit)
            .field("auth_rate_limit", &self.auth_rate_limit)
            .field("auto_complete_days", &self.auto_complete_days)
            .field(
                "auto_complete_interval_secs",
                &self.auto_complete_interval_secs,
            )
            .field("metrics_enabled", &self.metrics_enabled)
            .field("fees", &self.fees)
            .field("bootstrap_admin", &self.bootstrap_admin)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            admin_token: None,
            session_ttl_hours: 168,
            rate_limit: RateLimitConfig::default(),
            auth_rate_limit: RateLimitConfig {
                max_requests: 20,
                window_secs: 60,
            },
            auto_complete_days: 7,
            auto_complete_interval_secs: 3600,
            metrics_enabled: true,
            fees: FeeSchedule::default(),
            bootstrap_admin: None,
        }
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn positive<T: PartialOrd + Default + ToString>(
    var: &'static str,
    value: T,
) -> Result<T, ConfigError> {
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be greater than zero".into(),
        })
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let metrics_enabled = lookup("LINKEX_METRICS_ENABLED")
            .map(|v| v.trim().to_lowercase() != "false")
            .unwrap_or(defaults.metrics_enabled);

        let fees = FeeSchedule {
            order_commission_bps: parse(
                &lookup,
                "ORDER_COMMISSION_BPS",
                defaults.fees.order_commission_bps,
            )?,
            withdrawal_fee_bps: parse(
                &lookup,
                "WITHDRAWAL_FEE_BPS",
                defaults.fees.withdrawal_fee_bps,
            )?,
            referral_commission_bps: parse(
                &lookup,
                "REFERRAL_COMMISSION_BPS",
                defaults.fees.referral_commission_bps,
            )?,
            ..defaults.fees
        };
        fees.validate().map_err(|e| ConfigError::Invalid {
            var: "ORDER_COMMISSION_BPS/WITHDRAWAL_FEE_BPS/REFERRAL_COMMISSION_BPS",
            value: format!(
                "{}/{}/{}",
                fees.order_commission_bps, fees.withdrawal_fee_bps, fees.referral_commission_bps
            ),
            reason: e.to_string(),
        })?;

        let bootstrap_admin = match (
            non_empty(&lookup, "BOOTSTRAP_ADMIN_EMAIL"),
            non_empty(&lookup, "BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Incomplete(
                    "BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must be set together"
                        .into(),
                ))
            }
        };

        Ok(Self {
            port: parse(&lookup, "PORT", defaults.port)?,
            database_url: non_empty(&lookup, "DATABASE_URL"),
            admin_token: non_empty(&lookup, "LINKEX_ADMIN_TOKEN"),
            session_ttl_hours: positive(
                "SESSION_TTL_HOURS",
                parse(&lookup, "SESSION_TTL_HOURS", defaults.session_ttl_hours)?,
            )?,
            rate_limit: RateLimitConfig {
                max_requests: positive(
                    "RATE_LIMIT_MAX_REQUESTS",
                    parse(
                        &lookup,
                        "RATE_LIMIT_MAX_REQUESTS",
                        defaults.rate_limit.max_requests,
                    )?,
                )?,
                window_secs: positive(
                    "RATE_LIMIT_WINDOW_SECS",
                    parse(
                        &lookup,
                        "RATE_LIMIT_WINDOW_SECS",
                        defaults.rate_limit.window_secs,
                    )?,
                )?,
            },
            auth_rate_limit: RateLimitConfig {
                max_requests: positive(
                    "AUTH_RATE_LIMIT_MAX_REQUESTS",
                    parse(
                        &lookup,
                        "AUTH_RATE_LIMIT_MAX_REQUESTS",
                        defaults.auth_rate_limit.max_requests,
                    )?,
                )?,
                window_secs: positive(
                    "RATE_LIMIT_WINDOW_SECS",
                    parse(
                        &lookup,
                        "RATE_LIMIT_WINDOW_SECS",
                        defaults.auth_rate_limit.window_secs,
                    )?,
                )?,
            },
            auto_complete_days: positive(
                "AUTO_COMPLETE_DAYS",
                parse(&lookup, "AUTO_COMPLETE_DAYS", defaults.auto_complete_days)?,
            )?,
            auto_complete_interval_secs: positive(
                "AUTO_COMPLETE_INTERVAL_SECS",
                parse(
                    &lookup,
                    "AUTO_COMPLETE_INTERVAL_SECS",
                    defaults.auto_complete_interval_secs,
                )?,
            )?,
            metrics_enabled,
            fees,
            bootstrap_admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(move |k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.port, 8080);
        assert!(c.database_url.is_none());
        assert_eq!(c.session_ttl_hours, 168);
        assert_eq!(c.auth_rate_limit.max_requests, 20);
        assert_eq!(c.fees, FeeSchedule::default());
        assert!(c.metrics_enabled);
    }

    #[test]
    fn overrides_are_parsed() {
        let c = config(&[
            ("PORT", "9000"),
            ("ORDER_COMMISSION_BPS", "1500"),
            ("LINKEX_METRICS_ENABLED", "FALSE"),
            ("AUTO_COMPLETE_DAYS", "3"),
        ])
        .unwrap();
        assert_eq!(c.port, 9000);
        assert_eq!(c.fees.order_commission_bps, 1500);
        assert!(!c.metrics_enabled);
        assert_eq!(c.auto_complete_days, 3);
    }

    #[test]
    fn garbage_port_fails() {
        let err = config(&[("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PORT", .. }));
    }

    #[test]
    fn commission_above_full_rate_fails() {
        assert!(config(&[("ORDER_COMMISSION_BPS", "20000")]).is_err());
    }

    #[test]
    fn zero_window_fails() {
        assert!(config(&[("RATE_LIMIT_WINDOW_SECS", "0")]).is_err());
    }

    #[test]
    fn bootstrap_admin_requires_both_halves() {
        assert!(matches!(
            config(&[("BOOTSTRAP_ADMIN_EMAIL", "root@example.com")]),
            Err(ConfigError::Incomplete(_))
        ));
        let c = config(&[
            ("BOOTSTRAP_ADMIN_EMAIL", "root@example.com"),
            ("BOOTSTRAP_ADMIN_PASSWORD", "correct horse"),
        ])
        .unwrap();
        assert_eq!(c.bootstrap_admin.unwrap().email, "root@example.com");
    }

    #[test]
    fn debug_redacts_secrets() {
        let c = config(&[
            ("LINKEX_ADMIN_TOKEN", "super-secret-token"),
            ("DATABASE_URL", "postgres://user:pw@db/linkex"),
            ("BOOTSTRAP_ADMIN_EMAIL", "root@example.com"),
            ("BOOTSTRAP_ADMIN_PASSWORD", "hunter22"),
        ])
        .unwrap();
        let debug = format!("{c:?}");
        assert!(!debug.contains("super-secret-token"));
        assert!(!debug.contains("pw@db"));
        assert!(!debug.contains("hunter22"));
        assert!(debug.contains("[REDACTED]"));
    }
}
