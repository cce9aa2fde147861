//! Engine configuration.
//!
//! Loads configuration from `STOCKHOLD_*` environment variables with sensible
//! defaults. Unparseable values fall back to the default; [`EngineConfig::validate`]
//! rejects values that parse but make no sense.

use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_SECS: u64 = 366 * 24 * 60 * 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Length of the checkout hold, in seconds (default: 900)
    pub reservation_ttl_secs: u64,
    /// Optimistic commit attempts before giving up with `Conflict` (default: 8)
    pub commit_retries: u32,
    /// Maintenance tick interval, in seconds (default: 60)
    pub tick_interval_secs: u64,
    /// Local hour at/after which submitted payments are escalated (default: 21)
    pub escalation_hour: u32,
    /// Local hour at/after which the daily review reminder goes out (default: 20)
    pub reminder_hour: u32,
    /// Offset of the business's local time from UTC, in minutes (default: 0)
    pub utc_offset_minutes: i32,
    /// Availability below which a product is reported (default: 5)
    pub low_stock_threshold: i64,
    /// Minimum time between two alerts for one product, in seconds (default: 1800)
    pub low_stock_cooldown_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: 900,
            commit_retries: 8,
            tick_interval_secs: 60,
            escalation_hour: 21,
            reminder_hour: 20,
            utc_offset_minutes: 0,
            low_stock_threshold: 5,
            low_stock_cooldown_secs: 1800,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup (tests, config files).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            reservation_ttl_secs: parse_or(lookup("STOCKHOLD_RESERVATION_TTL_SECS"), defaults.reservation_ttl_secs),
            commit_retries: parse_or(lookup("STOCKHOLD_COMMIT_RETRIES"), defaults.commit_retries),
            tick_interval_secs: parse_or(lookup("STOCKHOLD_TICK_INTERVAL_SECS"), defaults.tick_interval_secs),
            escalation_hour: parse_or(lookup("STOCKHOLD_ESCALATION_HOUR"), defaults.escalation_hour),
            reminder_hour: parse_or(lookup("STOCKHOLD_REMINDER_HOUR"), defaults.reminder_hour),
            utc_offset_minutes: parse_or(lookup("STOCKHOLD_UTC_OFFSET_MINUTES"), defaults.utc_offset_minutes),
            low_stock_threshold: parse_or(lookup("STOCKHOLD_LOW_STOCK_THRESHOLD"), defaults.low_stock_threshold),
            low_stock_cooldown_secs: parse_or(lookup("STOCKHOLD_LOW_STOCK_COOLDOWN_SECS"), defaults.low_stock_cooldown_secs),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reservation_ttl_secs == 0 {
            return Err(ConfigError::invalid("STOCKHOLD_RESERVATION_TTL_SECS", "must be positive"));
        }
        if self.commit_retries == 0 {
            return Err(ConfigError::invalid("STOCKHOLD_COMMIT_RETRIES", "must be positive"));
        }
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::invalid("STOCKHOLD_TICK_INTERVAL_SECS", "must be positive"));
        }
        if self.low_stock_cooldown_secs == 0 {
            return Err(ConfigError::invalid("STOCKHOLD_LOW_STOCK_COOLDOWN_SECS", "must be positive"));
        }
        if self.escalation_hour >= 24 {
            return Err(ConfigError::invalid("STOCKHOLD_ESCALATION_HOUR", "must be in 0..24"));
        }
        if self.reminder_hour >= 24 {
            return Err(ConfigError::invalid("STOCKHOLD_REMINDER_HOUR", "must be in 0..24"));
        }
        if self.low_stock_threshold < 0 {
            return Err(ConfigError::invalid("STOCKHOLD_LOW_STOCK_THRESHOLD", "cannot be negative"));
        }
        if FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).is_none() {
            return Err(ConfigError::invalid(
                "STOCKHOLD_UTC_OFFSET_MINUTES",
                "must be within one day of UTC",
            ));
        }
        if self.reservation_ttl_secs > MAX_SECS {
            return Err(ConfigError::invalid("STOCKHOLD_RESERVATION_TTL_SECS", "capped at one year"));
        }
        if self.low_stock_cooldown_secs > MAX_SECS {
            return Err(ConfigError::invalid("STOCKHOLD_LOW_STOCK_COOLDOWN_SECS", "capped at one year"));
        }
        Ok(())
    }

    pub fn reservation_ttl(&self) -> Duration {
        secs(self.reservation_ttl_secs)
    }

    pub fn tick_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.tick_interval_secs)
    }

    /// Local time zone of the business; UTC when the offset is out of range.
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
    }

    pub fn maintenance(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            escalation_hour: self.escalation_hour,
            reminder_hour: self.reminder_hour,
            utc_offset: self.utc_offset(),
            low_stock_threshold: self.low_stock_threshold,
            low_stock_cooldown: secs(self.low_stock_cooldown_secs),
        }
    }
}

/// Settings the maintenance sweep reads on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceConfig {
    pub escalation_hour: u32,
    pub reminder_hour: u32,
    pub utc_offset: FixedOffset,
    pub low_stock_threshold: i64,
    pub low_stock_cooldown: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        EngineConfig::default().maintenance()
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn secs(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_SECS) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = EngineConfig::from_lookup(|_| None);
        assert_eq!(config, EngineConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.reservation_ttl(), Duration::minutes(15));
    }

    #[test]
    fn values_are_read_and_garbage_falls_back() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("STOCKHOLD_RESERVATION_TTL_SECS", "120"),
            ("STOCKHOLD_UTC_OFFSET_MINUTES", "-300"),
            ("STOCKHOLD_ESCALATION_HOUR", "not-a-number"),
        ]));
        assert_eq!(config.reservation_ttl_secs, 120);
        assert_eq!(config.utc_offset().local_minus_utc(), -300 * 60);
        assert_eq!(config.escalation_hour, 21);
    }

    #[test]
    fn validate_rejects_nonsense() {
        let config = EngineConfig {
            escalation_hour: 24,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "STOCKHOLD_ESCALATION_HOUR", .. })
        ));

        let config = EngineConfig {
            tick_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
