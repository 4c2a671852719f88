//! Engine configuration.
//!
//! Loaded from environment variables with sensible defaults; everything here
//! is a deliberate policy choice rather than something the engine infers.

use std::env;

use serde::{Deserialize, Serialize};

/// What `delete_event` does when the event still has non-terminal bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionPolicy {
    /// Refuse the deletion and report how many bookings are in the way.
    #[default]
    Refuse,
    /// Cancel every non-terminal booking first, then remove the event.
    CascadeCancel,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a PENDING_PAYMENT booking may wait for verification before
    /// the sweep fails it and releases its hold.
    pub payment_timeout_secs: i64,
    /// Interval between sweep runs in `run_sweeper`.
    pub sweep_interval_secs: u64,
    /// ISO currency code passed to the payment provider.
    pub currency: String,
    /// Public provider key, handed to clients in the checkout payload.
    pub provider_key_id: String,
    /// Secret provider key used to verify callback signatures.
    pub provider_key_secret: String,
    pub deletion_policy: DeletionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // Provider checkout sessions expire in this range.
            payment_timeout_secs: 15 * 60,
            sweep_interval_secs: 60,
            currency: "INR".to_string(),
            provider_key_id: "rzp_test_key".to_string(),
            provider_key_secret: "rzp_test_secret".to_string(),
            deletion_policy: DeletionPolicy::Refuse,
        }
    }
}

impl EngineConfig {
    /// Load from `BOOKING_*` environment variables, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            payment_timeout_secs: env_parse("BOOKING_PAYMENT_TIMEOUT_SECS")
                .unwrap_or(defaults.payment_timeout_secs),
            sweep_interval_secs: env_parse("BOOKING_SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sweep_interval_secs),
            currency: env::var("BOOKING_CURRENCY").unwrap_or(defaults.currency),
            provider_key_id: env::var("BOOKING_PROVIDER_KEY_ID").unwrap_or(defaults.provider_key_id),
            provider_key_secret: env::var("BOOKING_PROVIDER_KEY_SECRET")
                .unwrap_or(defaults.provider_key_secret),
            deletion_policy: match env::var("BOOKING_DELETION_POLICY").as_deref() {
                Ok("cascade_cancel") => DeletionPolicy::CascadeCancel,
                Ok("refuse") => DeletionPolicy::Refuse,
                _ => defaults.deletion_policy,
            },
        }
    }

    pub fn payment_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.payment_timeout_secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.payment_timeout_secs, 900);
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.deletion_policy, DeletionPolicy::Refuse);
        assert_eq!(config.payment_timeout(), chrono::Duration::minutes(15));
        assert_eq!(
            config.sweep_interval(),
            std::time::Duration::from_secs(60)
        );
    }

    #[test]
    fn deletion_policy_default_is_refuse() {
        assert_eq!(DeletionPolicy::default(), DeletionPolicy::Refuse);
    }
}
