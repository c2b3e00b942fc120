//! Engine configuration and the lock-retry policy.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_LOCK_TIMEOUT_MS: &str = "STOCKFORGE_LOCK_TIMEOUT_MS";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "STOCKFORGE_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "STOCKFORGE_RETRY_BASE_DELAY_MS";
pub const ENV_VERIFY_ON_READ: &str = "STOCKFORGE_VERIFY_ON_READ";

/// How often, and how patiently, a mutation that timed out on a row lock is
/// attempted again.
///
/// The delay doubles from `base_delay` up to `max_delay`; a policy with
/// `base_delay == max_delay` waits the same time before every retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. 0 and 1 both mean a single try.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
        }
    }

    /// Sleep after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1_u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether failed attempt number `attempt` (1-based) may be followed by another.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Runtime knobs of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on waiting for any single row lock.
    pub lock_timeout: Duration,
    pub retry: RetryPolicy,
    /// Replay the ledger on every `current_quantity` read instead of trusting
    /// the cache for unflagged rows.
    pub verify_on_read: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(250),
            retry: RetryPolicy::default(),
            verify_on_read: false,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `STOCKFORGE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] but reading from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, ENV_LOCK_TIMEOUT_MS) {
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, ENV_RETRY_MAX_ATTEMPTS) {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_RETRY_BASE_DELAY_MS) {
            config.retry.base_delay = Duration::from_millis(ms);
            config.retry.max_delay = config.retry.max_delay.max(config.retry.base_delay);
        }
        if let Some(raw) = lookup(ENV_VERIFY_ON_READ) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.verify_on_read = true,
                "0" | "false" | "no" | "off" => config.verify_on_read = false,
                _ => tracing::warn!(key = ENV_VERIFY_ON_READ, value = %raw, "ignoring unparsable setting"),
            }
        }

        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}
