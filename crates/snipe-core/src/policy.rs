//! Purchase loop policy.
//!
//! The interval floor is enforced here, when configuration is turned into a
//! policy, so the loop itself never has to second-guess its inputs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Smallest retry interval accepted for the purchase loop.
pub const MIN_LOOP_INTERVAL_SECS: u64 = 10;

/// Validated retry policy for the purchase loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLoopPolicy")]
pub struct LoopPolicy {
    /// Whether the operator may start a purchase loop at all.
    pub enabled: bool,
    /// Fixed delay between a failed attempt and the next one.
    interval_secs: u64,
    /// 0 = unbounded.
    max_attempts: u32,
}

impl LoopPolicy {
    /// Build a policy, rejecting intervals below [`MIN_LOOP_INTERVAL_SECS`].
    pub fn new(enabled: bool, interval_secs: u64, max_attempts: u32) -> ConfigResult<Self> {
        if interval_secs < MIN_LOOP_INTERVAL_SECS {
            return Err(ConfigError::IntervalTooShort {
                secs: interval_secs,
                min: MIN_LOOP_INTERVAL_SECS,
            });
        }
        Ok(Self {
            enabled,
            interval_secs,
            max_attempts,
        })
    }

    /// Policy with looping disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            interval_secs: 60,
            max_attempts: 0,
        }
    }

    #[must_use]
    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True once `attempts_made` has used up a bounded budget.
    #[must_use]
    pub fn limit_reached(&self, attempts_made: u32) -> bool {
        self.max_attempts > 0 && attempts_made >= self.max_attempts
    }
}

/// Unchecked wire form; deserialization goes through [`LoopPolicy::new`].
#[derive(Deserialize)]
struct RawLoopPolicy {
    #[serde(default)]
    enabled: bool,
    interval_secs: u64,
    #[serde(default)]
    max_attempts: u32,
}

impl TryFrom<RawLoopPolicy> for LoopPolicy {
    type Error = ConfigError;

    fn try_from(raw: RawLoopPolicy) -> ConfigResult<Self> {
        Self::new(raw.enabled, raw.interval_secs, raw.max_attempts)
    }
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}
