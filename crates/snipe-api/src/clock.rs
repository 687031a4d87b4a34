//! Timestamp source for request signing.
//!
//! The vendor rejects signatures whose timestamp is too far from its own clock,
//! so signed calls use `local_time + server_offset`, with the offset learned
//! from `GET /auth/time`.
//!
//! # Offset Convention
//! `server_offset_secs = server_time - local_time`
//! - Positive: server clock is ahead of local
//! - Negative: server clock is behind local

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Trait for obtaining current time, enabling testability.
pub trait Clock: Send + Sync {
    /// Returns current time in seconds since Unix epoch.
    fn now_secs(&self) -> u64;
}

/// System clock implementation using real time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        // A clock set before 1970 signs with 0 and the vendor rejects the call,
        // which surfaces as an ordinary vendor error.
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Local clock corrected by the last known server offset.
pub struct ServerClock<C: Clock> {
    clock: C,
    server_offset_secs: AtomicI64,
    synced: AtomicBool,
}

impl<C: Clock> ServerClock<C> {
    /// Drift above this is logged: requests would likely have been rejected.
    const DRIFT_WARN_THRESHOLD_SECS: i64 = 30;

    #[must_use]
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            server_offset_secs: AtomicI64::new(0),
            synced: AtomicBool::new(false),
        }
    }

    /// Timestamp to put in `X-Ovh-Timestamp`.
    #[must_use]
    pub fn now_secs(&self) -> u64 {
        let local = self.clock.now_secs();
        let offset = self.server_offset_secs.load(Ordering::Acquire);
        if offset >= 0 {
            local.saturating_add(offset as u64)
        } else {
            local.saturating_sub(offset.unsigned_abs())
        }
    }

    /// Record the server's current time and return the resulting offset.
    pub fn sync_with_server(&self, server_time_secs: u64) -> i64 {
        let local_time = self.clock.now_secs();

        let offset = if server_time_secs >= local_time {
            (server_time_secs - local_time) as i64
        } else {
            -((local_time - server_time_secs) as i64)
        };

        if offset.abs() > Self::DRIFT_WARN_THRESHOLD_SECS {
            tracing::warn!(
                offset_secs = offset,
                "significant time drift detected with vendor API"
            );
        }

        self.server_offset_secs.store(offset, Ordering::Release);
        self.synced.store(true, Ordering::Release);

        tracing::debug!(offset_secs = offset, "synced with vendor time");
        offset
    }

    #[must_use]
    pub fn offset_secs(&self) -> i64 {
        self.server_offset_secs.load(Ordering::Acquire)
    }

    /// Whether `sync_with_server` has ever run.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

impl<C: Clock> std::fmt::Debug for ServerClock<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerClock")
            .field("offset_secs", &self.offset_secs())
            .field("synced", &self.is_synced())
            .finish()
    }
}
