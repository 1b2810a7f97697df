//! Mapping between the local microsecond counter and Unix wall-clock time.
//!
//! The mapper holds the most recent [`NtpAnchor`] and converts in both
//! directions by applying the signed counter delta to the anchored wall-clock
//! time. Drift between syncs is assumed linear and uncorrected; each resync
//! replaces the anchor, which is a (small) discontinuity in the emitted
//! Unix timestamps.

use std::time::Duration;

use tracing::{info, warn};

use super::clock::MicrosClock;
use super::ntp::{AnchorSource, NtpAnchor};
use crate::sample::compose_micros;

/// Default interval between automatic resyncs.
pub const DEFAULT_RESYNC_INTERVAL_MS: u64 = 10_000;

/// Holds the current time anchor and the resync schedule.
pub struct TimeMapper {
    anchor: Option<NtpAnchor>,
    resync_interval_ms: u64,
    last_attempt_ms: Option<u64>,
    sync_count: u32,
}

impl TimeMapper {
    pub fn new(resync_interval_ms: u64) -> Self {
        Self {
            anchor: None,
            resync_interval_ms,
            last_attempt_ms: None,
            sync_count: 0,
        }
    }

    /// True once at least one sync has succeeded. Until then every mapping
    /// returns 0 and telemetry carries zero wall-clock timestamps.
    pub fn ready(&self) -> bool {
        self.anchor.is_some()
    }

    /// The anchor currently in effect.
    pub fn anchor(&self) -> Option<NtpAnchor> {
        self.anchor
    }

    /// Successful syncs so far.
    pub fn sync_count(&self) -> u32 {
        self.sync_count
    }

    /// Install a freshly obtained anchor.
    pub fn apply_anchor(&mut self, anchor: NtpAnchor) {
        self.anchor = Some(anchor);
        self.sync_count += 1;
    }

    /// Convert a hardware counter value to Unix microseconds.
    pub fn hw_to_unix(&self, hw_us: u64) -> u64 {
        match self.anchor {
            Some(a) => {
                let delta = hw_us as i64 - a.hw_us_at_sync as i64;
                (a.unix_us_at_sync as i64 + delta) as u64
            }
            None => 0,
        }
    }

    /// Convert Unix microseconds back to a hardware counter value.
    pub fn unix_to_hw(&self, unix_us: u64) -> u64 {
        match self.anchor {
            Some(a) => {
                let delta = unix_us as i64 - a.unix_us_at_sync as i64;
                (a.hw_us_at_sync as i64 + delta) as u64
            }
            None => 0,
        }
    }

    /// Convert a sample's split counter snapshot to Unix microseconds.
    pub fn sample_to_unix(&self, t_us: u32, rollover_count: u32) -> u64 {
        self.hw_to_unix(compose_micros(rollover_count, t_us))
    }

    /// Run a sync attempt if one is due. The first call always attempts;
    /// later calls attempt once per resync interval regardless of outcome.
    /// Returns true when a new anchor was installed.
    pub fn maybe_resync(
        &mut self,
        clock: &dyn MicrosClock,
        source: &mut dyn AnchorSource,
        timeout: Duration,
    ) -> bool {
        let now_ms = clock.now_ms();
        let due = match self.last_attempt_ms {
            None => true,
            Some(t) => now_ms.saturating_sub(t) >= self.resync_interval_ms,
        };
        if !due {
            return false;
        }
        self.last_attempt_ms = Some(now_ms);

        match source.obtain_anchor(clock, timeout) {
            Ok(anchor) => {
                self.apply_anchor(anchor);
                info!(
                    sync_count = self.sync_count,
                    rtt_us = anchor.rtt_us,
                    unix_us = anchor.unix_us_at_sync,
                    "time anchor updated"
                );
                true
            }
            Err(e) => {
                warn!(error = %e, "time sync attempt failed");
                false
            }
        }
    }
}
