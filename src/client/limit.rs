//! Send-side rate limiting.
//!
//! Mirrors the admission control of ircu-style servers so scripted clients
//! do not trip server-side excess-flood handling: each client carries a
//! virtual accept time `since` that every message pushes forward by its
//! cost, and a sender must wait whenever `since` runs more than the burst
//! window ahead of the wall clock.

use std::time::{Duration, Instant};

/// How far `since` may run ahead of the wall clock before sends block.
const BURST_AHEAD: Duration = Duration::from_secs(9);

/// Per-message base cost in seconds; one more second per 120 bytes.
const BASE_COST: u64 = 2;

/// The virtual-accept-time cursor for one client.
#[derive(Debug)]
pub struct SendWindow {
    pub(crate) since: Instant,
}

impl SendWindow {
    pub fn new() -> Self {
        Self { since: Instant::now() }
    }

    /// Charges one message of `len` bytes against the window.
    ///
    /// Returns how long the sender must sleep before transmitting. `since`
    /// never moves backwards.
    pub fn charge(&mut self, now: Instant, len: usize) -> Duration {
        let limit = now + BURST_AHEAD;
        let mut delay = Duration::ZERO;
        if self.since > limit {
            delay = self.since - limit;
        } else if self.since < now {
            self.since = now;
        }
        self.since += Duration::from_secs(BASE_COST + (len / 120) as u64);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_is_two_seconds_plus_length() {
        let now = Instant::now();
        let mut window = SendWindow { since: now };

        window.charge(now, 60);
        assert_eq!(window.since, now + Duration::from_secs(2));

        window.charge(now, 120);
        assert_eq!(window.since, now + Duration::from_secs(5));

        window.charge(now, 250);
        assert_eq!(window.since, now + Duration::from_secs(9));
    }

    #[test]
    fn burst_allows_nine_seconds_ahead() {
        let now = Instant::now();
        let mut window = SendWindow { since: now };

        // Five 60-byte messages fit in the burst window without delay.
        for _ in 0..5 {
            assert_eq!(window.charge(now, 60), Duration::ZERO);
        }
        // The cursor is now 10s ahead; the next sends pay the difference.
        assert_eq!(window.charge(now, 60), Duration::from_secs(1));
        assert_eq!(window.charge(now, 60), Duration::from_secs(3));
    }

    #[test]
    fn stale_cursor_snaps_to_now() {
        let start = Instant::now();
        let mut window = SendWindow { since: start };
        let later = start + Duration::from_secs(100);

        assert_eq!(window.charge(later, 0), Duration::ZERO);
        assert_eq!(window.since, later + Duration::from_secs(2));
    }

    #[test]
    fn since_is_monotonic() {
        let now = Instant::now();
        let mut window = SendWindow { since: now };
        let mut previous = window.since;
        for len in [0, 60, 500, 0, 2000] {
            window.charge(now, len);
            assert!(window.since >= previous);
            previous = window.since;
        }
    }
}
