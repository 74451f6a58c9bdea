//! REST rate-limit bookkeeping from the `x-ratelimit-*` response headers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

/// Below this many calls left a client is reported at every checkpoint.
pub const LOW_REMAINING: u64 = 50;

/// Below this many calls left publishing waits for the window to reset.
pub const CRITICAL_REMAINING: u64 = 100;

const RESET_MARGIN: Duration = Duration::from_secs(2);

/// The most recent rate-limit window a client has seen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    /// Unix time, in seconds, at which the window resets.
    pub reset: u64,
}

impl RateLimit {
    /// Seconds left until the window resets, never negative.
    pub fn resets_in(&self, now: u64) -> Duration {
        Duration::from_secs(self.reset.saturating_sub(now))
    }

    pub fn is_low(&self) -> bool {
        self.remaining < LOW_REMAINING
    }

    pub fn is_critical(&self) -> bool {
        self.remaining < CRITICAL_REMAINING
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Log every client's window, warning for those running low.
pub fn check(checkpoint: &str, clients: &[(&str, Option<RateLimit>)], now: u64) {
    for (client, limit) in clients {
        let Some(limit) = limit else { continue };
        debug!(
            checkpoint,
            client,
            remaining = limit.remaining,
            limit = limit.limit,
            "rate limit"
        );
        if limit.is_low() {
            warn!(
                checkpoint,
                client,
                remaining = limit.remaining,
                resets_in = ?limit.resets_in(now),
                "rate limit running low"
            );
        }
    }
}

/// How long to hold writes back: until the latest reset among critical clients,
/// plus a small margin. `None` when no client is critical or every critical
/// window has already reset.
pub fn pause_before_writes(clients: &[(&str, Option<RateLimit>)], now: u64) -> Option<Duration> {
    clients
        .iter()
        .filter_map(|(_, limit)| *limit)
        .filter(RateLimit::is_critical)
        .map(|limit| limit.resets_in(now))
        .filter(|wait| !wait.is_zero())
        .max()
        .map(|wait| wait + RESET_MARGIN)
}
