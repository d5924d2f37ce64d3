//! Pacing limiter used by [`LoadType::Rps`](crate::LoadType::Rps) generators.
//!
//! The limiter hands out evenly spaced slots: with `rate` requests per `unit`
//! the gap between two slots is `per_request = unit / rate`. Every caller of
//! [`RateLimiter::take`] reserves the next free slot and sleeps until it comes
//! up.
//!
//! # Slot reservation
//! The last reserved slot is stored as nanoseconds since the limiter was
//! created in a single `AtomicU64`. Reserving is a CAS loop:
//!
//! ```text
//! next = max(last + per_request, now - max_slack)
//! ```
//!
//! The first caller gets `now`. `max_slack` lets callers that woke up late
//! catch up on a few missed slots without ever building an unbounded backlog:
//! at most `slack` slots can be granted back to back after an idle period.
//!
//! # Why no token refill task?
//! Slots are computed from the clock at reservation time, so there is no
//! background governor to start, stop or tick. Swapping a limiter for a new
//! one (a new schedule segment) is a plain pointer exchange.
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::time::Instant;

/// Slots that may be granted immediately to catch up after a late wakeup.
pub const DEFAULT_SLACK: u32 = 10;

/// 0 means "no slot reserved yet", otherwise `slot_nanos + 1`.
const UNSET: u64 = 0;

#[derive(Debug)]
pub struct RateLimiter {
    per_request: Duration,
    max_slack: Duration,
    origin: Instant,
    last: AtomicU64,
}

impl RateLimiter {
    /// `rate` slots per `unit`, with [`DEFAULT_SLACK`].
    pub fn new(rate: i64, unit: Duration) -> Self {
        Self::with_slack(rate, unit, DEFAULT_SLACK)
    }

    pub fn with_slack(rate: i64, unit: Duration, slack: u32) -> Self {
        let per_request = per_request(rate, unit);
        Self {
            per_request,
            max_slack: per_request.saturating_mul(slack),
            origin: Instant::now(),
            last: AtomicU64::new(UNSET),
        }
    }

    /// Gap between two consecutive slots.
    #[cfg(feature = "internals")]
    pub fn per_request(&self) -> Duration {
        self.per_request
    }

    /// Waits for the next slot and returns the instant it was scheduled for.
    pub async fn take(&self) -> Instant {
        let slot = self.reserve(Instant::now());
        tokio::time::sleep_until(slot).await;
        slot
    }

    fn reserve(&self, now: Instant) -> Instant {
        let now_ns = as_nanos(now.saturating_duration_since(self.origin));
        let per_ns = as_nanos(self.per_request);
        let slack_ns = as_nanos(self.max_slack);

        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let last = (current != UNSET).then(|| current - 1);
            let next = next_slot(last, now_ns, per_ns, slack_ns);
            match self.last.compare_exchange_weak(
                current,
                next.saturating_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return self.origin + Duration::from_nanos(next),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Pure slot computation, all values in nanoseconds since the limiter origin.
pub fn next_slot(last: Option<u64>, now: u64, per_request: u64, max_slack: u64) -> u64 {
    match last {
        None => now,
        Some(last) => last
            .saturating_add(per_request)
            .max(now.saturating_sub(max_slack)),
    }
}

/// `unit / rate`, never zero.
pub fn per_request(rate: i64, unit: Duration) -> Duration {
    let rate = u128::try_from(rate.max(1)).unwrap_or(1);
    let nanos = (unit.as_nanos() / rate).max(1);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

fn as_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
