//! Bounded wait-for-condition polling.
//!
//! Used to await device reconnection after root elevation. Time is read and
//! slept through a [`Clock`], so tests drive the deadline with
//! [`ManualClock`] instead of sleeping.

use std::cell::Cell;
use std::time::{Duration, Instant};
use torq_common::Result;
use tracing::trace;

/// Source of time and delays.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: `sleep` advances `now` without blocking.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Cell<Duration>,
    sleeps: Cell<usize>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Cell::new(Duration::ZERO),
            sleeps: Cell::new(0),
        }
    }

    /// Virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }

    /// Number of `sleep` calls observed.
    pub fn sleep_count(&self) -> usize {
        self.sleeps.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.offset.set(self.offset.get() + duration);
        self.sleeps.set(self.sleeps.get() + 1);
    }
}

/// Fixed-cadence polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }
}

/// Poll `condition` until it holds or the deadline elapses.
///
/// The condition is checked immediately, then after every `interval`. Returns
/// `Ok(true)` when it held, `Ok(false)` on timeout. An error from the
/// condition aborts the wait and is returned unchanged.
pub fn wait_until<F>(clock: &dyn Clock, policy: PollPolicy, mut condition: F) -> Result<bool>
where
    F: FnMut() -> Result<bool>,
{
    let start = clock.now();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if condition()? {
            trace!(attempt, "poll condition satisfied");
            return Ok(true);
        }
        let elapsed = clock.now().duration_since(start);
        if elapsed >= policy.deadline {
            trace!(attempt, elapsed_ms = elapsed.as_millis() as u64, "poll deadline elapsed");
            return Ok(false);
        }
        clock.sleep(policy.interval.min(policy.deadline - elapsed));
    }
}
