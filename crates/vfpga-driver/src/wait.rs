//! Bounded busy-waits.
//!
//! Every hardware wait in the harness (kernel done bit, completion counters)
//! is a spin on a cheap probe. The probe is retried with `spin_loop` hints,
//! the thread yields every `yield_every` polls, and the wait gives up once
//! either `max_polls` probes were made or `timeout` elapsed.

use std::time::{Duration, Instant};

/// Limits applied to a hardware busy-wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Maximum number of probes before giving up
    pub max_polls: u64,
    /// Wall-clock budget for the whole wait
    pub timeout: Duration,
    /// Yield the thread (and check the clock) every this many probes
    pub yield_every: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            max_polls: u64::MAX,
            timeout: Duration::from_secs(1),
            yield_every: 1024,
        }
    }
}

impl WaitPolicy {
    /// Policy bounded only by a poll count (clock never consulted).
    pub const fn polls(max_polls: u64) -> Self {
        Self {
            max_polls,
            timeout: Duration::MAX,
            yield_every: u32::MAX,
        }
    }

    /// Set the wall-clock budget.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the probe budget.
    #[must_use]
    pub const fn with_max_polls(mut self, max_polls: u64) -> Self {
        self.max_polls = max_polls;
        self
    }

    /// Set the yield interval (clamped to at least 1).
    #[must_use]
    pub const fn with_yield_every(mut self, yield_every: u32) -> Self {
        self.yield_every = if yield_every == 0 { 1 } else { yield_every };
        self
    }
}

/// Result of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    /// Probe succeeded on poll number `polls` (1-based).
    Done { polls: u64 },
    /// Budget exhausted.
    Expired { polls: u64, elapsed: Duration },
}

/// Spin on `probe` until it returns true or `policy` is exhausted.
pub(crate) fn poll_until(policy: &WaitPolicy, mut probe: impl FnMut() -> bool) -> PollOutcome {
    let start = Instant::now();
    let yield_every = u64::from(policy.yield_every.max(1));
    let mut polls = 0u64;

    while polls < policy.max_polls {
        polls += 1;
        if probe() {
            return PollOutcome::Done { polls };
        }
        if polls % yield_every == 0 {
            if start.elapsed() >= policy.timeout {
                break;
            }
            std::thread::yield_now();
        } else {
            std::hint::spin_loop();
        }
    }

    PollOutcome::Expired {
        polls,
        elapsed: start.elapsed(),
    }
}

/// Milliseconds in `d`, saturating.
pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_probes_up_to_success() {
        let mut calls = 0;
        let outcome = poll_until(&WaitPolicy::polls(100), || {
            calls += 1;
            calls == 7
        });
        assert_eq!(outcome, PollOutcome::Done { polls: 7 });
    }

    #[test]
    fn stops_at_poll_budget() {
        let outcome = poll_until(&WaitPolicy::polls(10), || false);
        assert!(matches!(outcome, PollOutcome::Expired { polls: 10, .. }));
    }

    #[test]
    fn stops_at_time_budget() {
        let policy = WaitPolicy::default()
            .with_timeout(Duration::from_millis(5))
            .with_yield_every(16);
        let outcome = poll_until(&policy, || false);
        match outcome {
            PollOutcome::Expired { elapsed, .. } => assert!(elapsed >= Duration::from_millis(5)),
            PollOutcome::Done { .. } => panic!("probe never succeeds"),
        }
    }

    #[test]
    fn zero_yield_interval_is_clamped() {
        assert_eq!(WaitPolicy::default().with_yield_every(0).yield_every, 1);
    }
}
