//! Bounded polling primitives.
//!
//! Both variants run on the calling thread and always sleep between ticks,
//! even when the readiness check itself was slow (it usually performs network
//! I/O). The timeout is measured from the first call, so a check that takes a
//! long time eats into the budget rather than extending it.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::timer::Timer;

/// Convergence did not happen within the polling budget.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("timed out after {timeout:?} while waiting for {subject}")]
pub struct PollTimeout {
    pub subject: String,
    pub timeout: Duration,
}

/// Fixed-interval poller with an overall timeout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Poller {
    interval: Duration,
    timeout: Duration,
}

impl Poller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Build a poller ticking at `frequency_hz`.
    ///
    /// Non-positive or non-finite frequencies fall back to one tick per second.
    pub fn with_frequency(frequency_hz: f64, timeout: Duration) -> Self {
        let interval = if frequency_hz.is_finite() && frequency_hz > 0.0 {
            Duration::from_secs_f64(1.0 / frequency_hz)
        } else {
            Duration::from_secs(1)
        };
        Self::new(interval, timeout)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll `check` until it reports ready.
    ///
    /// The check always runs at least once. Errors returned by the check are
    /// propagated immediately; they are not treated as "not ready".
    pub fn poll<E, F>(&self, subject: &str, mut check: F) -> Result<(), E>
    where
        F: FnMut() -> Result<bool, E>,
        E: From<PollTimeout>,
    {
        let timer = Timer::started();
        loop {
            info!(
                "Waiting for {} [elapsed: {:.2} seconds]",
                subject,
                timer.elapsed().as_secs_f64()
            );
            if check()? {
                return Ok(());
            }
            debug!("Waiting {:?} before retrying", self.interval);
            thread::sleep(self.interval);
            if timer.elapsed() >= self.timeout {
                return Err(self.timed_out(subject).into());
            }
        }
    }

    /// Poll a list of candidates and return the index of the first ready one.
    ///
    /// Each tick scans every candidate in iteration order and stops at the
    /// first one whose check passes, so ties always resolve to the earliest
    /// candidate.
    pub fn poll_any<T, E, F>(&self, subject: &str, candidates: &[T], mut check: F) -> Result<usize, E>
    where
        F: FnMut(&T) -> Result<bool, E>,
        E: From<PollTimeout>,
    {
        let timer = Timer::started();
        loop {
            info!(
                "Polling {} candidate(s) for {} [elapsed: {:.2} seconds]",
                candidates.len(),
                subject,
                timer.elapsed().as_secs_f64()
            );
            for (index, candidate) in candidates.iter().enumerate() {
                if check(candidate)? {
                    return Ok(index);
                }
            }
            debug!("Waiting {:?} before retrying", self.interval);
            thread::sleep(self.interval);
            if timer.elapsed() >= self.timeout {
                return Err(self.timed_out(subject).into());
            }
        }
    }

    fn timed_out(&self, subject: &str) -> PollTimeout {
        PollTimeout {
            subject: subject.to_string(),
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Timeout(PollTimeout),
        Boom,
    }

    impl From<PollTimeout> for TestError {
        fn from(value: PollTimeout) -> Self {
            Self::Timeout(value)
        }
    }

    #[test]
    fn with_frequency_converts_hz_to_interval() {
        let poller = Poller::with_frequency(4.0, Duration::from_secs(1));
        assert_eq!(poller.interval(), Duration::from_millis(250));
    }

    #[test]
    fn with_frequency_rejects_zero() {
        let poller = Poller::with_frequency(0.0, Duration::from_secs(1));
        assert_eq!(poller.interval(), Duration::from_secs(1));
    }

    #[test]
    fn poll_returns_once_ready() {
        let calls = Cell::new(0);
        let poller = Poller::new(Duration::from_millis(1), Duration::from_secs(5));
        let result: Result<(), TestError> = poller.poll("counter", || {
            calls.set(calls.get() + 1);
            Ok(calls.get() == 3)
        });
        assert!(result.is_ok());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn poll_runs_check_at_least_once_with_zero_timeout() {
        let calls = Cell::new(0);
        let poller = Poller::new(Duration::from_millis(1), Duration::ZERO);
        let result: Result<(), TestError> = poller.poll("instant", || {
            calls.set(calls.get() + 1);
            Ok(true)
        });
        assert!(result.is_ok());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn poll_times_out_within_one_interval_of_budget() {
        let interval = Duration::from_millis(100);
        let timeout = Duration::from_millis(300);
        let poller = Poller::new(interval, timeout);
        let started = Instant::now();
        let result: Result<(), TestError> = poller.poll("never", || Ok(false));
        let waited = started.elapsed();

        match result {
            Err(TestError::Timeout(err)) => {
                assert_eq!(err.subject, "never");
                assert_eq!(err.timeout, timeout);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(waited >= timeout, "returned too early: {waited:?}");
        // Scheduling jitter allowance on top of one interval.
        assert!(waited < timeout + interval + Duration::from_millis(50), "returned too late: {waited:?}");
    }

    #[test]
    fn poll_propagates_check_errors() {
        let poller = Poller::new(Duration::from_millis(1), Duration::from_secs(5));
        let result: Result<(), TestError> = poller.poll("failing", || Err(TestError::Boom));
        assert_eq!(result, Err(TestError::Boom));
    }

    #[test]
    fn poll_any_prefers_first_ready_candidate() {
        let poller = Poller::new(Duration::from_millis(1), Duration::from_secs(5));
        let candidates = ["a", "b", "c"];
        let result: Result<usize, TestError> =
            poller.poll_any("ready", &candidates, |c| Ok(*c != "a"));
        assert_eq!(result, Ok(1));
    }

    #[test]
    fn poll_any_waits_for_late_candidate() {
        let ticks = Cell::new(0);
        let poller = Poller::new(Duration::from_millis(1), Duration::from_secs(5));
        let candidates = [1, 2, 3];
        let result: Result<usize, TestError> = poller.poll_any("late", &candidates, |c| {
            if *c == 1 {
                ticks.set(ticks.get() + 1);
            }
            Ok(*c == 3 && ticks.get() >= 3)
        });
        assert_eq!(result, Ok(2));
        assert_eq!(ticks.get(), 3);
    }

    #[test]
    fn poll_any_times_out_on_empty_set() {
        let poller = Poller::new(Duration::from_millis(1), Duration::from_millis(5));
        let candidates: [u8; 0] = [];
        let result: Result<usize, TestError> = poller.poll_any("nothing", &candidates, |_| Ok(true));
        assert!(matches!(result, Err(TestError::Timeout(_))));
    }
}
