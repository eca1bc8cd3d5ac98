//! Monotonic stopwatch.

use std::time::{Duration, Instant};

/// Stopwatch over [`Instant`].
///
/// `elapsed` keeps growing until [`Timer::stop`] is called, after which it is
/// frozen at the stop mark. Restarting clears the stop mark.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timer {
    start: Option<Instant>,
    end: Option<Instant>,
}

impl Timer {
    /// Create a timer that has not been started.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a timer and start it immediately.
    pub fn started() -> Self {
        let mut timer = Self::new();
        timer.start();
        timer
    }

    pub fn start(&mut self) {
        self.start = Some(Instant::now());
        self.end = None;
    }

    pub fn stop(&mut self) {
        self.end = Some(Instant::now());
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_running(&self) -> bool {
        self.start.is_some() && self.end.is_none()
    }

    /// Time since `start`, or between `start` and `stop` once stopped.
    ///
    /// Reading an unstarted timer yields zero.
    pub fn elapsed(&self) -> Duration {
        match (self.start, self.end) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            (None, _) => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn elapsed_grows_while_running() {
        let timer = Timer::started();
        let first = timer.elapsed();
        thread::sleep(Duration::from_millis(5));
        assert!(timer.elapsed() > first);
        assert!(timer.is_running());
    }

    #[test]
    fn stop_freezes_elapsed() {
        let mut timer = Timer::started();
        thread::sleep(Duration::from_millis(5));
        timer.stop();
        let frozen = timer.elapsed();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(timer.elapsed(), frozen);
        assert!(!timer.is_running());
    }

    #[test]
    fn restart_clears_stop_mark() {
        let mut timer = Timer::started();
        timer.stop();
        timer.start();
        assert!(timer.is_running());
    }

    #[test]
    fn unstarted_timer_reads_zero() {
        assert_eq!(Timer::new().elapsed(), Duration::ZERO);
    }
}
