//! Fixed-interval request throttle.
//!
//! SEC asks for at most ten requests per second. Every outgoing request waits
//! until at least `interval` has passed since the previous one.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Throttle {
    last: Mutex<Option<Instant>>,
    interval: Duration,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            last: Mutex::new(None),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// How long a request issued now would have to wait.
    pub fn remaining(&self) -> Duration {
        let last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            None => Duration::ZERO,
            Some(at) => self.interval.saturating_sub(at.elapsed()),
        }
    }

    /// Block until the interval has elapsed, then mark a request as issued.
    pub fn wait(&self) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(at) = *last {
            let wait = self.interval.saturating_sub(at.elapsed());
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_does_not_wait() {
        let t = Throttle::new(Duration::from_secs(60));
        assert_eq!(t.remaining(), Duration::ZERO);
        let start = Instant::now();
        t.wait();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn second_request_is_spaced() {
        let t = Throttle::new(Duration::from_millis(20));
        t.wait();
        assert!(t.remaining() > Duration::ZERO);
        let start = Instant::now();
        t.wait();
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn remaining_drains_after_interval() {
        let t = Throttle::new(Duration::from_millis(5));
        t.wait();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(t.remaining(), Duration::ZERO);
    }
}
