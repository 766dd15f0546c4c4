//! Sampling-window circuit breaker
//!
//! Watches the failure ratio over a sliding window: with at least 10
//! samples in the last 60 s, the circuit opens once ≥80 % of them are
//! throttle-class failures (429/503). An open circuit rejects calls for
//! 15 s, then closes and starts sampling again.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const SAMPLING_WINDOW: Duration = Duration::from_secs(60);
const MIN_SAMPLES: usize = 10;
const FAILURE_RATIO: f64 = 0.8;
const BREAK_DURATION: Duration = Duration::from_secs(15);

#[derive(Debug)]
struct Sample {
    at: Instant,
    throttled: bool,
}

#[derive(Debug)]
struct Inner {
    samples: VecDeque<Sample>,
    open_until: Option<Instant>,
}

/// Thread-safe breaker shared by every caller of one provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                samples: VecDeque::new(),
                open_until: None,
            }),
        }
    }

    /// Whether a call may proceed right now.
    pub fn is_available(&self) -> bool {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return true; // poisoned mutex: allow the request
        };

        if let Some(until) = inner.open_until {
            if now < until {
                return false;
            }
            inner.open_until = None;
            inner.samples.clear();
        }
        true
    }

    /// Record the outcome of one attempt. `throttled` marks 429/503-class
    /// failures; other outcomes count as healthy samples.
    pub fn record(&self, throttled: bool) {
        self.record_at(Instant::now(), throttled);
    }

    fn record_at(&self, now: Instant, throttled: bool) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        inner.samples.push_back(Sample { at: now, throttled });
        while let Some(front) = inner.samples.front() {
            if now.duration_since(front.at) > SAMPLING_WINDOW {
                inner.samples.pop_front();
            } else {
                break;
            }
        }

        let total = inner.samples.len();
        if total < MIN_SAMPLES {
            return;
        }
        let throttled_count = inner.samples.iter().filter(|s| s.throttled).count();
        let ratio = throttled_count as f64 / total as f64;
        if ratio >= FAILURE_RATIO && inner.open_until.is_none() {
            tracing::warn!(
                samples = total,
                throttled = throttled_count,
                "Embedding circuit opened for {}s",
                BREAK_DURATION.as_secs()
            );
            inner.open_until = Some(now + BREAK_DURATION);
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_by_default() {
        let cb = CircuitBreaker::new();
        assert!(cb.is_available());
    }

    #[test]
    fn test_few_failures_do_not_open() {
        let cb = CircuitBreaker::new();
        let now = Instant::now();
        for _ in 0..MIN_SAMPLES - 1 {
            cb.record_at(now, true);
        }
        assert!(cb.check_at(now));
    }

    #[test]
    fn test_opens_at_ratio_threshold() {
        let cb = CircuitBreaker::new();
        let now = Instant::now();
        // 8 throttled + 2 healthy of 10 samples = exactly 80%
        for _ in 0..8 {
            cb.record_at(now, true);
        }
        for _ in 0..2 {
            cb.record_at(now, false);
        }
        assert!(!cb.check_at(now));
    }

    #[test]
    fn test_healthy_majority_keeps_closed() {
        let cb = CircuitBreaker::new();
        let now = Instant::now();
        for _ in 0..7 {
            cb.record_at(now, true);
        }
        for _ in 0..5 {
            cb.record_at(now, false);
        }
        assert!(cb.check_at(now));
    }

    #[test]
    fn test_closes_after_break_duration() {
        let cb = CircuitBreaker::new();
        let now = Instant::now();
        for _ in 0..MIN_SAMPLES {
            cb.record_at(now, true);
        }
        assert!(!cb.check_at(now));
        assert!(cb.check_at(now + BREAK_DURATION + Duration::from_millis(1)));
    }

    #[test]
    fn test_old_samples_age_out() {
        let cb = CircuitBreaker::new();
        let start = Instant::now();
        for _ in 0..MIN_SAMPLES - 1 {
            cb.record_at(start, true);
        }
        // One more throttled sample, but far enough in the future that the
        // earlier ones have left the window.
        let later = start + SAMPLING_WINDOW + Duration::from_secs(1);
        cb.record_at(later, true);
        assert!(cb.check_at(later));
    }
}
