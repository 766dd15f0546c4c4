//! Per-queue counters and latency averages
//!
//! Counters are plain atomics; the latency averages use exponential decay
//! with a lock-free scalar update (CAS loop over the f64 bit pattern).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const EMA_ALPHA: f64 = 0.1;

/// Exponentially-decayed moving average stored as f64 bits in an atomic.
#[derive(Debug, Default)]
pub struct Ema {
    bits: AtomicU64,
    seeded: AtomicU64,
}

impl Ema {
    pub fn record(&self, sample: f64) {
        if self.seeded.swap(1, Ordering::AcqRel) == 0 {
            self.bits.store(sample.to_bits(), Ordering::Release);
            return;
        }
        loop {
            let current_bits = self.bits.load(Ordering::Acquire);
            let current = f64::from_bits(current_bits);
            let next = current + EMA_ALPHA * (sample - current);
            if self
                .bits
                .compare_exchange_weak(
                    current_bits,
                    next.to_bits(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return;
            }
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

/// Shared metrics for one queue.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    pub picked: AtomicU64,
    pub completed: AtomicU64,
    pub retried: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub stale_recovered: AtomicU64,
    pub avg_wait_ms: Ema,
    pub avg_processing_ms: Ema,
}

impl QueueMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_pick(&self) {
        self.picked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_complete(&self, wait_ms: f64, processing_ms: f64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.avg_wait_ms.record(wait_ms);
        self.avg_processing_ms.record(processing_ms);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letter(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self, count: u64) {
        self.stale_recovered.fetch_add(count, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_first_sample_seeds() {
        let ema = Ema::default();
        ema.record(100.0);
        assert_eq!(ema.get(), 100.0);
    }

    #[test]
    fn test_ema_decays_towards_samples() {
        let ema = Ema::default();
        ema.record(100.0);
        ema.record(200.0);
        let v = ema.get();
        assert!(v > 100.0 && v < 200.0, "got {v}");
    }

    #[test]
    fn test_counters() {
        let m = QueueMetrics::default();
        m.record_pick();
        m.record_complete(5.0, 10.0);
        m.record_retry();
        m.record_dead_letter();
        m.record_stale(3);
        assert_eq!(m.picked.load(Ordering::Relaxed), 1);
        assert_eq!(m.completed.load(Ordering::Relaxed), 1);
        assert_eq!(m.retried.load(Ordering::Relaxed), 1);
        assert_eq!(m.dead_lettered.load(Ordering::Relaxed), 1);
        assert_eq!(m.stale_recovered.load(Ordering::Relaxed), 3);
    }
}
