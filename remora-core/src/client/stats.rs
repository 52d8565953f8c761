//! Video statistics for the client.
//!
//! Rates are computed over a rolling window of `(timestamp, amount)`
//! samples; latencies are exponentially smoothed.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Rolling-window rate estimator.
///
/// Records `(timestamp, amount)` samples and reports the average amount
/// per second over the most recent `window`.
#[derive(Debug, Clone)]
pub struct RateCounter {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    total: u64,
}

impl RateCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(256),
            window,
            total: 0,
        }
    }

    pub fn record(&mut self, amount: u64) {
        self.record_at(Instant::now(), amount);
    }

    /// Record with an explicit timestamp (useful for testing).
    pub fn record_at(&mut self, when: Instant, amount: u64) {
        self.samples.push_back((when, amount));
        self.total += amount;
        self.evict(when);
    }

    /// Amount per second over the window.
    pub fn rate(&self) -> f64 {
        let (Some((first, _)), Some((last, _))) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.duration_since(*first).max(Duration::from_millis(1));
        // n samples span n-1 intervals.
        let first_amount = self.samples.front().map_or(0, |s| s.1);
        let counted = if self.samples.len() > 1 {
            self.total - first_amount
        } else {
            self.total
        };
        counted as f64 / elapsed.as_secs_f64()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(ts, amount)) = self.samples.front() {
            if now.duration_since(ts) > self.window {
                self.samples.pop_front();
                self.total = self.total.saturating_sub(amount);
            } else {
                break;
            }
        }
    }
}

/// Exponential moving average, α = 1/8.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningAverage {
    value: Option<f64>,
}

impl RunningAverage {
    pub fn record(&mut self, sample: f64) {
        self.value = Some(match self.value {
            None => sample,
            Some(v) => v * 7.0 / 8.0 + sample / 8.0,
        });
    }

    pub fn value(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }
}

/// Point-in-time view of [`VideoStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub frames_per_second: f64,
    pub bytes_per_second: f64,
    /// Capture on the host to render on the client, in milliseconds.
    pub latency_ms: f64,
    pub decode_ms: f64,
    pub queue_depth: usize,
    pub decode_errors: u64,
}

#[derive(Debug, Clone)]
pub struct VideoStats {
    bandwidth: RateCounter,
    frame_rate: RateCounter,
    latency_ms: RunningAverage,
    decode_ms: RunningAverage,
    frames: u64,
    decode_errors: u64,
    queue_depth: usize,
}

impl Default for VideoStats {
    fn default() -> Self {
        Self {
            bandwidth: RateCounter::new(Duration::from_secs(1)),
            frame_rate: RateCounter::new(Duration::from_secs(1)),
            latency_ms: RunningAverage::default(),
            decode_ms: RunningAverage::default(),
            frames: 0,
            decode_errors: 0,
            queue_depth: 0,
        }
    }
}

impl VideoStats {
    pub fn record_packet(&mut self, bytes: usize, decode_time: Duration) {
        self.bandwidth.record(bytes as u64);
        self.decode_ms.record(decode_time.as_secs_f64() * 1000.0);
    }

    pub fn record_frame(&mut self, latency: Option<Duration>) {
        self.frames += 1;
        self.frame_rate.record(1);
        if let Some(latency) = latency {
            self.latency_ms.record(latency.as_secs_f64() * 1000.0);
        }
    }

    pub fn record_error(&mut self) {
        self.decode_errors += 1;
    }

    pub fn set_queue_depth(&mut self, depth: usize) {
        self.queue_depth = depth;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames,
            frames_per_second: self.frame_rate.rate(),
            bytes_per_second: self.bandwidth.rate(),
            latency_ms: self.latency_ms.value(),
            decode_ms: self.decode_ms.value(),
            queue_depth: self.queue_depth,
            decode_errors: self.decode_errors,
        }
    }
}
