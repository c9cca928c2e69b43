use std::time::{Duration, Instant};

/// Wall-clock anchor for real-time pacing
///
/// A sample at `ts` is due at `base_wall + (ts - base_sample) / rate`.
#[derive(Debug, Clone, Copy)]
pub struct PacingClock {
    base_wall: Instant,
    base_sample: Option<Duration>,
}

impl PacingClock {
    pub fn new() -> Self {
        Self {
            base_wall: Instant::now(),
            base_sample: None,
        }
    }

    /// Re-anchor so that `sample` is due now
    pub fn anchor(&mut self, sample: Duration) {
        self.anchor_at(sample, Instant::now());
    }

    pub fn anchor_at(&mut self, sample: Duration, now: Instant) {
        self.base_wall = now;
        self.base_sample = Some(sample);
    }

    /// Forget the anchor; the next paced sample anchors again
    pub fn reset(&mut self) {
        self.base_wall = Instant::now();
        self.base_sample = None;
    }

    pub fn is_anchored(&self) -> bool {
        self.base_sample.is_some()
    }

    /// Time to wait before `ts` is due at the given rate
    pub fn sleep_time(&mut self, ts: Duration, rate: f64) -> Duration {
        self.sleep_time_at(ts, rate, Instant::now())
    }

    pub fn sleep_time_at(&mut self, ts: Duration, rate: f64, now: Instant) -> Duration {
        let base = match self.base_sample {
            Some(base) if ts >= base => base,
            // unanchored, or time went backwards across streams
            _ => {
                self.anchor_at(ts, now);
                return Duration::ZERO;
            }
        };
        if !(rate.is_finite() && rate > 0.0) {
            return Duration::ZERO;
        }

        let recorded = (ts - base).div_f64(rate);
        let elapsed = now.saturating_duration_since(self.base_wall);
        recorded.saturating_sub(elapsed)
    }
}

impl Default for PacingClock {
    fn default() -> Self {
        Self::new()
    }
}
