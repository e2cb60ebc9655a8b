//! Windowed throughput sampling

use std::time::Duration;
use tokio::time::Instant;

/// Minimum gap between two speed samples
pub const SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Computes bytes/second at most once per [`SAMPLE_WINDOW`]
///
/// Between samples the last computed speed is reused, so callers polling on
/// every chunk see a stable number instead of per-chunk spikes.
#[derive(Debug, Clone)]
pub struct SpeedSampler {
    last_at: Instant,
    last_bytes: u64,
    speed_bps: u64,
}

impl SpeedSampler {
    /// Start sampling at `now` with zero bytes
    pub fn new(now: Instant) -> Self {
        Self {
            last_at: now,
            last_bytes: 0,
            speed_bps: 0,
        }
    }

    /// Feed the running byte total; returns `Some(speed)` when a new sample was taken
    pub fn update(&mut self, total_bytes: u64, now: Instant) -> Option<u64> {
        let elapsed = now.saturating_duration_since(self.last_at);
        if elapsed < SAMPLE_WINDOW {
            return None;
        }
        let delta = total_bytes.saturating_sub(self.last_bytes);
        self.speed_bps = (delta as f64 / elapsed.as_secs_f64()) as u64;
        self.last_at = now;
        self.last_bytes = total_bytes;
        Some(self.speed_bps)
    }

    /// Most recent sample (cached inside the window)
    pub fn speed_bps(&self) -> u64 {
        self.speed_bps
    }
}
