//! Scoped elapsed-time measurement.

use std::time::{Duration, Instant};

use tracing::info;

/// Measures one unit of work and logs its duration when finished.
#[derive(Debug)]
pub struct Stopwatch {
    label: &'static str,
    fhr: Option<u32>,
    start: Instant,
}

impl Stopwatch {
    pub fn start(label: &'static str, fhr: Option<u32>) -> Self {
        Self {
            label,
            fhr,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop and log the elapsed time.
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        info!(
            label = self.label,
            fhr = ?self.fhr,
            elapsed_secs = elapsed.as_secs_f64(),
            "Elapsed time"
        );
        elapsed
    }
}
