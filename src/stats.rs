use std::time::{Duration, Instant};

use tracing::info;

/// Counters for one payload stream.
#[derive(Debug, Clone)]
pub struct TransferStats {
    pub bytes: u64,
    pub chunks: u64,
    t0: Instant,
    elapsed: Option<Duration>,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            bytes: 0,
            chunks: 0,
            t0: Instant::now(),
            elapsed: None,
        }
    }

    pub fn add_chunk(&mut self, n: usize) {
        self.bytes += n as u64;
        self.chunks += 1;
    }

    /// Freeze the clock; later calls keep the first value.
    pub fn finish(&mut self) -> Duration {
        *self.elapsed.get_or_insert_with(|| self.t0.elapsed())
    }

    pub fn duration(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.t0.elapsed())
    }

    pub fn rate_kbps(&self) -> f64 {
        let dur = self.duration().as_secs_f64().max(1e-3);
        (self.bytes as f64) / dur / 1000.0
    }

    pub fn log(&self, dir: &str) {
        info!(
            "[{}] bytes={} chunks={} over {:.2}s => {:.1}kB/s",
            dir,
            self.bytes,
            self.chunks,
            self.duration().as_secs_f64(),
            self.rate_kbps()
        );
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
