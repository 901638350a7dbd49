use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free counters updated by the capture loop and sampled by
/// whoever wants a health readout.
#[derive(Debug)]
pub struct CaptureStats {
    started_at: Instant,
    captured: AtomicU64,
    errors: AtomicU64,
    snapshots: AtomicU64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            captured: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            snapshots: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_capture(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_snapshot(&self) {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        let uptime = self.started_at.elapsed();
        let captured = self.captured.load(Ordering::Relaxed);
        let fps = if uptime.as_secs_f64() > 0.0 {
            captured as f64 / uptime.as_secs_f64()
        } else {
            0.0
        };
        CaptureStatsSnapshot {
            captured,
            errors: self.errors.load(Ordering::Relaxed),
            snapshots: self.snapshots.load(Ordering::Relaxed),
            uptime,
            fps,
        }
    }
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the capture counters.
#[derive(Debug, Clone)]
pub struct CaptureStatsSnapshot {
    pub captured: u64,
    pub errors: u64,
    pub snapshots: u64,
    pub uptime: Duration,
    pub fps: f64,
}
