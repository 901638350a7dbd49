use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::capture::channel::FrameFanout;
use crate::capture::stats::CaptureStats;
use crate::common::frame::{Frame, FrameScaler, FrameSize};
use crate::config::CaptureSettings;
use crate::device::frame_source::{FrameSource, SourceGate};
use crate::error::{CaptureError, FatalCapture};

const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Health of the capture loop as seen by downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Running,
    /// Clean stop after cancellation.
    Stopped,
    /// The loop gave up and will produce no more frames.
    Failed(FatalCapture),
}

/// Owns the frame source and fans captured frames out to the channel
/// arena from a dedicated thread.
pub struct CapturePipeline<S: FrameSource + 'static> {
    gate: Arc<SourceGate<S>>,
    fanout: Arc<FrameFanout>,
    scaler: FrameScaler,
    interval: Duration,
    failure_threshold: u32,
    error_cooldown: Duration,
    stats: Arc<CaptureStats>,
}

impl<S: FrameSource + 'static> CapturePipeline<S> {
    pub fn new(gate: Arc<SourceGate<S>>, fanout: Arc<FrameFanout>, settings: &CaptureSettings) -> Self {
        let scaler = FrameScaler::new(
            FrameSize::new(settings.display_width, settings.display_height),
            settings.recognition_width,
            settings.fast_scaling,
        );
        Self {
            gate,
            fanout,
            scaler,
            interval: Duration::from_millis(settings.interval_ms),
            failure_threshold: settings.failure_threshold.max(1),
            error_cooldown: Duration::from_millis(settings.error_cooldown_ms),
            stats: Arc::new(CaptureStats::new()),
        }
    }

    /// Start the producer loop on its own thread.
    pub fn spawn(self, cancel: CancellationToken) -> CaptureHandle<S> {
        let (status_tx, status_rx) = watch::channel(CaptureStatus::Running);
        let gate = self.gate.clone();
        let stats = self.stats.clone();
        let loop_cancel = cancel.clone();
        let thread = std::thread::spawn(move || self.run_loop(loop_cancel, status_tx));
        CaptureHandle {
            gate,
            stats,
            cancel,
            status_rx,
            thread: Some(thread),
        }
    }

    fn run_loop(self, cancel: CancellationToken, status_tx: watch::Sender<CaptureStatus>) {
        tracing::info!("Capture loop started, interval {:?}", self.interval);
        let mut consecutive_failures: u32 = 0;
        let mut throttle = ErrorThrottle::new(self.error_cooldown);
        while !cancel.is_cancelled() {
            let cycle_start = Instant::now();
            match self.gate.capture_tagged() {
                Ok(frame) => {
                    consecutive_failures = 0;
                    self.stats.record_capture();
                    let set = self.scaler.scale(frame);
                    self.fanout.publish(&set);
                }
                Err(err) => {
                    self.stats.record_error();
                    if err.is_fatal() {
                        tracing::error!("Giving up on capture: {}", err);
                        let _ = status_tx
                            .send(CaptureStatus::Failed(FatalCapture::ConnectionLost(err.to_string())));
                        return;
                    }
                    consecutive_failures += 1;
                    if throttle.should_log() {
                        tracing::warn!("Capture failed ({} consecutive): {}", consecutive_failures, err);
                    }
                    if consecutive_failures >= self.failure_threshold {
                        tracing::error!(
                            "Capture failed {} times in a row, stopping pipeline",
                            consecutive_failures
                        );
                        let _ = status_tx.send(CaptureStatus::Failed(
                            FatalCapture::ConsecutiveFailures(consecutive_failures),
                        ));
                        return;
                    }
                }
            }
            if let Some(remaining) = pace_remaining(self.interval, cycle_start.elapsed()) {
                sleep_with_cancel(&cancel, remaining);
            }
        }
        tracing::info!("Capture loop stopped");
        let _ = status_tx.send(CaptureStatus::Stopped);
    }
}

/// Handle to a running capture loop. Dropping it stops the loop and
/// joins the thread.
pub struct CaptureHandle<S: FrameSource + 'static> {
    gate: Arc<SourceGate<S>>,
    stats: Arc<CaptureStats>,
    cancel: CancellationToken,
    status_rx: watch::Receiver<CaptureStatus>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl<S: FrameSource + 'static> CaptureHandle<S> {
    /// Capture a frame right now on the caller's thread, bypassing the
    /// distribution channels. The shared gate orders it after every
    /// frame the loop has published so far.
    pub fn capture_once(&self) -> Result<Frame, CaptureError> {
        let frame = self.gate.capture_tagged()?;
        self.stats.record_snapshot();
        Ok(frame)
    }

    pub fn status(&self) -> CaptureStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<CaptureStatus> {
        self.status_rx.clone()
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Block until the loop publishes a terminal status.
    pub async fn wait_terminal(&mut self) -> CaptureStatus {
        loop {
            let current = self.status_rx.borrow().clone();
            if current != CaptureStatus::Running {
                return current;
            }
            if self.status_rx.changed().await.is_err() {
                return self.status_rx.borrow().clone();
            }
        }
    }

    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Capture thread panicked");
            }
        }
    }
}

impl<S: FrameSource + 'static> Drop for CaptureHandle<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pace_remaining(interval: Duration, elapsed: Duration) -> Option<Duration> {
    // An overrunning cycle starts the next one immediately.
    interval.checked_sub(elapsed).filter(|d| !d.is_zero())
}

fn sleep_with_cancel(cancel: &CancellationToken, total: Duration) {
    let deadline = Instant::now() + total;
    while !cancel.is_cancelled() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        std::thread::sleep(remaining.min(CANCEL_POLL));
    }
}

/// Collapses repeated capture-failure logs to one per cooldown window.
struct ErrorThrottle {
    cooldown: Duration,
    last: Option<Instant>,
}

impl ErrorThrottle {
    fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: None,
        }
    }

    fn should_log(&mut self) -> bool {
        match self.last {
            Some(at) if at.elapsed() < self.cooldown => false,
            _ => {
                self.last = Some(Instant::now());
                true
            }
        }
    }
}
