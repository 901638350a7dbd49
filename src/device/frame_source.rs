use chrono::Utc;
use image::DynamicImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::common::frame::Frame;
use crate::error::CaptureError;

/// A device connection that can produce one raw screen image on demand.
///
/// Implementations must report connection loss as
/// [`CaptureError::ConnectionLost`]; the pipeline treats that as fatal
/// while every other failure is retried.
pub trait FrameSource: Send {
    fn capture(&mut self) -> Result<DynamicImage, CaptureError>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn capture(&mut self) -> Result<DynamicImage, CaptureError> {
        (**self).capture()
    }
}

/// Serializes access to the device connection and assigns sequence
/// numbers.
///
/// The capture loop and one-shot snapshots both go through the gate, so
/// device I/O is never interleaved. The sequence number is taken while
/// the device lock is still held, which is what makes a snapshot seq
/// strictly greater than that of every frame captured before it.
#[derive(Debug)]
pub struct SourceGate<S: FrameSource> {
    source: Mutex<S>,
    next_seq: AtomicU64,
}

impl<S: FrameSource> SourceGate<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Mutex::new(source),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Capture one frame and tag it with the next sequence number.
    pub fn capture_tagged(&self) -> Result<Frame, CaptureError> {
        let mut source = self.source.lock().unwrap();
        let image = source.capture()?;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Frame::new(seq, Utc::now(), image))
    }

    /// Highest sequence number handed out so far.
    pub fn last_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst)
    }
}
