pub mod channel;
pub mod pipeline;
pub mod stats;

pub use channel::{FrameFanout, FrameRing, OverflowPolicy};
pub use pipeline::{CaptureHandle, CapturePipeline, CaptureStatus};
pub use stats::{CaptureStats, CaptureStatsSnapshot};
