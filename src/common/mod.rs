pub mod frame;
pub mod geometry;

pub use frame::{Frame, FrameScaler, FrameSize, ScaledFrameSet};
pub use geometry::{Point, Region};
