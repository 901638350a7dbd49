pub mod adb;
pub mod controller;
pub mod frame_source;

pub use adb::{AdbFrameSource, AdbInput};
pub use controller::{ActionDispatcher, ActionRequest, DeviceControl};
pub use frame_source::{FrameSource, SourceGate};
