use thiserror::Error;

// Main application error type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),
    #[error("Coordinator error: {0}")]
    Coordinator(String),
    #[error("{0}")]
    Usage(String),
}

/// Failure of a single capture attempt against the frame source.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture attempt timed out")]
    Timeout,
    #[error("Transient capture failure: {0}")]
    Transient(String),
    #[error("Device connection lost: {0}")]
    ConnectionLost(String),
    #[error("Failed to decode captured image: {0}")]
    Decode(String),
}

impl CaptureError {
    /// Connection loss cannot self-heal; everything else is retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::ConnectionLost(_))
    }
}

/// Reason the capture pipeline stopped producing frames for good.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FatalCapture {
    #[error("device connection lost: {0}")]
    ConnectionLost(String),
    #[error("{0} consecutive capture failures")]
    ConsecutiveFailures(u32),
}

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Failed to read script `{path}`: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse script: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Script defines no states")]
    Empty,
    #[error("Entry state `{0}` is not defined")]
    UnknownEntry(String),
    #[error("State id `{0}` is reserved for the engine's terminal state")]
    ReservedStateId(String),
    #[error("Probe id `{probe}` in state `{state}` is reserved; no-match handling is the engine's retry policy")]
    ReservedProbeId { state: String, probe: String },
    #[error("State `{state}` declares probe `{probe}` more than once")]
    DuplicateProbe { state: String, probe: String },
    #[error("Probe `{probe}` in state `{state}` has threshold {value} outside 0.0..=1.0")]
    ThresholdOutOfRange {
        state: String,
        probe: String,
        value: f32,
    },
    #[error("State `{state}` has a transition on unknown probe `{probe}`")]
    UnknownProbe { state: String, probe: String },
    #[error("State `{state}` transitions to unknown state `{next}`")]
    UnknownNextState { state: String, next: String },
    #[error("Terminal state `stopped` is unreachable from entry `{0}`")]
    StoppedUnreachable(String),
    #[error("State `{state}` references template `{template}` with no loaded asset")]
    MissingTemplate { state: String, template: String },
    #[error("Script uses text probes but no glyph set is loaded")]
    NoGlyphs,
    #[error("Failed to load asset `{path}`: {reason}")]
    Asset { path: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to spawn input command: {0}")]
    Spawn(std::io::Error),
    #[error("Input command failed: {0}")]
    Command(String),
}
