use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every tunable the automation core consumes, grouped by component.
///
/// Values layer in three steps: compiled defaults, then an optional
/// TOML file, then `UMABOT_*` environment overrides (section and key
/// joined with `__`, e.g. `UMABOT_CAPTURE__INTERVAL_MS`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub device: DeviceSettings,
    pub capture: CaptureSettings,
    pub channels: ChannelSettings,
    pub vision: VisionSettings,
    pub engine: EngineSettings,
}

impl Settings {
    /// Load with the conventional `umabot.toml` next to the binary.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("umabot.toml"))
    }

    /// Load with an explicit settings file. A missing file is fine;
    /// the defaults and environment still apply.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("UMABOT").separator("__"))
            .build()?
            .try_deserialize()
    }
}

/// ADB connection and input parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub adb_bin: String,
    /// Serial or `host:port` of the emulator instance.
    pub adb_addr: String,
    /// How long one `screencap` invocation may take before it is
    /// killed and counted as a timeout.
    pub capture_timeout_ms: u64,
    /// Bound of the queued-action channel feeding the dispatch task.
    pub action_capacity: usize,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            adb_bin: "adb".to_string(),
            adb_addr: "127.0.0.1:16384".to_string(),
            capture_timeout_ms: 5000,
            action_capacity: 10,
        }
    }
}

/// Capture loop cadence, failure policy and pre-scale targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Target frame period of the producer loop.
    pub interval_ms: u64,
    /// Consecutive transient failures before the loop gives up.
    pub failure_threshold: u32,
    /// Window for collapsing repeated capture-failure logs.
    pub error_cooldown_ms: u64,
    /// Bounds the display variant is fitted into, aspect preserved.
    pub display_width: u32,
    pub display_height: u32,
    /// Width of the recognition variant; unset runs recognition at
    /// native resolution.
    pub recognition_width: Option<u32>,
    /// Nearest-neighbour scaling instead of the smoother filter.
    pub fast_scaling: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            failure_threshold: 5,
            error_cooldown_ms: 5000,
            display_width: 640,
            display_height: 640,
            recognition_width: Some(450),
            fast_scaling: true,
        }
    }
}

/// Bounds of the per-consumer frame rings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub display_capacity: usize,
    /// The engine only ever wants the freshest frame, so 1 suffices.
    pub recognition_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            display_capacity: 3,
            recognition_capacity: 1,
        }
    }
}

/// Recognition confidence defaults, overridable per probe in scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionSettings {
    pub template_threshold: f32,
    pub text_threshold: f32,
    /// Perceptual-hash distance above which the screen counts as
    /// changed; 0 disables change gating entirely.
    pub change_threshold: u32,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            template_threshold: 0.8,
            text_threshold: 0.7,
            change_threshold: 5,
        }
    }
}

/// Tick cadence, retry policy and run bounds of the automation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub tick_interval_ms: u64,
    /// Ticks without a fresher frame tolerated before the engine stops
    /// counting misses and just waits for capture to catch up.
    pub staleness_limit_ticks: u32,
    /// Consecutive misses at one state before the run is declared
    /// stuck.
    pub miss_threshold: u32,
    pub backoff_initial_ms: u64,
    pub backoff_factor: f64,
    pub backoff_max_ms: u64,
    /// Jitter fraction of the capped delay, `0.0..=1.0`.
    pub backoff_jitter: f64,
    /// Run-level bounds; `None` leaves the dimension unbounded.
    pub max_ticks: Option<u64>,
    pub max_runtime_ms: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            staleness_limit_ticks: 3,
            miss_threshold: 20,
            backoff_initial_ms: 500,
            backoff_factor: 1.5,
            backoff_max_ms: 5000,
            backoff_jitter: 0.1,
            max_ticks: None,
            max_runtime_ms: None,
        }
    }
}
