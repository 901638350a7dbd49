use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::channel::{FrameFanout, FrameRing};
use crate::capture::pipeline::{CaptureHandle, CapturePipeline};
use crate::capture::stats::CaptureStatsSnapshot;
use crate::common::frame::Frame;
use crate::config::Settings;
use crate::device::adb::{AdbFrameSource, AdbInput};
use crate::device::controller::{spawn_dispatch_task, DeviceControl};
use crate::device::frame_source::{FrameSource, SourceGate};
use crate::engine::automation::{AutomationEngine, RunOutcome};
use crate::engine::events::{EventSink, TracingSink};
use crate::error::{AppError, CaptureError};
use crate::script::loader::CompiledScript;
use crate::vision::change::ScreenChangeDetector;

/// Owns one wired-up automation run: the capture thread, the device
/// dispatch task and the engine, all sharing one cancellation token.
///
/// Built by [`CoordinatorBuilder`]; consumed by [`Coordinator::run`].
pub struct Coordinator {
    capture: CaptureHandle<Box<dyn FrameSource>>,
    fanout: Arc<FrameFanout>,
    engine: AutomationEngine,
    device_task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Token an external controller cancels to request a stop. The
    /// engine observes it at its next tick boundary.
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The ring a presentation consumer reads preview frames from.
    pub fn display_frames(&self) -> FrameRing {
        self.fanout.display().clone()
    }

    /// One-shot snapshot straight from the device, bypassing the
    /// channels.
    pub fn snapshot(&self) -> Result<Frame, CaptureError> {
        self.capture.capture_once()
    }

    pub fn capture_stats(&self) -> CaptureStatsSnapshot {
        self.capture.stats().snapshot()
    }

    /// Drive the loaded script to its terminal outcome, then wind the
    /// capture thread and device task down.
    pub async fn run(mut self) -> Result<RunOutcome, AppError> {
        let engine_task = tokio::spawn(self.engine.run());
        let result = engine_task.await;

        // The engine held the only action sender, so the queue is
        // closed now; the device task drains what was already queued
        // before it exits. A cancelled run skips the drain.
        if self.device_task.await.is_err() {
            tracing::error!("Device dispatch task panicked");
        }
        self.cancel.cancel();
        self.capture.stop();

        result.map_err(|e| AppError::Coordinator(format!("engine task failed: {}", e)))
    }
}

/// Assembles a [`Coordinator`] from settings plus a compiled script,
/// with injection points for every external collaborator.
///
/// Must be built inside a tokio runtime; the device dispatch task is
/// spawned during `build`.
pub struct CoordinatorBuilder {
    settings: Settings,
    script: Option<CompiledScript>,
    frame_source: Option<Box<dyn FrameSource>>,
    device_control: Option<Arc<dyn DeviceControl>>,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl CoordinatorBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            script: None,
            frame_source: None,
            device_control: None,
            event_sink: None,
        }
    }

    pub fn script(mut self, script: CompiledScript) -> Self {
        self.script = Some(script);
        self
    }

    /// Replace the ADB frame source, e.g. with a stub for tests.
    pub fn frame_source(mut self, source: Box<dyn FrameSource>) -> Self {
        self.frame_source = Some(source);
        self
    }

    /// Replace the ADB input backend.
    pub fn device_control(mut self, control: Arc<dyn DeviceControl>) -> Self {
        self.device_control = Some(control);
        self
    }

    /// Replace the default log-only event sink with a persistence
    /// collaborator.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<Coordinator, AppError> {
        let script = self
            .script
            .ok_or_else(|| AppError::Coordinator("Script not provided".to_string()))?;

        let cancel = CancellationToken::new();
        let source = self
            .frame_source
            .unwrap_or_else(|| Box::new(AdbFrameSource::new(&self.settings.device)));
        let control = self
            .device_control
            .unwrap_or_else(|| Arc::new(AdbInput::new(&self.settings.device)));
        let sink = self.event_sink.unwrap_or_else(|| Arc::new(TracingSink));

        let gate = Arc::new(SourceGate::new(source));
        let fanout = Arc::new(FrameFanout::new(&self.settings.channels));
        let pipeline = CapturePipeline::new(gate, fanout.clone(), &self.settings.capture);
        let capture = pipeline.spawn(cancel.clone());

        let (dispatcher, device_task) = spawn_dispatch_task(
            control,
            self.settings.device.action_capacity,
            cancel.clone(),
        );

        let mut engine = AutomationEngine::new(
            script,
            fanout.recognition().clone(),
            capture.subscribe_status(),
            dispatcher,
            sink,
            self.settings.engine.clone(),
            cancel.clone(),
        );
        if self.settings.vision.change_threshold > 0 {
            engine = engine.with_change_detector(ScreenChangeDetector::new(
                self.settings.vision.change_threshold,
            ));
        }

        Ok(Coordinator {
            capture,
            fanout,
            engine,
            device_task,
            cancel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VisionSettings;
    use crate::device::controller::ActionRequest;
    use crate::error::DeviceError;
    use crate::script::definition::ScriptDefinition;
    use crate::script::loader::{compile, ScriptAssets};
    use async_trait::async_trait;
    use image::{DynamicImage, GrayImage, Luma};
    use std::sync::Mutex;
    use std::time::Duration;

    struct StaticSource {
        image: DynamicImage,
    }

    impl FrameSource for StaticSource {
        fn capture(&mut self) -> Result<DynamicImage, CaptureError> {
            Ok(self.image.clone())
        }
    }

    struct RecordingControl {
        performed: Mutex<Vec<ActionRequest>>,
    }

    impl RecordingControl {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                performed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DeviceControl for RecordingControl {
        async fn perform(&self, request: ActionRequest) -> Result<(), DeviceError> {
            self.performed.lock().unwrap().push(request);
            Ok(())
        }
    }

    fn anchor() -> GrayImage {
        GrayImage::from_fn(10, 10, |x, y| {
            if (x / 2 + y / 2) % 2 == 0 {
                Luma([240])
            } else {
                Luma([15])
            }
        })
    }

    fn screen_with_anchor(present: bool) -> DynamicImage {
        let mut image = GrayImage::from_fn(64, 64, |x, y| Luma([((x * 3 + y * 5) % 97) as u8]));
        if present {
            let patch = anchor();
            for y in 0..patch.height() {
                for x in 0..patch.width() {
                    image.put_pixel(20 + x, 20 + y, *patch.get_pixel(x, y));
                }
            }
        }
        DynamicImage::ImageLuma8(image)
    }

    fn one_state_script() -> CompiledScript {
        let json = r#"{
            "name": "single",
            "entry": "find_anchor",
            "states": {
                "find_anchor": {
                    "probes": [
                        { "id": "anchor", "type": "template", "template": "anchor", "threshold": 0.9 }
                    ],
                    "on": [
                        { "probe": "anchor", "next": "stopped", "action": { "type": "tap", "x": 25, "y": 25 } }
                    ]
                }
            }
        }"#;
        let definition = ScriptDefinition::from_json(json).unwrap();
        let mut assets = ScriptAssets::new();
        assets.insert_template("anchor", anchor());
        compile(definition, assets, &VisionSettings::default()).unwrap()
    }

    fn fast_settings() -> Settings {
        let mut settings = Settings::default();
        settings.capture.interval_ms = 5;
        settings.capture.display_width = 16;
        settings.capture.display_height = 16;
        settings.capture.recognition_width = None;
        settings.engine.tick_interval_ms = 1;
        settings.engine.backoff_initial_ms = 1;
        settings.engine.backoff_max_ms = 5;
        settings.engine.miss_threshold = 200;
        settings.vision.change_threshold = 0;
        settings
    }

    #[tokio::test]
    async fn run_completes_and_taps_the_anchor() {
        let control = RecordingControl::new();
        let coordinator = CoordinatorBuilder::new(fast_settings())
            .script(one_state_script())
            .frame_source(Box::new(StaticSource {
                image: screen_with_anchor(true),
            }))
            .device_control(control.clone())
            .build()
            .unwrap();

        let outcome = coordinator.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(
            control.performed.lock().unwrap().as_slice(),
            [ActionRequest::Tap {
                at: crate::common::geometry::Point::new(25, 25)
            }]
        );
    }

    #[tokio::test]
    async fn stop_token_cancels_a_run_that_never_matches() {
        let coordinator = CoordinatorBuilder::new(fast_settings())
            .script(one_state_script())
            .frame_source(Box::new(StaticSource {
                image: screen_with_anchor(false),
            }))
            .device_control(RecordingControl::new())
            .build()
            .unwrap();

        let stop = coordinator.stop_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            stop.cancel();
        });

        let outcome = coordinator.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);
    }

    #[tokio::test]
    async fn display_ring_feeds_a_presentation_consumer() {
        let coordinator = CoordinatorBuilder::new(fast_settings())
            .script(one_state_script())
            .frame_source(Box::new(StaticSource {
                image: screen_with_anchor(true),
            }))
            .device_control(RecordingControl::new())
            .build()
            .unwrap();

        let display = coordinator.display_frames();
        for _ in 0..200 {
            if display.consume_latest().is_some() {
                let _ = coordinator.run().await.unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no display frame arrived");
    }

    #[tokio::test]
    async fn build_without_a_script_fails() {
        let err = CoordinatorBuilder::new(fast_settings())
            .frame_source(Box::new(StaticSource {
                image: screen_with_anchor(false),
            }))
            .build()
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, AppError::Coordinator(_)));
    }
}
