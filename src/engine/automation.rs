use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::capture::channel::FrameRing;
use crate::capture::pipeline::CaptureStatus;
use crate::common::frame::ScaledFrameSet;
use crate::config::EngineSettings;
use crate::device::controller::ActionDispatcher;
use crate::engine::backoff::Backoff;
use crate::engine::events::{EventSink, RunEvent};
use crate::engine::session::RunSession;
use crate::error::FatalCapture;
use crate::script::definition::STOPPED_STATE;
use crate::script::loader::CompiledScript;
use crate::vision::change::ScreenChangeDetector;
use crate::vision::probe::{evaluate_probes, ProbeOutcome};

/// Why a run reached its terminal state.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The script transitioned into `stopped`.
    Completed,
    /// One state exhausted the consecutive-miss budget.
    StateStuck { state: String, last_outcome: String },
    /// The capture pipeline died underneath the run.
    FatalCapture(FatalCapture),
    Cancelled,
    TimedOut,
}

enum Flow {
    Pause(Duration),
    Terminal(RunOutcome),
}

/// Drives a compiled script against the recognition frame channel.
///
/// All work happens in discrete ticks; cancellation, timeouts and
/// capture health are observed only at tick boundaries, so a tick that
/// has started always finishes what it was doing.
pub struct AutomationEngine {
    script: CompiledScript,
    frames: FrameRing,
    capture_status: watch::Receiver<CaptureStatus>,
    dispatcher: ActionDispatcher,
    sink: Arc<dyn EventSink>,
    settings: EngineSettings,
    cancel: CancellationToken,
    change: Option<ScreenChangeDetector>,
    latest: Option<ScaledFrameSet>,
    last_was_miss: bool,
}

impl AutomationEngine {
    pub fn new(
        script: CompiledScript,
        frames: FrameRing,
        capture_status: watch::Receiver<CaptureStatus>,
        dispatcher: ActionDispatcher,
        sink: Arc<dyn EventSink>,
        settings: EngineSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            script,
            frames,
            capture_status,
            dispatcher,
            sink,
            settings,
            cancel,
            change: None,
            latest: None,
            last_was_miss: false,
        }
    }

    /// Skip probe evaluation on ticks where the screen has not moved
    /// since the previous no-match verdict.
    pub fn with_change_detector(mut self, detector: ScreenChangeDetector) -> Self {
        self.change = Some(detector);
        self
    }

    /// Drive the script from its entry state to a terminal outcome.
    pub async fn run(mut self) -> RunOutcome {
        let mut session = RunSession::new(&self.script.name, self.script.entry());
        let mut backoff = Backoff::from_settings(&self.settings);
        tracing::info!(
            "Run {} starting script `{}` at state `{}`",
            session.run_id(),
            session.script_name(),
            session.current()
        );
        self.sink.record(RunEvent::StateEntered {
            run_id: session.run_id(),
            state: session.current().to_string(),
            tick: 0,
            at: Utc::now(),
        });

        loop {
            match self.tick(&mut session, &mut backoff) {
                Flow::Pause(delay) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Flow::Terminal(outcome) => {
                    tracing::info!(
                        "Run {} finished after {} ticks: {:?}",
                        session.run_id(),
                        session.ticks(),
                        outcome
                    );
                    self.sink.record(RunEvent::RunTerminated {
                        run_id: session.run_id(),
                        outcome: outcome.clone(),
                        ticks: session.ticks(),
                        at: Utc::now(),
                    });
                    return outcome;
                }
            }
        }
    }

    /// One pass of the recognize-decide-act loop.
    fn tick(&mut self, session: &mut RunSession, backoff: &mut Backoff) -> Flow {
        if self.cancel.is_cancelled() {
            return Flow::Terminal(RunOutcome::Cancelled);
        }
        if self.timed_out(session) {
            return Flow::Terminal(RunOutcome::TimedOut);
        }
        if let CaptureStatus::Failed(reason) = self.capture_status.borrow().clone() {
            return Flow::Terminal(RunOutcome::FatalCapture(reason));
        }

        let tick = session.begin_tick();

        let fresh = match self.frames.consume_latest() {
            Some(set) => {
                let fresh = session.observe_seq(set.seq());
                self.latest = Some(set);
                fresh
            }
            None => {
                session.note_missing_frame();
                false
            }
        };
        let Some(latest) = self.latest.clone() else {
            tracing::debug!("Tick {}: no frame captured yet", tick);
            return Flow::Pause(backoff.next_delay());
        };
        if !fresh && session.stale_ticks() > self.settings.staleness_limit_ticks {
            tracing::debug!(
                "Tick {}: frame {} stale for {} ticks, waiting for capture",
                tick,
                latest.seq(),
                session.stale_ticks()
            );
            return Flow::Pause(backoff.next_delay());
        }

        let screen_changed = match self.change.as_mut() {
            Some(detector) if fresh => detector.observe(latest.recognition()),
            Some(_) => false,
            None => true,
        };

        let (outcome, transition) = {
            let Some(state) = self.script.state(session.current()) else {
                tracing::error!("State `{}` missing from script", session.current());
                return Flow::Terminal(RunOutcome::StateStuck {
                    state: session.current().to_string(),
                    last_outcome: "state missing from script".to_string(),
                });
            };
            let outcome = if screen_changed || !self.last_was_miss {
                evaluate_probes(&state.probes, &latest, self.script.assets())
            } else {
                tracing::debug!("Tick {}: screen static, keeping previous verdict", tick);
                ProbeOutcome::NoMatch { seq: latest.seq() }
            };
            let transition = match &outcome {
                ProbeOutcome::Hit { probe_id, .. } => state.transition_for(probe_id).cloned(),
                ProbeOutcome::NoMatch { .. } => None,
            };
            (outcome, transition)
        };
        self.last_was_miss = matches!(outcome, ProbeOutcome::NoMatch { .. });

        match (&outcome, transition) {
            (ProbeOutcome::Hit { probe_id, .. }, Some(transition)) => {
                session.clear_misses();
                backoff.reset();
                if let Some(action) = transition.action.clone() {
                    if self.dispatcher.dispatch(action.clone()) {
                        self.sink.record(RunEvent::ActionIssued {
                            run_id: session.run_id(),
                            state: session.current().to_string(),
                            action,
                            tick,
                            at: Utc::now(),
                        });
                    }
                }
                if transition.next == STOPPED_STATE {
                    tracing::info!("Probe `{}` completed the script", probe_id);
                    return Flow::Terminal(RunOutcome::Completed);
                }
                tracing::info!(
                    "State `{}` -> `{}` via probe `{}`",
                    session.current(),
                    transition.next,
                    probe_id
                );
                session.enter(&transition.next);
                self.sink.record(RunEvent::StateEntered {
                    run_id: session.run_id(),
                    state: transition.next.clone(),
                    tick,
                    at: Utc::now(),
                });
                Flow::Pause(self.tick_interval())
            }
            _ => {
                let misses = session.record_miss();
                if misses >= self.settings.miss_threshold.max(1) {
                    let reason = describe_outcome(&outcome);
                    tracing::warn!(
                        "State `{}` exhausted {} attempts, last outcome: {}",
                        session.current(),
                        misses,
                        reason
                    );
                    return Flow::Terminal(RunOutcome::StateStuck {
                        state: session.current().to_string(),
                        last_outcome: reason,
                    });
                }
                tracing::debug!(
                    "Tick {}: {} ({}/{})",
                    tick,
                    describe_outcome(&outcome),
                    misses,
                    self.settings.miss_threshold
                );
                Flow::Pause(backoff.next_delay())
            }
        }
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.settings.tick_interval_ms)
    }

    fn timed_out(&self, session: &RunSession) -> bool {
        if let Some(max_ticks) = self.settings.max_ticks {
            if session.ticks() >= max_ticks {
                return true;
            }
        }
        if let Some(max_runtime_ms) = self.settings.max_runtime_ms {
            if session.elapsed() >= Duration::from_millis(max_runtime_ms) {
                return true;
            }
        }
        false
    }
}

fn describe_outcome(outcome: &ProbeOutcome) -> String {
    match outcome {
        ProbeOutcome::Hit { probe_id, .. } => {
            format!("probe `{}` hit without a transition rule", probe_id)
        }
        ProbeOutcome::NoMatch { seq } => format!("no probe matched frame {}", seq),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::channel::OverflowPolicy;
    use crate::common::frame::Frame;
    use crate::config::VisionSettings;
    use crate::device::controller::ActionRequest;
    use crate::script::definition::ScriptDefinition;
    use crate::script::loader::{compile, ScriptAssets};
    use image::{DynamicImage, GrayImage, Luma};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    const MENU_AT: (u32, u32) = (10, 8);
    const CONFIRM_AT: (u32, u32) = (40, 30);

    struct CollectingSink {
        events: Mutex<Vec<RunEvent>>,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<RunEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventSink for CollectingSink {
        fn record(&self, event: RunEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn checker(seed: u32) -> GrayImage {
        GrayImage::from_fn(10, 10, |x, y| {
            if ((x + seed) / 2 + (y + seed) / 2) % 2 == 0 {
                Luma([240])
            } else {
                Luma([15])
            }
        })
    }

    fn screen(with_menu: bool, with_confirm: bool) -> DynamicImage {
        let mut image = GrayImage::from_fn(64, 64, |x, y| Luma([((x * 3 + y * 5) % 97) as u8]));
        if with_menu {
            let patch = checker(0);
            for y in 0..patch.height() {
                for x in 0..patch.width() {
                    image.put_pixel(MENU_AT.0 + x, MENU_AT.1 + y, *patch.get_pixel(x, y));
                }
            }
        }
        if with_confirm {
            let patch = checker(1);
            for y in 0..patch.height() {
                for x in 0..patch.width() {
                    image.put_pixel(CONFIRM_AT.0 + x, CONFIRM_AT.1 + y, *patch.get_pixel(x, y));
                }
            }
        }
        DynamicImage::ImageLuma8(image)
    }

    fn test_script() -> CompiledScript {
        let json = r#"{
            "name": "walkthrough",
            "entry": "scan_menu",
            "states": {
                "scan_menu": {
                    "probes": [
                        { "id": "menu", "type": "template", "template": "menu", "threshold": 0.9 }
                    ],
                    "on": [
                        { "probe": "menu", "next": "confirm", "action": { "type": "tap", "x": 15, "y": 13 } }
                    ]
                },
                "confirm": {
                    "probes": [
                        { "id": "go", "type": "template", "template": "confirm", "threshold": 0.9 }
                    ],
                    "on": [
                        { "probe": "go", "next": "stopped", "action": { "type": "tap", "x": 45, "y": 35 } }
                    ]
                }
            }
        }"#;
        let definition = ScriptDefinition::from_json(json).unwrap();
        let mut assets = ScriptAssets::new();
        assets.insert_template("menu", checker(0));
        assets.insert_template("confirm", checker(1));
        compile(definition, assets, &VisionSettings::default()).unwrap()
    }

    fn test_settings() -> EngineSettings {
        EngineSettings {
            tick_interval_ms: 1,
            staleness_limit_ticks: 3,
            miss_threshold: 10,
            backoff_initial_ms: 1,
            backoff_factor: 1.5,
            backoff_max_ms: 5,
            backoff_jitter: 0.0,
            max_ticks: None,
            max_runtime_ms: None,
        }
    }

    struct Harness {
        engine: AutomationEngine,
        session: RunSession,
        backoff: Backoff,
        frames: FrameRing,
        status_tx: watch::Sender<CaptureStatus>,
        action_rx: mpsc::Receiver<ActionRequest>,
        cancel: CancellationToken,
        sink: Arc<CollectingSink>,
        next_seq: u64,
    }

    impl Harness {
        fn new(settings: EngineSettings) -> Self {
            let script = test_script();
            let frames = FrameRing::new("recognition", 4, OverflowPolicy::LatestWins);
            let (status_tx, status_rx) = watch::channel(CaptureStatus::Running);
            let (action_tx, action_rx) = mpsc::channel(8);
            let cancel = CancellationToken::new();
            let sink = CollectingSink::new();
            let entry = script.entry().to_string();
            let engine = AutomationEngine::new(
                script,
                frames.clone(),
                status_rx,
                ActionDispatcher::new(action_tx),
                sink.clone(),
                settings,
                cancel.clone(),
            );
            Self {
                engine,
                session: RunSession::new("walkthrough", &entry),
                backoff: Backoff::new(Duration::from_millis(1), 1.5, Duration::from_millis(5), 0.0),
                frames,
                status_tx,
                action_rx,
                cancel,
                sink,
                next_seq: 0,
            }
        }

        fn publish(&mut self, image: DynamicImage) {
            self.next_seq += 1;
            self.frames
                .publish(ScaledFrameSet::native(Frame::new(self.next_seq, Utc::now(), image)));
        }

        fn tick(&mut self) -> Flow {
            self.engine.tick(&mut self.session, &mut self.backoff)
        }

        fn expect_pause(&mut self) {
            match self.tick() {
                Flow::Pause(_) => {}
                Flow::Terminal(outcome) => panic!("expected pause, run ended: {:?}", outcome),
            }
        }

        fn expect_terminal(&mut self) -> RunOutcome {
            match self.tick() {
                Flow::Terminal(outcome) => outcome,
                Flow::Pause(_) => panic!("expected the run to end"),
            }
        }
    }

    #[tokio::test]
    async fn walks_menu_to_confirm_to_stopped() {
        let mut harness = Harness::new(test_settings());

        // Two ticks on screens without the menu anchor: misses, no
        // taps, no state movement.
        harness.publish(screen(false, false));
        harness.expect_pause();
        harness.publish(screen(false, false));
        harness.expect_pause();
        assert_eq!(harness.session.current(), "scan_menu");
        assert_eq!(harness.session.consecutive_misses(), 2);
        assert!(harness.action_rx.try_recv().is_err());

        // Third tick sees the menu: tap issued, state advances, the
        // miss streak clears.
        harness.publish(screen(true, false));
        harness.expect_pause();
        assert_eq!(harness.session.current(), "confirm");
        assert_eq!(harness.session.consecutive_misses(), 0);
        assert_eq!(
            harness.action_rx.try_recv().unwrap(),
            ActionRequest::Tap {
                at: crate::common::geometry::Point::new(15, 13)
            }
        );

        // Confirm screen completes the script.
        harness.publish(screen(false, true));
        assert_eq!(harness.expect_terminal(), RunOutcome::Completed);
        assert_eq!(
            harness.action_rx.try_recv().unwrap(),
            ActionRequest::Tap {
                at: crate::common::geometry::Point::new(45, 35)
            }
        );
        assert!(harness.action_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stuck_state_ends_the_run_with_its_name() {
        let mut settings = test_settings();
        settings.miss_threshold = 3;
        let mut harness = Harness::new(settings);

        harness.publish(screen(false, false));
        harness.expect_pause();
        harness.publish(screen(false, false));
        harness.expect_pause();
        harness.publish(screen(false, false));
        match harness.expect_terminal() {
            RunOutcome::StateStuck { state, last_outcome } => {
                assert_eq!(state, "scan_menu");
                assert!(last_outcome.contains("no probe matched"));
            }
            other => panic!("expected a stuck state, got {:?}", other),
        }
        assert!(harness.action_rx.try_recv().is_err());
        assert!(harness
            .sink
            .events()
            .iter()
            .all(|event| !matches!(event, RunEvent::ActionIssued { .. })));
    }

    #[tokio::test]
    async fn capture_failure_is_observed_at_the_next_tick() {
        let mut harness = Harness::new(test_settings());
        harness.publish(screen(false, false));
        harness.expect_pause();

        harness
            .status_tx
            .send(CaptureStatus::Failed(FatalCapture::ConsecutiveFailures(5)))
            .unwrap();
        assert_eq!(
            harness.expect_terminal(),
            RunOutcome::FatalCapture(FatalCapture::ConsecutiveFailures(5))
        );
    }

    #[tokio::test]
    async fn cancellation_wins_over_pending_work() {
        let mut harness = Harness::new(test_settings());
        // A matching frame is queued, but the stop request arrived
        // first; the tick boundary must not issue the tap.
        harness.publish(screen(true, false));
        harness.cancel.cancel();
        assert_eq!(harness.expect_terminal(), RunOutcome::Cancelled);
        assert!(harness.action_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn tick_budget_times_the_run_out() {
        let mut settings = test_settings();
        settings.max_ticks = Some(2);
        let mut harness = Harness::new(settings);

        harness.publish(screen(false, false));
        harness.expect_pause();
        harness.publish(screen(false, false));
        harness.expect_pause();
        assert_eq!(harness.expect_terminal(), RunOutcome::TimedOut);
    }

    #[tokio::test]
    async fn missing_frames_are_soft_failures_within_the_grace_window() {
        let mut settings = test_settings();
        settings.staleness_limit_ticks = 1;
        let mut harness = Harness::new(settings);

        // No frame at all: soft failure, no miss recorded.
        harness.expect_pause();
        assert_eq!(harness.session.consecutive_misses(), 0);

        // One frame arrives and misses.
        harness.publish(screen(false, false));
        harness.expect_pause();
        assert_eq!(harness.session.consecutive_misses(), 1);

        // Within the grace window the cached frame is re-evaluated.
        harness.expect_pause();
        assert_eq!(harness.session.consecutive_misses(), 2);

        // Beyond it, ticks stop counting misses and just wait for the
        // capture side to produce something new.
        harness.expect_pause();
        assert_eq!(harness.session.consecutive_misses(), 2);
        assert_eq!(harness.session.stale_ticks(), 2);
    }

    #[tokio::test]
    async fn static_screen_still_accumulates_misses_under_change_gating() {
        let mut settings = test_settings();
        settings.miss_threshold = 3;
        let mut harness = Harness::new(settings);
        harness.engine = harness
            .engine
            .with_change_detector(ScreenChangeDetector::new(0));

        harness.publish(screen(false, false));
        harness.expect_pause();
        harness.publish(screen(false, false));
        harness.expect_pause();
        harness.publish(screen(false, false));
        match harness.expect_terminal() {
            RunOutcome::StateStuck { state, .. } => assert_eq!(state, "scan_menu"),
            other => panic!("expected a stuck state, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn changed_screen_is_reevaluated_under_change_gating() {
        let mut harness = Harness::new(test_settings());
        harness.engine = harness
            .engine
            .with_change_detector(ScreenChangeDetector::new(0));

        harness.publish(screen(false, false));
        harness.expect_pause();
        harness.publish(screen(true, false));
        harness.expect_pause();
        assert_eq!(harness.session.current(), "confirm");
    }

    #[tokio::test]
    async fn full_run_emits_ordered_events() {
        let settings = test_settings();
        let script = test_script();
        let frames = FrameRing::new("recognition", 4, OverflowPolicy::LatestWins);
        let (_status_tx, status_rx) = watch::channel(CaptureStatus::Running);
        let (action_tx, mut action_rx) = mpsc::channel(8);
        let sink = CollectingSink::new();
        let engine = AutomationEngine::new(
            script,
            frames.clone(),
            status_rx,
            ActionDispatcher::new(action_tx),
            sink.clone(),
            settings,
            CancellationToken::new(),
        );

        // One frame carrying both anchors: the first tick advances to
        // `confirm`, the second completes on the cached frame.
        frames.publish(ScaledFrameSet::native(Frame::new(
            1,
            Utc::now(),
            screen(true, true),
        )));
        let outcome = engine.run().await;
        assert_eq!(outcome, RunOutcome::Completed);

        let events = sink.events();
        let summary: Vec<String> = events
            .iter()
            .map(|event| match event {
                RunEvent::StateEntered { state, .. } => format!("enter:{}", state),
                RunEvent::ActionIssued { state, .. } => format!("act:{}", state),
                RunEvent::RunTerminated { outcome, .. } => format!("end:{:?}", outcome),
            })
            .collect();
        assert_eq!(
            summary,
            [
                "enter:scan_menu",
                "act:scan_menu",
                "enter:confirm",
                "act:confirm",
                "end:Completed"
            ]
        );
        assert!(action_rx.recv().await.is_some());
        assert!(action_rx.recv().await.is_some());
    }
}
