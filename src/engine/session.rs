use std::time::{Duration, Instant};
use uuid::Uuid;

/// Mutable bookkeeping for one automation run.
#[derive(Debug)]
pub struct RunSession {
    run_id: Uuid,
    script_name: String,
    current: String,
    ticks: u64,
    consecutive_misses: u32,
    last_seq: u64,
    stale_ticks: u32,
    started_at: Instant,
}

impl RunSession {
    pub fn new(script_name: &str, entry: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            script_name: script_name.to_string(),
            current: entry.to_string(),
            ticks: 0,
            consecutive_misses: 0,
            last_seq: 0,
            stale_ticks: 0,
            started_at: Instant::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    pub fn stale_ticks(&self) -> u32 {
        self.stale_ticks
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub(crate) fn begin_tick(&mut self) -> u64 {
        self.ticks += 1;
        self.ticks
    }

    /// Move to a new state, clearing the miss streak.
    pub(crate) fn enter(&mut self, state: &str) {
        self.current = state.to_string();
        self.consecutive_misses = 0;
    }

    pub(crate) fn record_miss(&mut self) -> u32 {
        self.consecutive_misses = self.consecutive_misses.saturating_add(1);
        self.consecutive_misses
    }

    pub(crate) fn clear_misses(&mut self) {
        self.consecutive_misses = 0;
    }

    /// Note the frame sequence seen this tick. A number above the last
    /// one resets the staleness streak; anything else extends it.
    pub(crate) fn observe_seq(&mut self, seq: u64) -> bool {
        if seq > self.last_seq {
            self.last_seq = seq;
            self.stale_ticks = 0;
            true
        } else {
            self.stale_ticks = self.stale_ticks.saturating_add(1);
            false
        }
    }

    /// A tick that found no frame at all counts toward staleness too.
    pub(crate) fn note_missing_frame(&mut self) {
        self.stale_ticks = self.stale_ticks.saturating_add(1);
    }
}
