use indexmap::IndexMap;
use serde::Deserialize;
use std::time::Duration;

use crate::common::geometry::{Point, Region};
use crate::device::controller::ActionRequest;
use crate::error::ScriptError;
use crate::vision::probe::TextPattern;

/// Reserved id of the engine-owned terminal state. Scripts transition
/// to it but never define it.
pub const STOPPED_STATE: &str = "stopped";

/// Reserved transition arm; scripts may not route no-match outcomes,
/// the engine's retry policy owns them.
pub const NO_MATCH_ARM: &str = "no_match";

/// A declarative automation script as written on disk.
///
/// States keep their declaration order, which is also the order probes
/// are reported in diagnostics.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptDefinition {
    pub name: String,
    /// State entered when a run starts.
    pub entry: String,
    /// Directory of glyph template PNGs, relative to the script file.
    #[serde(default)]
    pub glyph_dir: Option<String>,
    pub states: IndexMap<String, StateDef>,
}

impl ScriptDefinition {
    pub fn from_json(text: &str) -> Result<Self, ScriptError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateDef {
    /// Probes evaluated in order; the first hit wins.
    #[serde(default)]
    pub probes: Vec<ProbeSpec>,
    /// Transition table keyed by probe id.
    #[serde(default)]
    pub on: Vec<TransitionRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeSpec {
    pub id: String,
    #[serde(flatten)]
    pub kind: ProbeSpecKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeSpecKind {
    /// Locate a reference image. `template` is the asset path relative
    /// to the script file and doubles as the asset id.
    Template {
        template: String,
        #[serde(default)]
        threshold: Option<f32>,
        #[serde(default)]
        search: Option<Region>,
    },
    /// Read text in a region and compare against expected fragments.
    Text {
        region: Region,
        expected: TextPattern,
        #[serde(default)]
        threshold: Option<f32>,
    },
}

impl ProbeSpecKind {
    pub fn threshold(&self) -> Option<f32> {
        match self {
            ProbeSpecKind::Template { threshold, .. } => *threshold,
            ProbeSpecKind::Text { threshold, .. } => *threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionRule {
    /// Probe whose hit triggers this rule.
    pub probe: String,
    /// Destination state id, or `stopped`.
    pub next: String,
    #[serde(default)]
    pub action: Option<ActionSpec>,
}

/// Action attached to a transition, in device coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    Tap {
        x: u32,
        y: u32,
    },
    Swipe {
        from: [u32; 2],
        to: [u32; 2],
        duration_ms: u64,
    },
    Wait {
        duration_ms: u64,
    },
}

impl ActionSpec {
    pub fn to_request(&self) -> ActionRequest {
        match self {
            ActionSpec::Tap { x, y } => ActionRequest::Tap {
                at: Point::new(*x, *y),
            },
            ActionSpec::Swipe {
                from,
                to,
                duration_ms,
            } => ActionRequest::Swipe {
                from: Point::new(from[0], from[1]),
                to: Point::new(to[0], to[1]),
                duration: Duration::from_millis(*duration_ms),
            },
            ActionSpec::Wait { duration_ms } => ActionRequest::Wait {
                duration: Duration::from_millis(*duration_ms),
            },
        }
    }
}
