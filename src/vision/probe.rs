use serde::Deserialize;
use tracing::{debug, warn};

use crate::common::frame::ScaledFrameSet;
use crate::common::geometry::Region;
use crate::vision::template::{match_template, TemplateMatch};
use crate::vision::text::{recognize_text, GlyphSet, TextRead};

/// Matching rule for recognized text. Listed fragments are synonyms;
/// containing any one of them counts as a hit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextPattern {
    pub any_of: Vec<String>,
}

impl TextPattern {
    pub fn matches(&self, text: &str) -> bool {
        self.any_of.iter().any(|fragment| text.contains(fragment.as_str()))
    }
}

/// One vision query an automation state needs answered.
#[derive(Debug, Clone)]
pub struct Probe {
    pub id: String,
    pub kind: ProbeKind,
}

#[derive(Debug, Clone)]
pub enum ProbeKind {
    /// Locate a reference sub-image anywhere in the search area.
    Template {
        template_id: String,
        threshold: f32,
        search: Option<Region>,
    },
    /// Read the text in a region and compare it to expected fragments.
    Text {
        region: Region,
        expected: TextPattern,
        threshold: f32,
    },
}

/// What a single probe saw when it hit.
#[derive(Debug, Clone)]
pub enum RecognitionResult {
    Located(TemplateMatch),
    Text(TextRead),
}

/// Outcome of evaluating one state's probes against one frame set.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Hit {
        probe_id: String,
        seq: u64,
        result: RecognitionResult,
    },
    NoMatch {
        seq: u64,
    },
}

impl ProbeOutcome {
    pub fn seq(&self) -> u64 {
        match self {
            ProbeOutcome::Hit { seq, .. } => *seq,
            ProbeOutcome::NoMatch { seq } => *seq,
        }
    }
}

/// Lookup interface for the reference images probes resolve against.
pub trait ProbeAssets {
    fn template(&self, id: &str) -> Option<&image::GrayImage>;
    fn glyphs(&self) -> &GlyphSet;
}

/// Evaluate `probes` in declared order against the recognition variant
/// of `frame_set`; the first hit wins. Pure with respect to its
/// inputs, so the same frame and probes always produce the same
/// outcome.
pub fn evaluate_probes(
    probes: &[Probe],
    frame_set: &ScaledFrameSet,
    assets: &dyn ProbeAssets,
) -> ProbeOutcome {
    let seq = frame_set.seq();
    if probes.is_empty() {
        return ProbeOutcome::NoMatch { seq };
    }
    let gray = frame_set.recognition().to_luma8();

    for probe in probes {
        match &probe.kind {
            ProbeKind::Template {
                template_id,
                threshold,
                search,
            } => {
                let Some(template) = assets.template(template_id) else {
                    // Load-time validation makes this unreachable for
                    // compiled scripts.
                    warn!("Probe `{}` references unloaded template `{}`", probe.id, template_id);
                    continue;
                };
                if let Some(found) = match_template(&gray, template, *threshold, *search) {
                    debug!(
                        "Probe `{}` located template `{}` at {} (score {:.3})",
                        probe.id, template_id, found.region, found.score
                    );
                    return ProbeOutcome::Hit {
                        probe_id: probe.id.clone(),
                        seq,
                        result: RecognitionResult::Located(found),
                    };
                }
            }
            ProbeKind::Text {
                region,
                expected,
                threshold,
            } => {
                let read = recognize_text(&gray, *region, assets.glyphs(), *threshold);
                if !read.text.is_empty() && expected.matches(&read.text) {
                    debug!(
                        "Probe `{}` read `{}` (confidence {:.3})",
                        probe.id, read.text, read.confidence
                    );
                    return ProbeOutcome::Hit {
                        probe_id: probe.id.clone(),
                        seq,
                        result: RecognitionResult::Text(read),
                    };
                }
            }
        }
    }
    ProbeOutcome::NoMatch { seq }
}
