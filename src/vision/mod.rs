pub mod change;
pub mod probe;
pub mod template;
pub mod text;

pub use change::ScreenChangeDetector;
pub use probe::{evaluate_probes, Probe, ProbeAssets, ProbeKind, ProbeOutcome, RecognitionResult, TextPattern};
pub use template::{match_template, TemplateMatch};
pub use text::{recognize_text, Glyph, GlyphSet, TextRead};
