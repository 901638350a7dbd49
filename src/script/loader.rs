use image::GrayImage;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use tracing::{info, warn};

use crate::config::VisionSettings;
use crate::device::controller::ActionRequest;
use crate::error::ScriptError;
use crate::script::definition::{
    ProbeSpecKind, ScriptDefinition, NO_MATCH_ARM, STOPPED_STATE,
};
use crate::vision::probe::{Probe, ProbeAssets, ProbeKind};
use crate::vision::text::GlyphSet;

/// Decoded reference images a compiled script resolves probes against.
#[derive(Debug, Default)]
pub struct ScriptAssets {
    templates: HashMap<String, GrayImage>,
    glyphs: GlyphSet,
}

impl ScriptAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_template(&mut self, id: impl Into<String>, image: GrayImage) {
        self.templates.insert(id.into(), image);
    }

    pub fn insert_glyph(&mut self, label: impl Into<String>, image: GrayImage) {
        self.glyphs.insert(label, image);
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }
}

impl ProbeAssets for ScriptAssets {
    fn template(&self, id: &str) -> Option<&GrayImage> {
        self.templates.get(id)
    }

    fn glyphs(&self) -> &GlyphSet {
        &self.glyphs
    }
}

#[derive(Debug, Clone)]
pub struct CompiledTransition {
    pub probe_id: String,
    pub next: String,
    pub action: Option<ActionRequest>,
}

#[derive(Debug, Clone)]
pub struct CompiledState {
    pub id: String,
    pub probes: Vec<Probe>,
    pub transitions: Vec<CompiledTransition>,
}

impl CompiledState {
    pub fn transition_for(&self, probe_id: &str) -> Option<&CompiledTransition> {
        self.transitions.iter().find(|t| t.probe_id == probe_id)
    }
}

/// A validated script plus its decoded assets, ready for the engine.
#[derive(Debug)]
pub struct CompiledScript {
    pub name: String,
    entry: String,
    states: IndexMap<String, CompiledState>,
    assets: ScriptAssets,
}

impl CompiledScript {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn state(&self, id: &str) -> Option<&CompiledState> {
        self.states.get(id)
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn state_ids(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn assets(&self) -> &ScriptAssets {
        &self.assets
    }
}

/// Read a script file, load the assets it references and compile it.
pub fn load_script(path: &Path, vision: &VisionSettings) -> Result<CompiledScript, ScriptError> {
    let text = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let definition = ScriptDefinition::from_json(&text)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let assets = load_assets(&definition, base)?;
    let script = compile(definition, assets, vision)?;
    info!(
        "Loaded script `{}`: {} states, {} templates, {} glyphs",
        script.name,
        script.state_count(),
        script.assets.template_count(),
        script.assets.glyphs.len()
    );
    Ok(script)
}

/// Validate a definition and resolve per-probe thresholds against the
/// configured defaults.
pub fn compile(
    definition: ScriptDefinition,
    assets: ScriptAssets,
    vision: &VisionSettings,
) -> Result<CompiledScript, ScriptError> {
    validate(&definition)?;

    let mut states = IndexMap::with_capacity(definition.states.len());
    for (state_id, state) in &definition.states {
        let mut probes = Vec::with_capacity(state.probes.len());
        for spec in &state.probes {
            let kind = match &spec.kind {
                ProbeSpecKind::Template {
                    template,
                    threshold,
                    search,
                } => {
                    if assets.template(template).is_none() {
                        return Err(ScriptError::MissingTemplate {
                            state: state_id.clone(),
                            template: template.clone(),
                        });
                    }
                    ProbeKind::Template {
                        template_id: template.clone(),
                        threshold: threshold.unwrap_or(vision.template_threshold),
                        search: *search,
                    }
                }
                ProbeSpecKind::Text {
                    region,
                    expected,
                    threshold,
                } => {
                    if assets.glyphs.is_empty() {
                        return Err(ScriptError::NoGlyphs);
                    }
                    ProbeKind::Text {
                        region: *region,
                        expected: expected.clone(),
                        threshold: threshold.unwrap_or(vision.text_threshold),
                    }
                }
            };
            probes.push(Probe {
                id: spec.id.clone(),
                kind,
            });
        }

        let transitions = state
            .on
            .iter()
            .map(|rule| CompiledTransition {
                probe_id: rule.probe.clone(),
                next: rule.next.clone(),
                action: rule.action.as_ref().map(|spec| spec.to_request()),
            })
            .collect();

        states.insert(
            state_id.clone(),
            CompiledState {
                id: state_id.clone(),
                probes,
                transitions,
            },
        );
    }

    Ok(CompiledScript {
        name: definition.name,
        entry: definition.entry,
        states,
        assets,
    })
}

fn validate(definition: &ScriptDefinition) -> Result<(), ScriptError> {
    if definition.states.is_empty() {
        return Err(ScriptError::Empty);
    }
    if definition.states.contains_key(STOPPED_STATE) {
        return Err(ScriptError::ReservedStateId(STOPPED_STATE.to_string()));
    }
    if !definition.states.contains_key(&definition.entry) {
        return Err(ScriptError::UnknownEntry(definition.entry.clone()));
    }

    for (state_id, state) in &definition.states {
        let mut probe_ids = HashSet::new();
        for spec in &state.probes {
            if spec.id == NO_MATCH_ARM {
                return Err(ScriptError::ReservedProbeId {
                    state: state_id.clone(),
                    probe: spec.id.clone(),
                });
            }
            if !probe_ids.insert(spec.id.as_str()) {
                return Err(ScriptError::DuplicateProbe {
                    state: state_id.clone(),
                    probe: spec.id.clone(),
                });
            }
            if let Some(value) = spec.kind.threshold() {
                if !(0.0..=1.0).contains(&value) {
                    return Err(ScriptError::ThresholdOutOfRange {
                        state: state_id.clone(),
                        probe: spec.id.clone(),
                        value,
                    });
                }
            }
        }

        for rule in &state.on {
            if rule.probe == NO_MATCH_ARM {
                return Err(ScriptError::ReservedProbeId {
                    state: state_id.clone(),
                    probe: rule.probe.clone(),
                });
            }
            if !probe_ids.contains(rule.probe.as_str()) {
                return Err(ScriptError::UnknownProbe {
                    state: state_id.clone(),
                    probe: rule.probe.clone(),
                });
            }
            if rule.next != STOPPED_STATE && !definition.states.contains_key(&rule.next) {
                return Err(ScriptError::UnknownNextState {
                    state: state_id.clone(),
                    next: rule.next.clone(),
                });
            }
        }
    }

    check_reachability(definition)
}

/// Breadth-first walk of the transition graph from the entry state.
/// Every run must have some path to `stopped`; a script that cannot
/// terminate is a bug worth rejecting up front.
fn check_reachability(definition: &ScriptDefinition) -> Result<(), ScriptError> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    let mut stop_reachable = false;
    visited.insert(definition.entry.as_str());
    queue.push_back(definition.entry.as_str());

    while let Some(current) = queue.pop_front() {
        let Some(state) = definition.states.get(current) else {
            continue;
        };
        for rule in &state.on {
            if rule.next == STOPPED_STATE {
                stop_reachable = true;
                continue;
            }
            if visited.insert(rule.next.as_str()) {
                queue.push_back(rule.next.as_str());
            }
        }
    }

    if !stop_reachable {
        return Err(ScriptError::StoppedUnreachable(definition.entry.clone()));
    }
    for state_id in definition.states.keys() {
        if !visited.contains(state_id.as_str()) {
            warn!("State `{}` is unreachable from entry `{}`", state_id, definition.entry);
        }
    }
    Ok(())
}

fn load_assets(definition: &ScriptDefinition, base: &Path) -> Result<ScriptAssets, ScriptError> {
    let mut assets = ScriptAssets::new();
    for state in definition.states.values() {
        for spec in &state.probes {
            if let ProbeSpecKind::Template { template, .. } = &spec.kind {
                if assets.template(template).is_some() {
                    continue;
                }
                let full = base.join(template);
                let image = image::open(&full).map_err(|e| ScriptError::Asset {
                    path: full.display().to_string(),
                    reason: e.to_string(),
                })?;
                assets.insert_template(template.clone(), image.to_luma8());
            }
        }
    }

    if let Some(dir) = &definition.glyph_dir {
        let dir_path = base.join(dir);
        let entries = std::fs::read_dir(&dir_path).map_err(|e| ScriptError::Asset {
            path: dir_path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("png"))
            .collect();
        paths.sort();
        for path in paths {
            let Some(label) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let image = image::open(&path).map_err(|e| ScriptError::Asset {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            assets.insert_glyph(label, image.to_luma8());
        }
    }
    Ok(assets)
}
