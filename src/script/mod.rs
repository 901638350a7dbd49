pub mod definition;
pub mod loader;

pub use definition::{
    ActionSpec, ProbeSpec, ProbeSpecKind, ScriptDefinition, StateDef, TransitionRule, NO_MATCH_ARM,
    STOPPED_STATE,
};
pub use loader::{compile, load_script, CompiledScript, CompiledState, CompiledTransition, ScriptAssets};
