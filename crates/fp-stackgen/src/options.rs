use serde::Deserialize;

use crate::error::GenError;

/// Knobs the generator honors for a whole run; never changed mid-pass.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GeneratorOptions {
    /// Fold constant operator expressions and drop branches whose condition folds
    pub optimize: bool,
    /// Record function, position and scope records alongside the stream
    pub emit_debug_info: bool,
    /// Upper bound on distinct generic instances drained from the queue
    pub max_generic_instantiations: usize,
    /// Allocate every external function name once at program start
    pub build_name_cache: bool,
    /// Deepest allowed nesting of macro expansions
    pub max_macro_depth: usize,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            emit_debug_info: false,
            max_generic_instantiations: 1024,
            build_name_cache: true,
            max_macro_depth: 16,
        }
    }
}

impl GeneratorOptions {
    pub fn from_json(text: &str) -> Result<Self, GenError> {
        serde_json::from_str(text).map_err(|err| GenError::Config {
            message: err.to_string(),
        })
    }
}
