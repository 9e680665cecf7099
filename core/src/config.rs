use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Allow incremental evaluators for calculations that support them
    pub incremental: bool,
    /// Bulk-load root navigations of all affected entities before evaluating values in full
    pub prefetch: bool,
    /// Upper bound on update rounds of a computed member graph
    pub max_update_rounds: usize,
}

impl Default for EngineConfig {
    fn default() -> Self { Self { incremental: true, prefetch: true, max_update_rounds: 8 } }
}

impl EngineConfig {
    pub fn new(incremental: bool, prefetch: bool, max_update_rounds: usize) -> Self { Self { incremental, prefetch, max_update_rounds } }

    /// Always evaluate from fully loaded navigations
    pub fn eager() -> Self { Self { incremental: false, ..Self::default() } }

    /// Missing fields take their default
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> { serde_json::from_str(json) }
}
