use serde::{Deserialize, Serialize};

use crate::types::{DEFAULT_FALLOFF_DEG, FLOAT_TOLERANCE};

/// Numeric knobs of a deformer instance.
///
/// Serializable so a host can persist it next to its own scene data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Falloff in degrees given to recorded joints without an explicit one.
    pub default_falloff_deg: f64,
    /// Minimum displacement length for a vertex to be recorded.
    pub record_tolerance: f64,
    /// Final pose weights, target envelopes and the overall envelope below
    /// this value are treated as zero.
    pub weight_epsilon: f64,
    /// LU pivots with a smaller magnitude mark the pose matrix as singular.
    pub singular_pivot_tolerance: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_falloff_deg: DEFAULT_FALLOFF_DEG,
            record_tolerance: FLOAT_TOLERANCE,
            weight_epsilon: FLOAT_TOLERANCE,
            singular_pivot_tolerance: 1e-12,
        }
    }
}
