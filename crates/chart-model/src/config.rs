use serde::{Deserialize, Serialize};

/// Global editing constants the host supplies to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Duplicate-detection window in milliseconds: two times closer than
    /// this belong to the same editing slot.
    pub time_overlay_epsilon_ms: f64,
    /// Rails shorter than this are flagged non-renderable (ms).
    pub min_rail_duration_ms: f64,
    /// Rails longer than this are flagged non-renderable; extension never
    /// grows a rail past this bound (ms).
    pub max_rail_duration_ms: f64,
    /// Maximum left/right notes sharing one time slot.
    pub max_simple_notes_per_slot: usize,
    /// Maximum special notes sharing one time slot. A special note excludes
    /// every other note at its slot.
    pub max_special_notes_per_slot: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            time_overlay_epsilon_ms: 10.0,
            min_rail_duration_ms: 100.0,
            max_rail_duration_ms: 10_000.0,
            max_simple_notes_per_slot: 2,
            max_special_notes_per_slot: 1,
        }
    }
}
