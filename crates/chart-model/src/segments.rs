use serde::{Deserialize, Serialize};

use crate::error::ChartError;
use crate::note::HandType;
use crate::time_key::TimeKey;

/// One point of a flattened rail path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentPoint {
    pub time_ms: f64,
    pub x: f32,
    pub y: f32,
}

/// Flat persistence form of a rail: the ordered member points with the
/// first/last entries classified as boundary breakers or not. A saved chart
/// stores rails in this shape; loading rebuilds the full chain from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailSegments {
    pub hand: HandType,
    pub points: Vec<SegmentPoint>,
    pub head_breaker: bool,
    pub tail_breaker: bool,
}

impl RailSegments {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Check the shape a rebuilt chain requires: non-empty and strictly
    /// ascending in time-slot terms.
    pub fn validate(&self) -> Result<(), ChartError> {
        if self.points.is_empty() {
            return Err(ChartError::EmptySegments);
        }
        for (i, pair) in self.points.windows(2).enumerate() {
            let a = TimeKey::new(pair[0].time_ms);
            let b = TimeKey::new(pair[1].time_ms);
            if a == b {
                return Err(ChartError::DuplicateSegmentTime { index: i + 1 });
            }
            if a > b {
                return Err(ChartError::UnsortedSegments { index: i + 1 });
            }
        }
        Ok(())
    }
}
