use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time_key::TimeKey;

/// Positional tolerance for exact-point-match classification.
pub const POSITION_EPSILON: f32 = 1e-3;

/// Unique note identity. Monotonically assigned by the registry, never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NoteId(pub u64);

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Unique rail identity. Monotonically assigned by the registry, never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RailId(pub u64);

impl fmt::Display for RailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// 2D placement point on the play surface.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn approx_eq(self, other: Position) -> bool {
        (self.x - other.x).abs() < POSITION_EPSILON && (self.y - other.y).abs() < POSITION_EPSILON
    }
}

/// Hand class a note or rail belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandType {
    LeftHand,
    RightHand,
    /// Special note playable with either single hand.
    OneHandSpecial,
    /// Special note requiring both hands.
    TwoHandSpecial,
    /// Non-playable scenery object.
    NoHand,
}

impl HandType {
    /// The mirrored simple hand, if any. Specials and scenery have none.
    pub fn opposite(self) -> Option<HandType> {
        match self {
            Self::LeftHand => Some(Self::RightHand),
            Self::RightHand => Some(Self::LeftHand),
            Self::OneHandSpecial | Self::TwoHandSpecial | Self::NoHand => None,
        }
    }

    pub fn is_simple(self) -> bool {
        matches!(self, Self::LeftHand | Self::RightHand)
    }

    pub fn is_special(self) -> bool {
        matches!(self, Self::OneHandSpecial | Self::TwoHandSpecial)
    }
}

/// How a placed note is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteUsage {
    /// Standalone hit object, not part of any rail.
    Ball,
    /// Interior point of a rail path.
    Line,
    /// Terminating boundary of a rail; the rail cannot be extended past it.
    Breaker,
}

impl NoteUsage {
    pub fn is_breaker(self) -> bool {
        matches!(self, Self::Breaker)
    }
}

/// A single placed object on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub time: TimeKey,
    pub position: Position,
    pub hand: HandType,
    pub usage: NoteUsage,
    /// Grouping id linking notes of one timed combo sequence.
    pub combo_id: Option<u32>,
    /// Owning rail, none for standalone notes.
    pub rail: Option<RailId>,
}

impl Note {
    pub fn ball(id: NoteId, time_ms: f64, position: Position, hand: HandType) -> Self {
        Self {
            id,
            time: TimeKey::new(time_ms),
            position,
            hand,
            usage: NoteUsage::Ball,
            combo_id: None,
            rail: None,
        }
    }

    pub fn line(id: NoteId, time_ms: f64, position: Position, hand: HandType) -> Self {
        Self {
            usage: NoteUsage::Line,
            ..Self::ball(id, time_ms, position, hand)
        }
    }

    pub fn breaker(id: NoteId, time_ms: f64, position: Position, hand: HandType) -> Self {
        Self {
            usage: NoteUsage::Breaker,
            ..Self::ball(id, time_ms, position, hand)
        }
    }

    pub fn time_ms(&self) -> f64 {
        self.time.ms()
    }
}
