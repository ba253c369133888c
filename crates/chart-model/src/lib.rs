// Chart editor data model: quantized time keys, note/hand/usage types, rail segments

mod config;
mod error;
mod note;
mod segments;
mod time_key;

pub use config::TimelineConfig;
pub use error::ChartError;
pub use note::{HandType, Note, NoteId, NoteUsage, POSITION_EPSILON, Position, RailId};
pub use segments::{RailSegments, SegmentPoint};
pub use time_key::{TIME_KEY_RESOLUTION_MS, TimeKey};
