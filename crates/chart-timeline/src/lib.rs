// Temporal note/rail timeline engine: per-difficulty note storage, rail
// chains over a continuous time axis, and the cross-rail editing algorithms

mod difficulty;
mod helper;
mod note_store;
mod rail;
mod registry;

pub use difficulty::{Difficulty, FlipResult, RailMutation};
pub use helper::{
    ExtendPolicy, RangeMode, attempt_extend_head, attempt_extend_tail, can_place_rail_type_here,
    clone_rail, create_rail_from_begin_end, has_rail_interruptions_between, rails_in_range,
};
pub use note_store::NoteStore;
pub use rail::{AddNoteOutcome, BreakerState, ChainIter, FlipOutcome, Rail, RemoveOutcome};
pub use registry::{NoteOwner, Registry};
