use std::collections::HashMap;

use chart_model::{
    ChartError, HandType, Note, NoteId, Position, RailId, RailSegments, TimeKey, TimelineConfig,
};
use log::debug;

use crate::helper;
use crate::helper::{ExtendPolicy, RangeMode};
use crate::note_store::NoteStore;
use crate::rail::{AddNoteOutcome, FlipOutcome, Rail, RemoveOutcome};
use crate::registry::{NoteOwner, Registry};

/// Host-visible result of a rail note mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RailMutation {
    /// A note was inserted; `spawned` names the trailing half when the
    /// insertion cut the rail.
    Inserted {
        id: NoteId,
        spawned: Option<RailId>,
    },
    /// An existing in-window note was converted instead of inserting.
    Coerced {
        existing: NoteId,
        spawned: Option<RailId>,
    },
    Rejected,
}

/// Host-visible result of a usage flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipResult {
    NotFound,
    Unchanged,
    Flipped { spawned: Option<RailId> },
}

/// One difficulty's complete timeline state: standalone notes, rails, and
/// the id registry, kept in lock-step across every mutation.
///
/// The host serializes all chart-editing calls, so mutation here is plain
/// `&mut` with no interior locking.
#[derive(Debug, Clone)]
pub struct Difficulty {
    config: TimelineConfig,
    notes: NoteStore,
    rails: HashMap<RailId, Rail>,
    registry: Registry,
}

impl Difficulty {
    pub fn new(config: TimelineConfig) -> Self {
        Self {
            config,
            notes: NoteStore::new(),
            rails: HashMap::new(),
            registry: Registry::new(),
        }
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    pub fn notes(&self) -> &NoteStore {
        &self.notes
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // standalone notes
    // ------------------------------------------------------------------

    /// Place a standalone ball note. Returns its id, or `None` when the
    /// slot's density rules refuse it.
    pub fn place_note(
        &mut self,
        time_ms: f64,
        position: Position,
        hand: HandType,
        combo_id: Option<u32>,
    ) -> Option<NoteId> {
        let id = self.registry.allocate_note_id();
        let mut note = Note::ball(id, time_ms, position, hand);
        note.combo_id = combo_id;
        if !self.notes.add_at(note, &self.config) {
            return None;
        }
        self.registry.bind(id, NoteOwner::Standalone);
        Some(id)
    }

    /// Remove a standalone note and its registry entry.
    pub fn remove_note(&mut self, id: NoteId) -> bool {
        let Some(note) = self.notes.find(id).cloned() else {
            return false;
        };
        let removed = self.notes.remove_exact(&note).is_some();
        if removed {
            self.registry.unbind(id);
        }
        removed
    }

    pub fn has_note_at(&self, time: TimeKey) -> bool {
        self.notes.has_note_at(time)
    }

    // ------------------------------------------------------------------
    // rails
    // ------------------------------------------------------------------

    pub fn rail(&self, id: RailId) -> Option<&Rail> {
        self.rails.get(&id)
    }

    pub fn rail_mut(&mut self, id: RailId) -> Option<&mut Rail> {
        self.rails.get_mut(&id)
    }

    pub fn rails(&self) -> impl Iterator<Item = &Rail> {
        self.rails.values()
    }

    pub fn rail_count(&self) -> usize {
        self.rails.len()
    }

    /// Bootstrap a rail from a begin/end drag.
    pub fn create_rail(
        &mut self,
        hand: HandType,
        begin_ms: f64,
        begin_pos: Position,
        end_ms: f64,
        end_pos: Position,
    ) -> Option<RailId> {
        let rail = helper::create_rail_from_begin_end(
            &mut self.registry,
            hand,
            begin_ms,
            begin_pos,
            end_ms,
            end_pos,
        )?;
        let id = rail.id();
        self.rails.insert(id, rail);
        Some(id)
    }

    /// Rebuild a rail from its flat persistence form (chart loading).
    pub fn create_rail_from_segments(
        &mut self,
        segments: &RailSegments,
    ) -> Result<RailId, ChartError> {
        let rail = Rail::from_segments(&mut self.registry, segments)?;
        let id = rail.id();
        self.rails.insert(id, rail);
        Ok(id)
    }

    /// Add a note to a rail, registering the trailing half as a new rail
    /// when the insertion cuts the chain.
    pub fn add_rail_note(
        &mut self,
        rail_id: RailId,
        time_ms: f64,
        position: Position,
        breaker: bool,
    ) -> RailMutation {
        let Some(rail) = self.rails.get_mut(&rail_id) else {
            return RailMutation::Rejected;
        };
        let id = self.registry.allocate_note_id();
        let note = if breaker {
            Note::breaker(id, time_ms, position, rail.hand())
        } else {
            Note::line(id, time_ms, position, rail.hand())
        };
        let outcome = rail.add_note(note, &mut self.registry, &self.config);
        self.resolve_outcome(outcome)
    }

    fn resolve_outcome(&mut self, outcome: AddNoteOutcome) -> RailMutation {
        match outcome {
            AddNoteOutcome::Inserted { id, spawned } => RailMutation::Inserted {
                id,
                spawned: spawned.map(|r| self.adopt(r)),
            },
            AddNoteOutcome::Coerced { existing, spawned } => RailMutation::Coerced {
                existing,
                spawned: spawned.map(|r| self.adopt(r)),
            },
            AddNoteOutcome::Rejected => RailMutation::Rejected,
        }
    }

    fn adopt(&mut self, rail: Rail) -> RailId {
        let id = rail.id();
        self.rails.insert(id, rail);
        id
    }

    /// Remove a note from a rail; a rail whose last note goes is dropped
    /// from the difficulty entirely.
    pub fn remove_rail_note(&mut self, rail_id: RailId, note_id: NoteId) -> bool {
        let Some(rail) = self.rails.get_mut(&rail_id) else {
            return false;
        };
        match rail.remove_note(note_id, &mut self.registry) {
            RemoveOutcome::Removed => true,
            RemoveOutcome::Emptied => {
                self.rails.remove(&rail_id);
                debug!("rail {rail_id} dropped with its last note");
                true
            }
            RemoveOutcome::NotFound => false,
        }
    }

    /// Flip a rail note to a breaker; the spawned trailing half (mid-chain
    /// flip) is registered under this difficulty.
    pub fn flip_note_to_breaker(&mut self, rail_id: RailId, note_id: NoteId) -> FlipResult {
        let Some(rail) = self.rails.get_mut(&rail_id) else {
            return FlipResult::NotFound;
        };
        match rail.flip_to_breaker(note_id, &mut self.registry) {
            FlipOutcome::NotFound => FlipResult::NotFound,
            FlipOutcome::Unchanged => FlipResult::Unchanged,
            FlipOutcome::Flipped { spawned } => FlipResult::Flipped {
                spawned: spawned.map(|r| self.adopt(r)),
            },
        }
    }

    pub fn flip_note_to_line(&mut self, rail_id: RailId, note_id: NoteId) -> FlipResult {
        let Some(rail) = self.rails.get_mut(&rail_id) else {
            return FlipResult::NotFound;
        };
        match rail.flip_to_line(note_id) {
            FlipOutcome::NotFound => FlipResult::NotFound,
            FlipOutcome::Unchanged => FlipResult::Unchanged,
            FlipOutcome::Flipped { .. } => FlipResult::Flipped { spawned: None },
        }
    }

    /// Merge `source` onto `target`'s tail and drop `source`. No-op when
    /// either rail is missing or empty.
    pub fn merge_rails(&mut self, target: RailId, source: RailId) -> bool {
        if target == source || !self.rails.contains_key(&target) {
            return false;
        }
        let Some(mut src) = self.rails.remove(&source) else {
            return false;
        };
        let Some(dst) = self.rails.get_mut(&target) else {
            self.rails.insert(source, src);
            return false;
        };
        if dst.merge(&mut src, &mut self.registry, &self.config) {
            true
        } else {
            self.rails.insert(source, src);
            false
        }
    }

    /// Tear a rail down: every member note is unbound and the rail is
    /// removed from this difficulty.
    pub fn destroy_rail(&mut self, id: RailId) -> bool {
        let Some(mut rail) = self.rails.remove(&id) else {
            return false;
        };
        rail.destroy(&mut self.registry);
        true
    }

    // ------------------------------------------------------------------
    // cross-rail queries
    // ------------------------------------------------------------------

    pub fn rails_in_range(&self, start_ms: f64, end_ms: f64, mode: RangeMode) -> Vec<RailId> {
        helper::rails_in_range(&self.rails, start_ms, end_ms, mode)
    }

    /// Clone a sub-range of a rail into this difficulty as a new rail.
    pub fn clone_rail_range(
        &mut self,
        rail_id: RailId,
        start_ms: f64,
        end_ms: f64,
        mode: RangeMode,
    ) -> Option<RailId> {
        let rail = self.rails.get(&rail_id)?;
        let copy = helper::clone_rail(&mut self.registry, rail, start_ms, end_ms, mode)?;
        Some(self.adopt(copy))
    }

    pub fn attempt_extend_head(
        &mut self,
        time_ms: f64,
        position: Position,
        hand: HandType,
        policy: ExtendPolicy,
    ) -> Option<RailId> {
        helper::attempt_extend_head(
            &mut self.rails,
            &self.notes,
            &mut self.registry,
            time_ms,
            position,
            hand,
            policy,
            &self.config,
        )
    }

    pub fn attempt_extend_tail(
        &mut self,
        time_ms: f64,
        position: Position,
        hand: HandType,
        policy: ExtendPolicy,
    ) -> Option<RailId> {
        helper::attempt_extend_tail(
            &mut self.rails,
            &self.notes,
            &mut self.registry,
            time_ms,
            position,
            hand,
            policy,
            &self.config,
        )
    }

    pub fn can_place_rail_type_here(
        &self,
        time_ms: f64,
        position: Position,
        hand: HandType,
    ) -> bool {
        helper::can_place_rail_type_here(
            &self.rails,
            &self.notes,
            time_ms,
            position,
            hand,
            &self.config,
        )
    }

    /// Cross-structure invariants: every rail chain is internally
    /// consistent and the registry holds exactly the live note set.
    pub fn assert_consistent(&self) {
        let mut live = 0usize;
        for rail in self.rails.values() {
            rail.assert_consistent();
            for note in rail.iter() {
                assert_eq!(
                    self.registry.owner_of(note.id),
                    Some(NoteOwner::Rail(rail.id())),
                    "registry lost track of note {}",
                    note.id
                );
            }
            live += rail.len();
        }
        for note in self.notes.iter() {
            assert_eq!(
                self.registry.owner_of(note.id),
                Some(NoteOwner::Standalone),
                "registry lost track of note {}",
                note.id
            );
        }
        live += self.notes.len();
        assert_eq!(live, self.registry.note_count(), "stale registry entries");
    }
}
