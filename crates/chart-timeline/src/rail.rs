use std::collections::{BTreeMap, HashMap};

use chart_model::{
    ChartError, HandType, Note, NoteId, NoteUsage, Position, RailId, RailSegments, SegmentPoint,
    TimeKey, TimelineConfig,
};
use log::{debug, warn};

use crate::registry::{NoteOwner, Registry};

/// One arena slot of a rail chain: the note plus its neighbor links.
///
/// Neighbors are stored as ids rather than references, so splicing and
/// removal stay O(1) without ownership cycles.
#[derive(Debug, Clone)]
struct ChainNode {
    note: Note,
    prev: Option<NoteId>,
    next: Option<NoteId>,
}

/// Breaker configuration of a rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Unbroken,
    HeadBroken,
    TailBroken,
    BothBroken,
}

/// Outcome of [`Rail::add_note`].
#[derive(Debug)]
pub enum AddNoteOutcome {
    /// The submitted note joined the chain. `spawned` carries the trailing
    /// half when a mid-chain breaker cut the rail.
    Inserted {
        id: NoteId,
        spawned: Option<Rail>,
    },
    /// An existing note inside the overlap window was flipped to breaker
    /// instead; the submitted note was dropped. The flip cascades into a
    /// cut when the existing note sat mid-chain.
    Coerced {
        existing: NoteId,
        spawned: Option<Rail>,
    },
    /// Duplicate slot, hand mismatch, or rail already scheduled for
    /// deletion. Nothing changed.
    Rejected,
}

impl AddNoteOutcome {
    pub fn spawned(self) -> Option<Rail> {
        match self {
            Self::Inserted { spawned, .. } | Self::Coerced { spawned, .. } => spawned,
            Self::Rejected => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected)
    }
}

/// Outcome of [`Rail::remove_note`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// The removed note was the last one; the rail is now scheduled for
    /// deletion and must be dropped by its owner.
    Emptied,
    NotFound,
}

/// Outcome of the usage flips.
#[derive(Debug)]
pub enum FlipOutcome {
    NotFound,
    /// Already in the requested state.
    Unchanged,
    Flipped { spawned: Option<Rail> },
}

impl FlipOutcome {
    pub fn spawned(self) -> Option<Rail> {
        match self {
            Self::Flipped { spawned } => spawned,
            _ => None,
        }
    }
}

/// A continuous multi-point object spanning a time interval.
///
/// The chain is an ordered doubly-linked list of notes reachable from the
/// `leader` (chronologically first note). Two parallel indexes are kept in
/// lock-step with the links: the by-id arena and the by-time map. Every
/// mutation leaves `chain length == by-id size == by-time size`.
#[derive(Debug, Clone)]
pub struct Rail {
    id: RailId,
    hand: HandType,
    nodes: HashMap<NoteId, ChainNode>,
    by_time: BTreeMap<TimeKey, NoteId>,
    leader: Option<NoteId>,
    breaker_head: Option<NoteId>,
    breaker_tail: Option<NoteId>,
    start_ms: f64,
    end_ms: f64,
    duration_ms: f64,
    scheduled_for_deletion: bool,
    dirty: bool,
}

impl Rail {
    pub(crate) fn new(id: RailId, hand: HandType) -> Self {
        Self {
            id,
            hand,
            nodes: HashMap::new(),
            by_time: BTreeMap::new(),
            leader: None,
            breaker_head: None,
            breaker_tail: None,
            start_ms: 0.0,
            end_ms: 0.0,
            duration_ms: 0.0,
            scheduled_for_deletion: false,
            dirty: false,
        }
    }

    /// Build a rail from pre-constructed notes in one shot.
    pub(crate) fn with_notes(
        id: RailId,
        hand: HandType,
        notes: Vec<Note>,
        registry: &mut Registry,
    ) -> Self {
        let mut rail = Self::new(id, hand);
        for note in notes {
            rail.insert_note_silent(note, registry);
        }
        rail.recompute();
        rail
    }

    pub fn id(&self) -> RailId {
        self.id
    }

    pub fn hand(&self) -> HandType {
        self.hand
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn start_ms(&self) -> f64 {
        self.start_ms
    }

    pub fn end_ms(&self) -> f64 {
        self.end_ms
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    pub fn leader(&self) -> Option<NoteId> {
        self.leader
    }

    pub fn breaker_head(&self) -> Option<NoteId> {
        self.breaker_head
    }

    pub fn breaker_tail(&self) -> Option<NoteId> {
        self.breaker_tail
    }

    pub fn breaker_state(&self) -> BreakerState {
        match (self.breaker_head.is_some(), self.breaker_tail.is_some()) {
            (false, false) => BreakerState::Unbroken,
            (true, false) => BreakerState::HeadBroken,
            (false, true) => BreakerState::TailBroken,
            (true, true) => BreakerState::BothBroken,
        }
    }

    pub fn is_scheduled_for_deletion(&self) -> bool {
        self.scheduled_for_deletion
    }

    /// A rail whose duration falls outside the configured window is not
    /// drawn, but it stays alive and editable.
    pub fn is_renderable(&self, config: &TimelineConfig) -> bool {
        !self.scheduled_for_deletion
            && self.duration_ms >= config.min_rail_duration_ms
            && self.duration_ms <= config.max_rail_duration_ms
    }

    pub fn note(&self, id: NoteId) -> Option<&Note> {
        self.nodes.get(&id).map(|n| &n.note)
    }

    pub fn note_at(&self, time: TimeKey) -> Option<&Note> {
        let id = self.by_time.get(&time)?;
        self.note(*id)
    }

    pub fn has_note_at(&self, time: TimeKey) -> bool {
        self.by_time.contains_key(&time)
    }

    pub fn first_id(&self) -> Option<NoteId> {
        self.by_time.values().next().copied()
    }

    pub fn last_id(&self) -> Option<NoteId> {
        self.by_time.values().next_back().copied()
    }

    /// Chain-order traversal from the leader.
    pub fn iter(&self) -> ChainIter<'_> {
        ChainIter {
            rail: self,
            cur: self.leader,
        }
    }

    pub fn ids_in_order(&self) -> Vec<NoteId> {
        self.iter().map(|n| n.id).collect()
    }

    /// First note whose slot lies within `epsilon_ms` of `time`.
    pub fn note_in_window(&self, time: TimeKey, epsilon_ms: f64) -> Option<NoteId> {
        let lo = TimeKey::new(time.ms() - epsilon_ms);
        let hi = TimeKey::new(time.ms() + epsilon_ms);
        self.by_time
            .range(lo..=hi)
            .find(|(k, _)| k.within(time, epsilon_ms))
            .map(|(_, id)| *id)
    }

    /// Time-sorted member positions for the renderer to rebuild the visual
    /// path after a structural mutation.
    pub fn path_points(&self) -> Vec<SegmentPoint> {
        self.iter()
            .map(|n| SegmentPoint {
                time_ms: n.time_ms(),
                x: n.position.x,
                y: n.position.y,
            })
            .collect()
    }

    /// True once after every structural mutation; the host clears it by
    /// taking it and reinstantiating the rendered path.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    // ------------------------------------------------------------------
    // chain mutation
    // ------------------------------------------------------------------

    /// Insert a note into the chain.
    ///
    /// Placement falls into three cases: no predecessor (the note becomes
    /// the new leader and the old leader shifts into the body), predecessor
    /// without successor (new tail), or a splice between two neighbors.
    /// Breaker notes follow the boundary rules on top of that: an existing
    /// note inside the overlap window is flipped in place rather than
    /// duplicated, a breaker placed past the current boundary demotes the
    /// old breaker to a plain segment, and a breaker landing mid-chain cuts
    /// the rail in two.
    pub fn add_note(
        &mut self,
        note: Note,
        registry: &mut Registry,
        config: &TimelineConfig,
    ) -> AddNoteOutcome {
        if self.scheduled_for_deletion {
            return AddNoteOutcome::Rejected;
        }
        if note.hand != self.hand {
            warn!(
                "note {} hand {:?} does not match rail {} ({:?})",
                note.id, note.hand, self.id, self.hand
            );
            return AddNoteOutcome::Rejected;
        }

        if let Some(existing) = self.note_in_window(note.time, config.time_overlay_epsilon_ms) {
            if note.usage.is_breaker() {
                // idempotent coercion: flip the occupant instead of
                // inserting a duplicate slot
                let spawned = self.flip_to_breaker(existing, registry).spawned();
                return AddNoteOutcome::Coerced { existing, spawned };
            }
            debug!(
                "rail {}: duplicate slot at {} refused",
                self.id, note.time
            );
            return AddNoteOutcome::Rejected;
        }

        if note.usage.is_breaker() {
            return self.add_breaker(note, registry);
        }

        // a rail closed by a breaker cannot grow past it on that side;
        // only another breaker may take the boundary over
        let past_tail = self
            .by_time
            .keys()
            .next_back()
            .is_some_and(|last| note.time > *last);
        if past_tail && self.breaker_tail.is_some() {
            debug!("rail {}: segment past tail breaker refused", self.id);
            return AddNoteOutcome::Rejected;
        }
        let before_head = self
            .by_time
            .keys()
            .next()
            .is_some_and(|first| note.time < *first);
        if before_head && self.breaker_head.is_some() {
            debug!("rail {}: segment before head breaker refused", self.id);
            return AddNoteOutcome::Rejected;
        }

        let id = self.insert_note_silent(note, registry);
        self.recompute();
        AddNoteOutcome::Inserted { id, spawned: None }
    }

    fn add_breaker(&mut self, note: Note, registry: &mut Registry) -> AddNoteOutcome {
        if self.by_time.is_empty() {
            let id = self.insert_note_silent(note, registry);
            self.recompute();
            return AddNoteOutcome::Inserted { id, spawned: None };
        }

        let first = *self.by_time.keys().next().unwrap_or(&note.time);
        let last = *self.by_time.keys().next_back().unwrap_or(&note.time);

        if note.time > last {
            // extending past the tail; an old tail breaker demotes to a
            // plain segment
            if let Some(old) = self.breaker_tail.take() {
                self.node_mut(old).note.usage = NoteUsage::Line;
            }
            let id = self.insert_note_silent(note, registry);
            self.recompute();
            AddNoteOutcome::Inserted { id, spawned: None }
        } else if note.time < first {
            if let Some(old) = self.breaker_head.take() {
                self.node_mut(old).note.usage = NoteUsage::Line;
            }
            let id = self.insert_note_silent(note, registry);
            self.recompute();
            AddNoteOutcome::Inserted { id, spawned: None }
        } else {
            // mid-chain breaker cuts the rail
            let id = self.insert_note_silent(note, registry);
            let spawned = self.split_after(id, registry);
            self.recompute();
            AddNoteOutcome::Inserted { id, spawned }
        }
    }

    /// Remove one note from the chain. Three cases:
    /// sole remaining note (the whole rail is scheduled for deletion),
    /// boundary breaker (the neighbor becomes the new end), or a body note
    /// (neighbors are relinked directly, with the leader role passed on
    /// when the leader itself goes).
    pub fn remove_note(&mut self, id: NoteId, registry: &mut Registry) -> RemoveOutcome {
        if !self.nodes.contains_key(&id) {
            return RemoveOutcome::NotFound;
        }
        if self.nodes.len() == 1 {
            self.unlink(id);
            registry.unbind(id);
            self.scheduled_for_deletion = true;
            self.recompute();
            debug!("rail {} emptied, scheduled for deletion", self.id);
            return RemoveOutcome::Emptied;
        }
        // breaker, leader, and body removals all reduce to an unlink: the
        // neighbors are joined and the leader/boundary roles re-derived
        self.unlink(id);
        registry.unbind(id);
        self.recompute();
        RemoveOutcome::Removed
    }

    /// Reclassify a note as a boundary breaker. A tail or head note simply
    /// gains the boundary role; a body note cuts the rail, returning the
    /// trailing half as a spawned rail. No-op when already a breaker.
    pub fn flip_to_breaker(&mut self, id: NoteId, registry: &mut Registry) -> FlipOutcome {
        if self.scheduled_for_deletion {
            return FlipOutcome::NotFound;
        }
        let Some(node) = self.nodes.get(&id) else {
            return FlipOutcome::NotFound;
        };
        if node.note.usage.is_breaker() {
            return FlipOutcome::Unchanged;
        }
        let internal = node.prev.is_some() && node.next.is_some();
        self.node_mut(id).note.usage = NoteUsage::Breaker;
        let spawned = if internal {
            self.split_after(id, registry)
        } else {
            None
        };
        self.recompute();
        FlipOutcome::Flipped { spawned }
    }

    /// Reclassify a breaker back to a plain segment, reopening that end for
    /// extension. No-op when already a segment.
    pub fn flip_to_line(&mut self, id: NoteId) -> FlipOutcome {
        if self.scheduled_for_deletion {
            return FlipOutcome::NotFound;
        }
        let Some(node) = self.nodes.get(&id) else {
            return FlipOutcome::NotFound;
        };
        if !node.note.usage.is_breaker() {
            return FlipOutcome::Unchanged;
        }
        self.node_mut(id).note.usage = NoteUsage::Line;
        self.recompute();
        FlipOutcome::Flipped { spawned: None }
    }

    /// Detach the chain from `first_tail` to the end and reattach every
    /// visited note, silently, to a brand-new rail of the same hand class.
    /// Returns the new rail, or `None` when there is no such tail.
    pub fn convert_tail_into_new_rail(
        &mut self,
        first_tail: NoteId,
        registry: &mut Registry,
    ) -> Option<Rail> {
        if !self.nodes.contains_key(&first_tail) {
            return None;
        }
        let mut ids = Vec::new();
        let mut cur = Some(first_tail);
        while let Some(id) = cur {
            ids.push(id);
            cur = self.nodes[&id].next;
        }

        let mut rail = Rail::new(registry.allocate_rail_id(), self.hand);
        for id in ids {
            if let Some(node) = self.unlink(id) {
                rail.insert_note_silent(node.note, registry);
            }
        }
        self.recompute();
        rail.recompute();
        Some(rail)
    }

    /// Append all of `other`'s notes onto this rail's tail and leave
    /// `other` empty and scheduled for deletion. The joining boundary
    /// breakers (this tail, other head) are demoted to plain segments
    /// first; a note of `other` landing in an already-occupied overlap
    /// slot is dropped. Fails without mutating if either rail is empty.
    pub fn merge(
        &mut self,
        other: &mut Rail,
        registry: &mut Registry,
        config: &TimelineConfig,
    ) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        if self.scheduled_for_deletion || other.scheduled_for_deletion {
            return false;
        }
        if other.hand != self.hand {
            warn!(
                "cannot merge rail {} ({:?}) into rail {} ({:?})",
                other.id, other.hand, self.id, self.hand
            );
            return false;
        }

        if let Some(old) = self.breaker_tail.take() {
            self.node_mut(old).note.usage = NoteUsage::Line;
        }
        if let Some(old) = other.breaker_head.take() {
            other.node_mut(old).note.usage = NoteUsage::Line;
        }

        for id in other.ids_in_order() {
            let Some(node) = other.unlink(id) else {
                continue;
            };
            if self
                .note_in_window(node.note.time, config.time_overlay_epsilon_ms)
                .is_some()
            {
                // duplicate junction slot, e.g. the head copy left by a cut
                registry.unbind(id);
                continue;
            }
            self.insert_note_silent(node.note, registry);
        }
        other.scheduled_for_deletion = true;
        other.recompute();
        self.recompute();
        debug!("rail {} absorbed rail {}", self.id, other.id);
        true
    }

    /// Unbind every note and schedule the rail for deletion. The owning
    /// container calls this at the point of removal so teardown order is
    /// deterministic.
    pub fn destroy(&mut self, registry: &mut Registry) {
        for id in self.ids_in_order() {
            registry.unbind(id);
        }
        self.nodes.clear();
        self.by_time.clear();
        self.leader = None;
        self.scheduled_for_deletion = true;
        self.recompute();
        debug!("rail {} destroyed", self.id);
    }

    // ------------------------------------------------------------------
    // flat form
    // ------------------------------------------------------------------

    /// Flatten into the persistence form: ordered member points with the
    /// first/last entries classified as boundary breakers.
    pub fn to_segments(&self) -> RailSegments {
        RailSegments {
            hand: self.hand,
            points: self.path_points(),
            head_breaker: self.breaker_head.is_some(),
            tail_breaker: self.breaker_tail.is_some(),
        }
    }

    /// Rebuild a full chain/index/boundary state from the flat form.
    pub fn from_segments(
        registry: &mut Registry,
        segments: &RailSegments,
    ) -> Result<Rail, ChartError> {
        segments.validate()?;
        let mut rail = Rail::new(registry.allocate_rail_id(), segments.hand);
        let last = segments.points.len() - 1;
        for (i, p) in segments.points.iter().enumerate() {
            let boundary = (i == 0 && segments.head_breaker) || (i == last && segments.tail_breaker);
            let id = registry.allocate_note_id();
            let note = if boundary {
                Note::breaker(id, p.time_ms, Position::new(p.x, p.y), segments.hand)
            } else {
                Note::line(id, p.time_ms, Position::new(p.x, p.y), segments.hand)
            };
            rail.insert_note_silent(note, registry);
        }
        rail.recompute();
        Ok(rail)
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    fn node_mut(&mut self, id: NoteId) -> &mut ChainNode {
        self.nodes
            .get_mut(&id)
            .expect("chain node missing for indexed id")
    }

    /// Link a note into the chain and both indexes without recomputing the
    /// derived state. Used by bulk moves; every public path recomputes
    /// before returning.
    pub(crate) fn insert_note_silent(&mut self, mut note: Note, registry: &mut Registry) -> NoteId {
        note.rail = Some(self.id);
        let id = note.id;
        let time = note.time;
        debug_assert!(
            !self.by_time.contains_key(&time),
            "rail {} already holds slot {}",
            self.id,
            time
        );
        registry.bind(id, NoteOwner::Rail(self.id));

        let pred = self.by_time.range(..time).next_back().map(|(_, id)| *id);
        match pred {
            None => {
                let old = self.leader;
                if let Some(old_id) = old {
                    self.node_mut(old_id).prev = Some(id);
                }
                self.nodes.insert(
                    id,
                    ChainNode {
                        note,
                        prev: None,
                        next: old,
                    },
                );
                self.leader = Some(id);
            }
            Some(p) => match self.nodes[&p].next {
                None => {
                    self.node_mut(p).next = Some(id);
                    self.nodes.insert(
                        id,
                        ChainNode {
                            note,
                            prev: Some(p),
                            next: None,
                        },
                    );
                }
                Some(s) => {
                    self.node_mut(p).next = Some(id);
                    self.node_mut(s).prev = Some(id);
                    self.nodes.insert(
                        id,
                        ChainNode {
                            note,
                            prev: Some(p),
                            next: Some(s),
                        },
                    );
                }
            },
        }
        self.by_time.insert(time, id);
        id
    }

    /// Remove a node from the chain and both indexes, joining its
    /// neighbors and passing on the leader role. Does not touch the
    /// registry; callers decide between unbind (removal) and rebind (move).
    fn unlink(&mut self, id: NoteId) -> Option<ChainNode> {
        let node = self.nodes.remove(&id)?;
        self.by_time.remove(&node.note.time);
        if let Some(p) = node.prev {
            self.node_mut(p).next = node.next;
        }
        if let Some(s) = node.next {
            self.node_mut(s).prev = node.prev;
        }
        if self.leader == Some(id) {
            self.leader = node.next;
        }
        if self.breaker_head == Some(id) {
            self.breaker_head = None;
        }
        if self.breaker_tail == Some(id) {
            self.breaker_tail = None;
        }
        Some(node)
    }

    /// Cut the chain after `breaker_id`: the trailing run moves to a new
    /// rail, which also receives a fresh-id breaker copy of the junction
    /// note as its head so both halves hold the cut point.
    fn split_after(&mut self, breaker_id: NoteId, registry: &mut Registry) -> Option<Rail> {
        let succ = self.nodes.get(&breaker_id)?.next?;
        let mut spawned = self.convert_tail_into_new_rail(succ, registry)?;

        let mut junction = self.nodes[&breaker_id].note.clone();
        junction.id = registry.allocate_note_id();
        junction.usage = NoteUsage::Breaker;
        spawned.insert_note_silent(junction, registry);
        spawned.recompute();
        debug!(
            "rail {} cut at note {}: tail moved to rail {}",
            self.id,
            breaker_id,
            spawned.id()
        );
        Some(spawned)
    }

    /// Re-derive endpoints, duration, and boundary roles from the chain
    /// contents, and mark the rendered path stale.
    fn recompute(&mut self) {
        let first = self.by_time.values().next().copied();
        let last = self.by_time.values().next_back().copied();
        match (first, last) {
            (Some(f), Some(l)) => {
                self.start_ms = self.nodes[&f].note.time_ms();
                self.end_ms = self.nodes[&l].note.time_ms();
                self.duration_ms = self.end_ms - self.start_ms;
                self.breaker_head = self.nodes[&f].note.usage.is_breaker().then_some(f);
                self.breaker_tail = self.nodes[&l].note.usage.is_breaker().then_some(l);
            }
            _ => {
                self.start_ms = 0.0;
                self.end_ms = 0.0;
                self.duration_ms = 0.0;
                self.breaker_head = None;
                self.breaker_tail = None;
                self.scheduled_for_deletion = true;
            }
        }
        self.dirty = true;
        #[cfg(debug_assertions)]
        self.assert_consistent();
    }

    /// Chain/index lock-step invariant: traversal from the leader visits
    /// every indexed note exactly once, in increasing time order, with
    /// symmetric links and no breaker in the chain body.
    pub fn assert_consistent(&self) {
        assert_eq!(self.nodes.len(), self.by_time.len(), "index sizes diverged");
        let mut count = 0usize;
        let mut prev: Option<NoteId> = None;
        let mut last_time: Option<TimeKey> = None;
        let mut cur = self.leader;
        while let Some(id) = cur {
            let node = self.nodes.get(&id).expect("chain reaches unindexed note");
            assert_eq!(node.prev, prev, "asymmetric links at {id}");
            assert_eq!(self.by_time.get(&node.note.time), Some(&id));
            if let Some(t) = last_time {
                assert!(node.note.time > t, "chain out of order at {id}");
            }
            if node.prev.is_some() && node.next.is_some() {
                assert!(
                    !node.note.usage.is_breaker(),
                    "breaker in chain body at {id}"
                );
            }
            last_time = Some(node.note.time);
            prev = Some(id);
            count += 1;
            cur = node.next;
        }
        assert_eq!(count, self.nodes.len(), "chain misses indexed notes");
    }
}

/// Iterator over a rail's notes in chain order.
pub struct ChainIter<'a> {
    rail: &'a Rail,
    cur: Option<NoteId>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a Note;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let node = self.rail.nodes.get(&id)?;
        self.cur = node.next;
        Some(&node.note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TimelineConfig {
        TimelineConfig::default()
    }

    fn make_rail(reg: &mut Registry, times: &[f64]) -> Rail {
        let mut rail = Rail::new(reg.allocate_rail_id(), HandType::LeftHand);
        for &t in times {
            let note = Note::line(
                reg.allocate_note_id(),
                t,
                Position::new(t as f32 / 1000.0, 0.0),
                HandType::LeftHand,
            );
            let outcome = rail.add_note(note, reg, &cfg());
            assert!(!outcome.is_rejected(), "setup insert failed at {t}");
        }
        rail
    }

    fn times_of(rail: &Rail) -> Vec<f64> {
        rail.iter().map(|n| n.time_ms()).collect()
    }

    #[test]
    fn add_out_of_order_builds_sorted_chain() {
        let mut reg = Registry::new();
        let rail = make_rail(&mut reg, &[500.0, 0.0, 250.0]);
        assert_eq!(times_of(&rail), vec![0.0, 250.0, 500.0]);
        assert_eq!(rail.len(), 3);
        assert_eq!(rail.start_ms(), 0.0);
        assert_eq!(rail.end_ms(), 500.0);
        assert_eq!(rail.duration_ms(), 500.0);
        let leader = rail.leader().unwrap();
        assert_eq!(rail.note(leader).unwrap().time_ms(), 0.0);
        rail.assert_consistent();
    }

    #[test]
    fn new_leader_shifts_old_one_into_body() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[250.0, 500.0]);
        let old_leader = rail.leader().unwrap();

        let note = Note::line(
            reg.allocate_note_id(),
            0.0,
            Position::default(),
            HandType::LeftHand,
        );
        rail.add_note(note, &mut reg, &cfg());

        let leader = rail.leader().unwrap();
        assert_ne!(leader, old_leader);
        assert_eq!(rail.note(leader).unwrap().time_ms(), 0.0);
        assert_eq!(times_of(&rail), vec![0.0, 250.0, 500.0]);
    }

    #[test]
    fn duplicate_slot_refused_for_line_notes() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 250.0]);
        let dup = Note::line(
            reg.allocate_note_id(),
            252.0, // inside the 10ms overlap window of 250
            Position::default(),
            HandType::LeftHand,
        );
        assert!(rail.add_note(dup, &mut reg, &cfg()).is_rejected());
        assert_eq!(rail.len(), 2);
    }

    #[test]
    fn hand_mismatch_rejected() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 250.0]);
        let wrong = Note::line(
            reg.allocate_note_id(),
            400.0,
            Position::default(),
            HandType::RightHand,
        );
        assert!(rail.add_note(wrong, &mut reg, &cfg()).is_rejected());
    }

    #[test]
    fn breaker_past_tail_breaker_extends() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 250.0]);
        let tail = rail.last_id().unwrap();
        rail.flip_to_breaker(tail, &mut reg);
        assert_eq!(rail.breaker_tail(), Some(tail));

        let brk = Note::breaker(
            reg.allocate_note_id(),
            500.0,
            Position::default(),
            HandType::LeftHand,
        );
        let outcome = rail.add_note(brk, &mut reg, &cfg());
        assert!(outcome.spawned().is_none());
        assert_eq!(rail.len(), 3);
        // old breaker demoted, new tail carries the boundary
        assert_eq!(rail.note(tail).unwrap().usage, NoteUsage::Line);
        assert_eq!(
            rail.note(rail.breaker_tail().unwrap()).unwrap().time_ms(),
            500.0
        );
    }

    #[test]
    fn breaker_before_head_breaker_extends() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[250.0, 500.0]);
        let head = rail.first_id().unwrap();
        rail.flip_to_breaker(head, &mut reg);
        assert_eq!(rail.breaker_head(), Some(head));

        let brk = Note::breaker(
            reg.allocate_note_id(),
            0.0,
            Position::default(),
            HandType::LeftHand,
        );
        rail.add_note(brk, &mut reg, &cfg());
        assert_eq!(rail.note(head).unwrap().usage, NoteUsage::Line);
        assert_eq!(
            rail.note(rail.breaker_head().unwrap()).unwrap().time_ms(),
            0.0
        );
        assert_eq!(rail.leader(), rail.breaker_head());
    }

    #[test]
    fn mid_chain_breaker_cuts_the_rail() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 200.0, 400.0, 600.0]);
        let brk = Note::breaker(
            reg.allocate_note_id(),
            300.0,
            Position::default(),
            HandType::LeftHand,
        );
        let spawned = rail.add_note(brk, &mut reg, &cfg()).spawned().unwrap();

        assert_eq!(times_of(&rail), vec![0.0, 200.0, 300.0]);
        assert_eq!(rail.breaker_state(), BreakerState::TailBroken);
        assert_eq!(times_of(&spawned), vec![300.0, 400.0, 600.0]);
        assert_eq!(spawned.breaker_state(), BreakerState::HeadBroken);
        assert_eq!(spawned.hand(), rail.hand());
        rail.assert_consistent();
        spawned.assert_consistent();
    }

    #[test]
    fn breaker_over_existing_slot_coerces() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 250.0]);
        let existing = rail.last_id().unwrap();
        let brk = Note::breaker(
            reg.allocate_note_id(),
            250.0,
            Position::default(),
            HandType::LeftHand,
        );
        match rail.add_note(brk, &mut reg, &cfg()) {
            AddNoteOutcome::Coerced { existing: id, spawned } => {
                assert_eq!(id, existing);
                assert!(spawned.is_none());
            }
            other => panic!("expected coercion, got {other:?}"),
        }
        assert_eq!(rail.len(), 2);
        assert_eq!(rail.breaker_tail(), Some(existing));

        // coercion is idempotent
        let again = Note::breaker(
            reg.allocate_note_id(),
            250.0,
            Position::default(),
            HandType::LeftHand,
        );
        match rail.add_note(again, &mut reg, &cfg()) {
            AddNoteOutcome::Coerced { spawned, .. } => assert!(spawned.is_none()),
            other => panic!("expected coercion, got {other:?}"),
        }
        assert_eq!(rail.len(), 2);
    }

    #[test]
    fn segment_cannot_pass_a_breaker_boundary() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[250.0, 500.0]);
        let tail = rail.last_id().unwrap();
        let head = rail.first_id().unwrap();
        rail.flip_to_breaker(tail, &mut reg);
        rail.flip_to_breaker(head, &mut reg);

        let past = Note::line(
            reg.allocate_note_id(),
            750.0,
            Position::default(),
            HandType::LeftHand,
        );
        assert!(rail.add_note(past, &mut reg, &cfg()).is_rejected());

        let before = Note::line(
            reg.allocate_note_id(),
            0.0,
            Position::default(),
            HandType::LeftHand,
        );
        assert!(rail.add_note(before, &mut reg, &cfg()).is_rejected());
        assert_eq!(rail.len(), 2);

        // an interior segment is still welcome
        let inside = Note::line(
            reg.allocate_note_id(),
            375.0,
            Position::default(),
            HandType::LeftHand,
        );
        assert!(!rail.add_note(inside, &mut reg, &cfg()).is_rejected());
        assert_eq!(rail.len(), 3);
        rail.assert_consistent();
    }

    #[test]
    fn remove_sole_note_schedules_deletion() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[100.0]);
        let id = rail.leader().unwrap();
        assert_eq!(rail.remove_note(id, &mut reg), RemoveOutcome::Emptied);
        assert!(rail.is_scheduled_for_deletion());
        assert!(rail.is_empty());
        assert_eq!(reg.owner_of(id), None);
        // terminal state: further mutation is refused
        let note = Note::line(
            reg.allocate_note_id(),
            200.0,
            Position::default(),
            HandType::LeftHand,
        );
        assert!(rail.add_note(note, &mut reg, &cfg()).is_rejected());
    }

    #[test]
    fn remove_tail_breaker_reopens_end() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 250.0, 500.0]);
        let tail = rail.last_id().unwrap();
        rail.flip_to_breaker(tail, &mut reg);

        assert_eq!(rail.remove_note(tail, &mut reg), RemoveOutcome::Removed);
        assert_eq!(times_of(&rail), vec![0.0, 250.0]);
        assert_eq!(rail.breaker_state(), BreakerState::Unbroken);
        assert_eq!(rail.duration_ms(), 250.0);
    }

    #[test]
    fn remove_head_breaker_promotes_successor() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 250.0, 500.0]);
        let head = rail.first_id().unwrap();
        rail.flip_to_breaker(head, &mut reg);

        assert_eq!(rail.remove_note(head, &mut reg), RemoveOutcome::Removed);
        assert_eq!(rail.note(rail.leader().unwrap()).unwrap().time_ms(), 250.0);
        assert_eq!(rail.breaker_state(), BreakerState::Unbroken);
    }

    #[test]
    fn remove_leader_promotes_next() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 250.0, 500.0]);
        let leader = rail.leader().unwrap();
        rail.remove_note(leader, &mut reg);
        assert_eq!(rail.note(rail.leader().unwrap()).unwrap().time_ms(), 250.0);
        assert_eq!(times_of(&rail), vec![250.0, 500.0]);
    }

    #[test]
    fn remove_body_note_relinks_neighbors() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 250.0, 500.0]);
        let mid = rail.ids_in_order()[1];
        rail.remove_note(mid, &mut reg);
        assert_eq!(times_of(&rail), vec![0.0, 500.0]);
        assert_eq!(rail.duration_ms(), 500.0);
        rail.assert_consistent();
    }

    #[test]
    fn flip_internal_note_splits() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 250.0, 500.0]);
        let mid = rail.ids_in_order()[1];
        let spawned = rail.flip_to_breaker(mid, &mut reg).spawned().unwrap();

        assert_eq!(times_of(&rail), vec![0.0, 250.0]);
        assert_eq!(rail.breaker_tail(), Some(mid));
        assert_eq!(times_of(&spawned), vec![250.0, 500.0]);
        // the trailing note kept its class and id
        assert_eq!(
            spawned.iter().last().unwrap().usage,
            NoteUsage::Line
        );
    }

    #[test]
    fn flip_back_to_line_reopens() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 500.0]);
        let tail = rail.last_id().unwrap();
        rail.flip_to_breaker(tail, &mut reg);
        assert_eq!(rail.breaker_state(), BreakerState::TailBroken);

        assert!(matches!(
            rail.flip_to_line(tail),
            FlipOutcome::Flipped { .. }
        ));
        assert_eq!(rail.breaker_state(), BreakerState::Unbroken);
        assert!(matches!(rail.flip_to_line(tail), FlipOutcome::Unchanged));
    }

    #[test]
    fn merge_restores_split_chain() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 250.0, 500.0]);
        let mid = rail.ids_in_order()[1];
        let mut spawned = rail.flip_to_breaker(mid, &mut reg).spawned().unwrap();

        assert!(rail.merge(&mut spawned, &mut reg, &cfg()));
        assert_eq!(times_of(&rail), vec![0.0, 250.0, 500.0]);
        assert_eq!(rail.breaker_state(), BreakerState::Unbroken);
        assert!(spawned.is_empty());
        assert!(spawned.is_scheduled_for_deletion());
        rail.assert_consistent();
    }

    #[test]
    fn merge_empty_rail_fails() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 250.0]);
        let mut empty = Rail::new(reg.allocate_rail_id(), HandType::LeftHand);
        assert!(!rail.merge(&mut empty, &mut reg, &cfg()));
        assert_eq!(rail.len(), 2);
    }

    #[test]
    fn merge_keeps_far_tail_breaker() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 250.0]);
        let mut other = make_rail(&mut reg, &[500.0, 750.0]);
        let other_tail = other.last_id().unwrap();
        other.flip_to_breaker(other_tail, &mut reg);

        assert!(rail.merge(&mut other, &mut reg, &cfg()));
        assert_eq!(times_of(&rail), vec![0.0, 250.0, 500.0, 750.0]);
        assert_eq!(rail.breaker_state(), BreakerState::TailBroken);
    }

    #[test]
    fn destroy_unbinds_every_note() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 250.0, 500.0]);
        let ids = rail.ids_in_order();
        rail.destroy(&mut reg);
        assert!(rail.is_scheduled_for_deletion());
        for id in ids {
            assert_eq!(reg.owner_of(id), None);
        }
    }

    #[test]
    fn segments_round_trip() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 250.0, 500.0]);
        let tail = rail.last_id().unwrap();
        rail.flip_to_breaker(tail, &mut reg);

        let flat = rail.to_segments();
        assert!(!flat.head_breaker);
        assert!(flat.tail_breaker);

        let rebuilt = Rail::from_segments(&mut reg, &flat).unwrap();
        assert_eq!(rebuilt.to_segments().points, flat.points);
        assert_eq!(rebuilt.breaker_state(), BreakerState::TailBroken);
        assert_eq!(rebuilt.duration_ms(), 500.0);
        rebuilt.assert_consistent();
    }

    #[test]
    fn from_segments_rejects_bad_input() {
        let mut reg = Registry::new();
        let flat = RailSegments {
            hand: HandType::LeftHand,
            points: vec![],
            head_breaker: false,
            tail_breaker: false,
        };
        assert_eq!(
            Rail::from_segments(&mut reg, &flat).unwrap_err(),
            ChartError::EmptySegments
        );
    }

    #[test]
    fn renderability_window() {
        let mut reg = Registry::new();
        let short = make_rail(&mut reg, &[0.0, 50.0]);
        let fine = make_rail(&mut reg, &[0.0, 500.0]);
        let long = make_rail(&mut reg, &[0.0, 20_000.0]);
        assert!(!short.is_renderable(&cfg()));
        assert!(fine.is_renderable(&cfg()));
        assert!(!long.is_renderable(&cfg()));
        // out-of-window rails stay alive
        assert!(!long.is_scheduled_for_deletion());
    }

    #[test]
    fn dirty_set_on_mutation() {
        let mut reg = Registry::new();
        let mut rail = make_rail(&mut reg, &[0.0, 250.0]);
        assert!(rail.take_dirty());
        assert!(!rail.take_dirty());
        let mid = rail.last_id().unwrap();
        rail.remove_note(mid, &mut reg);
        assert!(rail.take_dirty());
    }
}
