//! Cross-rail algorithms: range queries, sub-chain cloning, endpoint
//! extension, and placement-validity evaluation.
//!
//! All functions here are stateless over the difficulty's collections; the
//! per-difficulty container wires them into its host-facing API.

use std::collections::HashMap;

use chart_model::{HandType, Note, Position, RailId, TimeKey, TimelineConfig};
use log::debug;

use crate::note_store::NoteStore;
use crate::rail::{AddNoteOutcome, Rail};
use crate::registry::Registry;

/// Range matching for queries and clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeMode {
    /// Only entities fully inside the range.
    Inside,
    /// Also entities partially overlapping the range boundaries.
    Allow,
}

/// Whether endpoint extension may fall back to a bridging connector rail
/// when a direct append would exceed the duration bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendPolicy {
    DirectOnly,
    AllowBridge,
}

/// How an existing entity touches a requested placement point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TouchClass {
    ExactPoint,
    SameTimeOtherPoint,
    NoMatch,
}

/// Rails inside (or, under `Allow`, overlapping) `[start_ms, end_ms]`,
/// ordered by start time.
pub fn rails_in_range(
    rails: &HashMap<RailId, Rail>,
    start_ms: f64,
    end_ms: f64,
    mode: RangeMode,
) -> Vec<RailId> {
    let mut hits: Vec<&Rail> = rails
        .values()
        .filter(|r| !r.is_scheduled_for_deletion() && !r.is_empty())
        .filter(|r| match mode {
            RangeMode::Inside => r.start_ms() >= start_ms && r.end_ms() <= end_ms,
            RangeMode::Allow => r.start_ms() <= end_ms && r.end_ms() >= start_ms,
        })
        .collect();
    hits.sort_by(|a, b| a.start_ms().total_cmp(&b.start_ms()).then(a.id().cmp(&b.id())));
    hits.into_iter().map(|r| r.id()).collect()
}

/// Deep-copy the sub-chain of `rail` whose notes fall in
/// `[start_ms, end_ms]`, with fresh ids. Under `Allow` the one note
/// straddling each boundary joins the copy. Returns `None` for an empty
/// selection, or if the selection is not a contiguous run of the chain.
pub fn clone_rail(
    registry: &mut Registry,
    rail: &Rail,
    start_ms: f64,
    end_ms: f64,
    mode: RangeMode,
) -> Option<Rail> {
    let (lo, hi) = if start_ms <= end_ms {
        (start_ms, end_ms)
    } else {
        (end_ms, start_ms)
    };
    let notes: Vec<&Note> = rail.iter().collect();
    let selected: Vec<usize> = notes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.time_ms() >= lo && n.time_ms() <= hi)
        .map(|(i, _)| i)
        .collect();
    if selected.is_empty() {
        return None;
    }
    // a clone only ever yields a contiguous sub-chain or nothing
    if selected.windows(2).any(|w| w[1] != w[0] + 1) {
        debug!("clone of rail {} refused: selection has a gap", rail.id());
        return None;
    }

    let mut first = selected[0];
    let mut last = selected[selected.len() - 1];
    if mode == RangeMode::Allow {
        first = first.saturating_sub(1);
        last = (last + 1).min(notes.len() - 1);
    }

    let copies: Vec<Note> = notes[first..=last]
        .iter()
        .map(|n| {
            let mut copy = (*n).clone();
            copy.id = registry.allocate_note_id();
            copy.rail = None;
            copy
        })
        .collect();
    Some(Rail::with_notes(
        registry.allocate_rail_id(),
        rail.hand(),
        copies,
        registry,
    ))
}

/// Whether anything incompatible occupies the open time interval between
/// `from_ms` and `to_ms`: a standalone note that is not of the opposite
/// hand class, or a non-opposite rail whose span crosses the interval.
pub fn has_rail_interruptions_between(
    rails: &HashMap<RailId, Rail>,
    store: &NoteStore,
    from_ms: f64,
    to_ms: f64,
    hand: HandType,
    exclude: Option<RailId>,
) -> bool {
    let (lo, hi) = if from_ms <= to_ms {
        (from_ms, to_ms)
    } else {
        (to_ms, from_ms)
    };
    let compatible = |other: HandType| hand.opposite() == Some(other);

    let lo_key = TimeKey::new(lo);
    let hi_key = TimeKey::new(hi);
    if lo_key == hi_key {
        // degenerate interval, nothing fits inside it
        return false;
    }
    if store
        .notes_between(lo_key, hi_key)
        .any(|n| !compatible(n.hand))
    {
        return true;
    }

    rails
        .values()
        .filter(|r| Some(r.id()) != exclude)
        .filter(|r| !r.is_scheduled_for_deletion() && !r.is_empty())
        .filter(|r| !compatible(r.hand()))
        .any(|r| r.start_ms() < hi && r.end_ms() > lo)
}

/// Try to grow the nearest matching rail backwards so its head reaches
/// `time_ms`. See [`attempt_extend_tail`] for the rules; this is the
/// mirror image.
pub fn attempt_extend_head(
    rails: &mut HashMap<RailId, Rail>,
    store: &NoteStore,
    registry: &mut Registry,
    time_ms: f64,
    position: Position,
    hand: HandType,
    policy: ExtendPolicy,
    config: &TimelineConfig,
) -> Option<RailId> {
    let target = rails
        .values()
        .filter(|r| !r.is_scheduled_for_deletion() && !r.is_empty())
        .filter(|r| r.hand() == hand && r.breaker_head().is_none())
        .filter(|r| r.start_ms() - time_ms >= config.time_overlay_epsilon_ms)
        .min_by(|a, b| a.start_ms().total_cmp(&b.start_ms()).then(a.id().cmp(&b.id())))
        .map(|r| r.id())?;

    let (start, end, len) = {
        let r = &rails[&target];
        (r.start_ms(), r.end_ms(), r.len())
    };
    if has_rail_interruptions_between(rails, store, time_ms, start, hand, Some(target)) {
        return None;
    }

    if end - time_ms <= config.max_rail_duration_ms {
        let note = Note::line(registry.allocate_note_id(), time_ms, position, hand);
        let rail = rails.get_mut(&target)?;
        return match rail.add_note(note, registry, config) {
            AddNoteOutcome::Inserted { .. } => Some(target),
            _ => None,
        };
    }

    if policy == ExtendPolicy::AllowBridge {
        let gap = start - time_ms;
        if gap <= config.max_rail_duration_ms && len > 1 {
            let head_pos = rails[&target]
                .iter()
                .next()
                .map(|n| n.position)
                .unwrap_or(position);
            let bridge = make_bridge(registry, hand, time_ms, position, start, head_pos);
            let id = bridge.id();
            debug!("bridged {gap}ms before rail {target} with rail {id}");
            rails.insert(id, bridge);
            return Some(id);
        }
    }
    None
}

/// Try to grow the nearest rail of `hand` whose unbroken tail faces
/// `time_ms`. A plain segment is appended while the resulting duration
/// stays within the bound; otherwise, under [`ExtendPolicy::AllowBridge`],
/// a short connector rail closed by breakers at both ends bridges the gap,
/// provided the gap itself fits the bound and the target rail has more
/// than one note. Returns the mutated or created rail, or `None`.
pub fn attempt_extend_tail(
    rails: &mut HashMap<RailId, Rail>,
    store: &NoteStore,
    registry: &mut Registry,
    time_ms: f64,
    position: Position,
    hand: HandType,
    policy: ExtendPolicy,
    config: &TimelineConfig,
) -> Option<RailId> {
    let target = rails
        .values()
        .filter(|r| !r.is_scheduled_for_deletion() && !r.is_empty())
        .filter(|r| r.hand() == hand && r.breaker_tail().is_none())
        .filter(|r| time_ms - r.end_ms() >= config.time_overlay_epsilon_ms)
        .max_by(|a, b| a.end_ms().total_cmp(&b.end_ms()).then(b.id().cmp(&a.id())))
        .map(|r| r.id())?;

    let (start, end, len) = {
        let r = &rails[&target];
        (r.start_ms(), r.end_ms(), r.len())
    };
    if has_rail_interruptions_between(rails, store, end, time_ms, hand, Some(target)) {
        return None;
    }

    if time_ms - start <= config.max_rail_duration_ms {
        let note = Note::line(registry.allocate_note_id(), time_ms, position, hand);
        let rail = rails.get_mut(&target)?;
        return match rail.add_note(note, registry, config) {
            AddNoteOutcome::Inserted { .. } => Some(target),
            _ => None,
        };
    }

    if policy == ExtendPolicy::AllowBridge {
        let gap = time_ms - end;
        if gap <= config.max_rail_duration_ms && len > 1 {
            let tail_pos = rails[&target]
                .iter()
                .last()
                .map(|n| n.position)
                .unwrap_or(position);
            let bridge = make_bridge(registry, hand, end, tail_pos, time_ms, position);
            let id = bridge.id();
            debug!("bridged {gap}ms after rail {target} with rail {id}");
            rails.insert(id, bridge);
            return Some(id);
        }
    }
    None
}

fn make_bridge(
    registry: &mut Registry,
    hand: HandType,
    from_ms: f64,
    from_pos: Position,
    to_ms: f64,
    to_pos: Position,
) -> Rail {
    let head = Note::breaker(registry.allocate_note_id(), from_ms, from_pos, hand);
    let tail = Note::breaker(registry.allocate_note_id(), to_ms, to_pos, hand);
    Rail::with_notes(registry.allocate_rail_id(), hand, vec![head, tail], registry)
}

/// Bootstrap a two-point rail from a begin/end drag. Returns `None` when
/// the two points collapse into one time slot.
pub fn create_rail_from_begin_end(
    registry: &mut Registry,
    hand: HandType,
    begin_ms: f64,
    begin_pos: Position,
    end_ms: f64,
    end_pos: Position,
) -> Option<Rail> {
    if TimeKey::new(begin_ms) == TimeKey::new(end_ms) {
        return None;
    }
    let ((t0, p0), (t1, p1)) = if begin_ms <= end_ms {
        ((begin_ms, begin_pos), (end_ms, end_pos))
    } else {
        ((end_ms, end_pos), (begin_ms, begin_pos))
    };
    let notes = vec![
        Note::line(registry.allocate_note_id(), t0, p0, hand),
        Note::line(registry.allocate_note_id(), t1, p1, hand),
    ];
    Some(Rail::with_notes(
        registry.allocate_rail_id(),
        hand,
        notes,
        registry,
    ))
}

/// Whether a rail-type object of `hand` may be placed at the requested
/// time and point.
///
/// Every rail passing through the overlap window and every standalone
/// note in it is classified as an exact point match, a same-time contact
/// at another point, or no match. An exact-point rail contact is a benign
/// junction; any other rail contact requires the same hand class. A
/// standalone contact is compatible for the same or the opposite hand
/// class and rejects otherwise.
pub fn can_place_rail_type_here(
    rails: &HashMap<RailId, Rail>,
    store: &NoteStore,
    time_ms: f64,
    position: Position,
    hand: HandType,
    config: &TimelineConfig,
) -> bool {
    let time = TimeKey::new(time_ms);
    let eps = config.time_overlay_epsilon_ms;

    for rail in rails
        .values()
        .filter(|r| !r.is_scheduled_for_deletion() && !r.is_empty())
    {
        let touch = match rail.note_in_window(time, eps) {
            Some(id) => {
                let exact = rail
                    .note(id)
                    .is_some_and(|n| n.position.approx_eq(position));
                if exact {
                    TouchClass::ExactPoint
                } else {
                    TouchClass::SameTimeOtherPoint
                }
            }
            None => {
                let passes = rail.start_ms() - eps < time_ms && time_ms < rail.end_ms() + eps;
                if passes {
                    TouchClass::SameTimeOtherPoint
                } else {
                    TouchClass::NoMatch
                }
            }
        };
        match touch {
            // a shared point with another rail is a junction, any class
            TouchClass::ExactPoint | TouchClass::NoMatch => {}
            TouchClass::SameTimeOtherPoint => {
                if rail.hand() != hand {
                    debug!(
                        "placement of {:?} at {time} blocked by rail {}",
                        hand,
                        rail.id()
                    );
                    return false;
                }
            }
        }
    }

    for note in store.notes_in_window(time, eps) {
        let compatible = note.hand == hand || hand.opposite() == Some(note.hand);
        if !compatible {
            debug!("placement of {:?} at {time} blocked by note {}", hand, note.id);
            return false;
        }
    }
    true
}
