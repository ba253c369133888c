use std::collections::BTreeMap;

use chart_model::{Note, NoteId, TimeKey, TimelineConfig};
use log::debug;

/// Standalone (non-rail) note storage for one difficulty.
///
/// Notes are bucketed by exact time slot; the overlap-window queries the
/// host uses for move-vs-insert decisions are built on top of `keys`, the
/// store itself never matches by epsilon.
#[derive(Debug, Clone, Default)]
pub struct NoteStore {
    buckets: BTreeMap<TimeKey, Vec<Note>>,
    len: usize,
}

impl NoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a note to its time slot. Refuses (without mutating) any
    /// insertion that would break the per-slot density rules:
    /// at most `max_simple_notes_per_slot` left/right notes, at most
    /// `max_special_notes_per_slot` specials, and a special excludes every
    /// other playable note at the slot. Scenery (`NoHand`) is exempt.
    pub fn add_at(&mut self, note: Note, config: &TimelineConfig) -> bool {
        let bucket = self.buckets.entry(note.time).or_default();
        if !Self::slot_accepts(bucket, &note, config) {
            debug!("note {} refused at {}: slot full", note.id, note.time);
            if bucket.is_empty() {
                self.buckets.remove(&note.time);
            }
            return false;
        }
        bucket.push(note);
        self.len += 1;
        true
    }

    fn slot_accepts(bucket: &[Note], note: &Note, config: &TimelineConfig) -> bool {
        if !note.hand.is_simple() && !note.hand.is_special() {
            return true;
        }
        let simple = bucket.iter().filter(|n| n.hand.is_simple()).count();
        let special = bucket.iter().filter(|n| n.hand.is_special()).count();
        if special >= config.max_special_notes_per_slot {
            return false;
        }
        if note.hand.is_special() {
            simple == 0 && special == 0
        } else {
            simple < config.max_simple_notes_per_slot
        }
    }

    /// Remove the exact note from its time bucket. Empty buckets are
    /// dropped so `keys` never reports a vacated slot.
    pub fn remove_exact(&mut self, note: &Note) -> Option<Note> {
        let bucket = self.buckets.get_mut(&note.time)?;
        let idx = bucket.iter().position(|n| n.id == note.id)?;
        let removed = bucket.remove(idx);
        if bucket.is_empty() {
            self.buckets.remove(&note.time);
        }
        self.len -= 1;
        Some(removed)
    }

    pub fn find(&self, id: NoteId) -> Option<&Note> {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.iter())
            .find(|n| n.id == id)
    }

    pub fn notes_at(&self, time: TimeKey) -> &[Note] {
        self.buckets.get(&time).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_note_at(&self, time: TimeKey) -> bool {
        self.buckets.contains_key(&time)
    }

    pub fn keys(&self) -> impl Iterator<Item = TimeKey> + '_ {
        self.buckets.keys().copied()
    }

    /// All notes whose slot lies within `epsilon_ms` of `time`, in time
    /// order. This is the caller-side overlap query described above.
    pub fn notes_in_window(&self, time: TimeKey, epsilon_ms: f64) -> Vec<&Note> {
        let lo = TimeKey::new(time.ms() - epsilon_ms);
        let hi = TimeKey::new(time.ms() + epsilon_ms);
        self.buckets
            .range(lo..=hi)
            .flat_map(|(_, bucket)| bucket.iter())
            .filter(|n| n.time.within(time, epsilon_ms))
            .collect()
    }

    /// Notes strictly inside the open interval `(lo, hi)`, in time order.
    pub fn notes_between(&self, lo: TimeKey, hi: TimeKey) -> impl Iterator<Item = &Note> {
        use std::ops::Bound;
        self.buckets
            .range((Bound::Excluded(lo), Bound::Excluded(hi)))
            .flat_map(|(_, bucket)| bucket.iter())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Note> {
        self.buckets.values().flat_map(|bucket| bucket.iter())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
