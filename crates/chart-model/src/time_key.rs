use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Finest editing sub-step in milliseconds. Two times landing in the same
/// sub-step bucket compare equal and hash identically.
pub const TIME_KEY_RESOLUTION_MS: f64 = 0.1;

/// A chart time in milliseconds, usable as a map/set key.
///
/// Raw floating-point equality is never reliable for timeline indexing:
/// the same grid slot reached through different arithmetic paths drifts by
/// a few ULPs. `TimeKey` keeps the raw value for duration math but derives
/// equality, hashing, and ordering from the quantized sub-step bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeKey {
    ms: f64,
}

impl TimeKey {
    pub fn new(ms: f64) -> Self {
        debug_assert!(ms.is_finite(), "time key must be finite, got {ms}");
        Self { ms }
    }

    /// Raw time in milliseconds.
    pub fn ms(self) -> f64 {
        self.ms
    }

    /// Sub-step bucket index used for equality and hashing.
    pub fn quantized(self) -> i64 {
        (self.ms / TIME_KEY_RESOLUTION_MS).round() as i64
    }

    /// Overlap-window test: whether `other` falls inside `epsilon_ms` of
    /// this time. Callers use this for move-vs-insert decisions; map
    /// membership always goes through the quantized bucket instead.
    pub fn within(self, other: TimeKey, epsilon_ms: f64) -> bool {
        (self.ms - other.ms).abs() < epsilon_ms
    }
}

impl From<f64> for TimeKey {
    fn from(ms: f64) -> Self {
        Self::new(ms)
    }
}

impl PartialEq for TimeKey {
    fn eq(&self, other: &Self) -> bool {
        self.quantized() == other.quantized()
    }
}

impl Eq for TimeKey {}

impl Hash for TimeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.quantized().hash(state);
    }
}

impl PartialOrd for TimeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeKey {
    // Ordering must agree with Eq for BTreeMap keys, so it compares the
    // quantized bucket, not the raw value.
    fn cmp(&self, other: &Self) -> Ordering {
        self.quantized().cmp(&other.quantized())
    }
}

impl fmt::Display for TimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}ms", self.ms)
    }
}

impl Serialize for TimeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.ms)
    }
}

impl<'de> Deserialize<'de> for TimeKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f64::deserialize(deserializer).map(TimeKey::new)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn drifted_times_share_a_bucket() {
        // 1/3 summed three ways lands on different floats but the same key
        let a = TimeKey::new(500.0);
        let b = TimeKey::new(1500.0 * (1.0 / 3.0));
        assert_ne!(500.0f64.to_bits(), (1500.0f64 * (1.0 / 3.0)).to_bits());
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_slots_stay_distinct() {
        let a = TimeKey::new(500.0);
        let b = TimeKey::new(500.0 + TIME_KEY_RESOLUTION_MS * 2.0);
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn hash_follows_equality() {
        let mut map = HashMap::new();
        map.insert(TimeKey::new(250.0), "x");
        let drifted = 250.0 + 1e-9;
        assert_eq!(map.get(&TimeKey::new(drifted)), Some(&"x"));
    }

    #[test]
    fn ordering_by_time() {
        let mut keys = vec![
            TimeKey::new(300.0),
            TimeKey::new(100.0),
            TimeKey::new(200.0),
        ];
        keys.sort();
        let ms: Vec<f64> = keys.iter().map(|k| k.ms()).collect();
        assert_eq!(ms, vec![100.0, 200.0, 300.0]);
    }

    #[test]
    fn within_window() {
        let a = TimeKey::new(1000.0);
        assert!(a.within(TimeKey::new(1004.0), 5.0));
        assert!(!a.within(TimeKey::new(1006.0), 5.0));
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// Grid-snapped times survive float drift far below the
            /// sub-step resolution.
            #[test]
            fn drift_below_resolution_keeps_the_key(
                slot in 0u32..2_000_000,
                drift in -1e-6f64..1e-6,
            ) {
                let t = f64::from(slot) * 50.0;
                prop_assert_eq!(TimeKey::new(t), TimeKey::new(t + drift));
            }

            /// Two equal keys are never further apart than one sub-step.
            #[test]
            fn equal_keys_are_close(a in 0.0f64..1e8, b in 0.0f64..1e8) {
                if TimeKey::new(a) == TimeKey::new(b) {
                    prop_assert!((a - b).abs() < TIME_KEY_RESOLUTION_MS);
                }
            }

            /// Ordering never contradicts the raw time axis by more than
            /// one sub-step.
            #[test]
            fn ordering_tracks_raw_time(a in 0.0f64..1e8, b in 0.0f64..1e8) {
                if TimeKey::new(a) < TimeKey::new(b) {
                    prop_assert!(a < b + TIME_KEY_RESOLUTION_MS);
                }
            }
        }
    }
}
