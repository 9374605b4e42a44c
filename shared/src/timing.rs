//! The per-command and per-task aggregate timing model.
//!
//! A `Timing` is an ordered mapping from interval name to elapsed seconds.
//! Commands build one either through scoped regions (`Timing::scope`) or
//! through chained checkpoints (`CheckpointRecorder`), where each checkpoint
//! closes the interval opened by the previous one. Task-aggregate timing is
//! produced by merging each command's Timing into a running total, summing
//! durations for keys that repeat across commands.
//!
//! Insertion order is preserved for local iteration, but serialization goes
//! through a plain JSON object: round-tripping through JSON does not
//! guarantee the original key order is recovered.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timing {
    entries: Vec<(String, f64)>,
}

impl Timing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `seconds` to the named interval, summing into an existing entry
    /// if one is already present.
    pub fn record(&mut self, name: impl Into<String>, seconds: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(existing) => existing.1 += seconds,
            None => self.entries.push((name, seconds)),
        }
    }

    /// Fold another Timing into this one, key-wise. Used to build the
    /// per-task aggregate from each command's per-command Timing.
    pub fn merge(&mut self, other: &Timing) {
        for (k, v) in &other.entries {
            self.record(k.clone(), *v);
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Start a scoped region: the elapsed wall time between this call and
    /// the guard's drop is recorded under `name`.
    pub fn scope(&mut self, name: impl Into<String>) -> ScopedTiming<'_> {
        ScopedTiming {
            name: name.into(),
            start: Instant::now(),
            timing: self,
        }
    }
}

pub struct ScopedTiming<'a> {
    name: String,
    start: Instant,
    timing: &'a mut Timing,
}

impl Drop for ScopedTiming<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        self.timing.record(self.name.clone(), elapsed);
    }
}

/// Chained-checkpoint recorder: each call to `checkpoint` closes the
/// interval opened by the previous call (or by `new`) and starts a new one.
pub struct CheckpointRecorder {
    last_mark: Instant,
    pending_name: Option<String>,
    timing: Timing,
}

impl CheckpointRecorder {
    pub fn new() -> Self {
        Self {
            last_mark: Instant::now(),
            pending_name: None,
            timing: Timing::new(),
        }
    }

    pub fn checkpoint(&mut self, name: impl Into<String>) {
        let now = Instant::now();
        if let Some(prev) = self.pending_name.take() {
            self.timing
                .record(prev, now.duration_since(self.last_mark).as_secs_f64());
        }
        self.pending_name = Some(name.into());
        self.last_mark = now;
    }

    /// Close the final pending interval and return the accumulated Timing.
    pub fn finish(mut self) -> Timing {
        let now = Instant::now();
        if let Some(prev) = self.pending_name.take() {
            self.timing
                .record(prev, now.duration_since(self.last_mark).as_secs_f64());
        }
        self.timing
    }
}

impl Default for CheckpointRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Serialize for Timing {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Timing {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map: HashMap<String, f64> = HashMap::deserialize(deserializer)?;
        let mut entries: Vec<(String, f64)> = map.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Timing { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sums_repeated_keys() {
        let mut t = Timing::new();
        t.record("render", 1.5);
        t.record("render", 2.5);
        assert_eq!(t.get("render"), Some(4.0));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn merge_sums_keywise_across_commands() {
        let mut per_command_a = Timing::new();
        per_command_a.record("setup", 0.5);
        per_command_a.record("run", 2.0);

        let mut per_command_b = Timing::new();
        per_command_b.record("setup", 0.25);
        per_command_b.record("run", 1.0);

        let mut aggregate = Timing::new();
        aggregate.merge(&per_command_a);
        aggregate.merge(&per_command_b);

        assert_eq!(aggregate.get("setup"), Some(0.75));
        assert_eq!(aggregate.get("run"), Some(3.0));
    }

    #[test]
    fn checkpoint_recorder_closes_previous_interval() {
        let mut rec = CheckpointRecorder::new();
        rec.checkpoint("a");
        std::thread::sleep(std::time::Duration::from_millis(5));
        rec.checkpoint("b");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let timing = rec.finish();
        assert!(timing.get("a").unwrap() > 0.0);
        assert!(timing.get("b").unwrap() > 0.0);
    }

    #[test]
    fn round_trips_through_json_as_plain_object() {
        let mut t = Timing::new();
        t.record("a", 1.0);
        t.record("b", 2.0);

        let json = serde_json::to_string(&t).unwrap();
        let back: Timing = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get("a"), Some(1.0));
        assert_eq!(back.get("b"), Some(2.0));
    }
}
