//! Concurrent per-subject record map
//!
//! Subjects are spread over a fixed number of shards, each behind its own
//! lock. Concurrent slices touching different subjects rarely contend, and
//! no lock ever spans all subjects.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};

use rustc_hash::{FxHashMap, FxHasher};

use crate::aggregate::category::SubjectFact;
use crate::aggregate::record::CompositeRecord;

/// Default shard count
pub const DEFAULT_SHARDS: usize = 64;

/// Sharded map from subject id to composite record with per-key merge
#[derive(Debug)]
pub struct SubjectMap {
    shards: Vec<Mutex<FxHashMap<String, CompositeRecord>>>,
}

impl Default for SubjectMap {
    fn default() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }
}

impl SubjectMap {
    /// Create a map with the default shard count
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a map with `shards` shards (at least one)
    #[must_use]
    pub fn with_shards(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1))
                .map(|_| Mutex::new(FxHashMap::default()))
                .collect(),
        }
    }

    fn shard(&self, subject: &str) -> &Mutex<FxHashMap<String, CompositeRecord>> {
        let mut hasher = FxHasher::default();
        subject.hash(&mut hasher);
        let index = usize::try_from(hasher.finish() % self.shards.len() as u64).unwrap_or(0);
        &self.shards[index]
    }

    /// Merge a finished record into the entry for its subject
    pub fn merge_record(&self, record: CompositeRecord) {
        let mut shard = self
            .shard(&record.subject_id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match shard.get_mut(&record.subject_id) {
            Some(existing) => existing.merge(record),
            None => {
                shard.insert(record.subject_id.clone(), record);
            }
        }
    }

    /// Fold one fact into the entry for its subject
    pub fn merge_fact(&self, fact: SubjectFact) {
        let mut shard = self
            .shard(fact.subject())
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match shard.get_mut(fact.subject()) {
            Some(existing) => existing.absorb(fact),
            None => {
                let record = CompositeRecord::from_fact(fact);
                shard.insert(record.subject_id.clone(), record);
            }
        }
    }

    /// Number of subjects
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Whether no subject has been seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unordered drain of every record
    pub fn into_records(self) -> impl Iterator<Item = CompositeRecord> {
        self.shards.into_iter().flat_map(|shard| {
            shard
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .into_values()
        })
    }

    /// Every record keyed by subject, sorted
    #[must_use]
    pub fn into_sorted(self) -> BTreeMap<String, CompositeRecord> {
        self.into_records()
            .map(|r| (r.subject_id.clone(), r))
            .collect()
    }
}
