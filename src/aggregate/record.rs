//! Per-subject composite records and their merge combinators
//!
//! Every field merges with a commutative, associative operator (min, max
//! or multiset union), so the order in which slices arrive never changes
//! the finished record.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::aggregate::category::{Sex, SubjectFact};

/// Multiset of codes: duplicates are kept, order is not
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeBag {
    counts: BTreeMap<String, u32>,
}

impl CodeBag {
    /// Create an empty bag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one occurrence of a code
    pub fn insert(&mut self, code: impl Into<String>) {
        *self.counts.entry(code.into()).or_insert(0) += 1;
    }

    /// Multiset union: occurrence counts add up
    pub fn union(&mut self, other: Self) {
        for (code, count) in other.counts {
            *self.counts.entry(code).or_insert(0) += count;
        }
    }

    /// Occurrences of one code
    #[must_use]
    pub fn count(&self, code: &str) -> u32 {
        self.counts.get(code).copied().unwrap_or(0)
    }

    /// Total number of occurrences
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.values().map(|&c| c as usize).sum()
    }

    /// Whether the bag is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Every occurrence in sorted order, duplicates repeated
    pub fn iter_sorted(&self) -> impl Iterator<Item = &str> {
        self.counts
            .iter()
            .flat_map(|(code, &count)| std::iter::repeat_n(code.as_str(), count as usize))
    }
}

impl<S: Into<String>> FromIterator<S> for CodeBag {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut bag = Self::new();
        for code in iter {
            bag.insert(code);
        }
        bag
    }
}

/// Everything known about one subject across categories and years
///
/// `None` means the category never produced a value for the subject,
/// which is kept distinct from an observed empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeRecord {
    /// Subject identifier
    pub subject_id: String,
    /// Minimum observed sex ordinal; `Unknown` when nothing was observed
    pub sex: Sex,
    /// Earliest observed birth date
    pub birth_date: Option<NaiveDate>,
    /// Earliest observed death date
    pub death_date: Option<NaiveDate>,
    /// Lowest observed region code
    pub region_min: Option<String>,
    /// Highest observed region code
    pub region_max: Option<String>,
    /// Diagnosis codes, if any diagnosis slice mentioned the subject
    pub diagnoses: Option<CodeBag>,
    /// Prescription codes, if any medication slice mentioned the subject
    pub medications: Option<CodeBag>,
}

fn min_option<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn max_option<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn union_option(a: Option<CodeBag>, b: Option<CodeBag>) -> Option<CodeBag> {
    match (a, b) {
        (Some(mut a), Some(b)) => {
            a.union(b);
            Some(a)
        }
        (a, b) => a.or(b),
    }
}

impl CompositeRecord {
    /// Create an empty record for a subject
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            ..Self::default()
        }
    }

    /// Create a record holding a single fact
    #[must_use]
    pub fn from_fact(fact: SubjectFact) -> Self {
        let mut record = Self::new(fact.subject());
        record.absorb(fact);
        record
    }

    /// Fold one fact in with its category's combinator
    pub fn absorb(&mut self, fact: SubjectFact) {
        debug_assert_eq!(fact.subject(), self.subject_id);
        match fact {
            SubjectFact::Demographic {
                sex,
                birth_date,
                death_date,
                ..
            } => {
                self.sex = self.sex.min(sex);
                self.birth_date = min_option(self.birth_date, birth_date);
                self.death_date = min_option(self.death_date, death_date);
            }
            SubjectFact::Residence { region, .. } => {
                self.region_min = min_option(self.region_min.take(), Some(region.clone()));
                self.region_max = max_option(self.region_max.take(), Some(region));
            }
            SubjectFact::Diagnosis { code, .. } => {
                self.diagnoses.get_or_insert_with(CodeBag::new).insert(code);
            }
            SubjectFact::Medication { code, .. } => {
                self.medications.get_or_insert_with(CodeBag::new).insert(code);
            }
        }
    }

    /// Merge another record for the same subject, field by field
    pub fn merge(&mut self, other: Self) {
        debug_assert_eq!(other.subject_id, self.subject_id);
        self.sex = self.sex.min(other.sex);
        self.birth_date = min_option(self.birth_date, other.birth_date);
        self.death_date = min_option(self.death_date, other.death_date);
        self.region_min = min_option(self.region_min.take(), other.region_min);
        self.region_max = max_option(self.region_max.take(), other.region_max);
        self.diagnoses = union_option(self.diagnoses.take(), other.diagnoses);
        self.medications = union_option(self.medications.take(), other.medications);
    }

    /// Merged copy of two records
    #[must_use]
    pub fn merged(mut self, other: Self) -> Self {
        self.merge(other);
        self
    }
}
