//! Rolling four-quarter comorbidity windows

use std::collections::BTreeMap;
use std::time::Instant;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::config::ComorbidityConfig;
use crate::error::Result;
use crate::model::Quarter;
use crate::utils::logging::log_operation_complete;

/// Quarters spanned by a full window
pub const WINDOW_QUARTERS: u32 = 4;

/// One weighted diagnosis of a subject, placed on the quarter axis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisWeightFact {
    /// Quarter the diagnosis was recorded in
    pub quarter: Quarter,
    /// Disease-class label
    pub class: String,
    /// Weight of the class
    pub weight: u32,
    /// Facility that recorded the diagnosis
    pub facility: String,
}

impl DiagnosisWeightFact {
    /// Create a fact
    #[must_use]
    pub fn new(
        quarter: Quarter,
        class: impl Into<String>,
        weight: u32,
        facility: impl Into<String>,
    ) -> Self {
        Self {
            quarter,
            class: class.into(),
            weight,
            facility: facility.into(),
        }
    }
}

/// Score of one window, `start..=end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowScore {
    /// Anchor quarter
    pub start: Quarter,
    /// Last quarter, clamped to the horizon
    pub end: Quarter,
    /// Sum of per-class maximum weights inside the window
    pub score: u32,
}

impl WindowScore {
    /// Create a window score
    #[must_use]
    pub const fn new(start: Quarter, end: Quarter, score: u32) -> Self {
        Self { start, end, score }
    }

    /// Whether `quarter` lies inside the window
    #[must_use]
    pub fn contains(&self, quarter: Quarter) -> bool {
        self.start <= quarter && quarter <= self.end
    }
}

/// Row of the persisted score table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// Subject the window belongs to
    pub subject_id: String,
    /// Anchor quarter
    pub start: Quarter,
    /// Last quarter of the window
    pub end: Quarter,
    /// Window score
    pub score: u32,
}

/// Per-quarter class maxima; a handful of classes per quarter is typical
type QuarterMaxima<'a> = SmallVec<[(&'a str, u32); 4]>;

/// Group in-horizon facts by quarter, keeping the max weight per class
fn group_by_quarter(
    facts: &[DiagnosisWeightFact],
    first: Quarter,
    last: Quarter,
) -> BTreeMap<Quarter, QuarterMaxima<'_>> {
    let mut grouped: BTreeMap<Quarter, QuarterMaxima<'_>> = BTreeMap::new();
    for fact in facts {
        if fact.quarter < first || fact.quarter > last {
            log::trace!("Ignoring {} fact outside horizon at {}", fact.class, fact.quarter);
            continue;
        }
        let maxima = grouped.entry(fact.quarter).or_default();
        match maxima.iter().position(|(class, _)| *class == fact.class) {
            // ties keep the existing maximum
            Some(i) if fact.weight > maxima[i].1 => maxima[i].1 = fact.weight,
            Some(_) => {}
            None => maxima.push((fact.class.as_str(), fact.weight)),
        }
    }
    grouped
}

fn window_score(
    grouped: &BTreeMap<Quarter, QuarterMaxima<'_>>,
    start: Quarter,
    end: Quarter,
) -> u32 {
    let mut best: FxHashMap<&str, u32> = FxHashMap::default();
    for maxima in grouped.range(start..=end).map(|(_, m)| m) {
        for &(class, weight) in maxima {
            let slot = best.entry(class).or_insert(0);
            *slot = (*slot).max(weight);
        }
    }
    best.values().fold(0u32, |acc, &weight| acc.saturating_add(weight))
}

/// Calculate the contiguous window scores of one subject
///
/// Facts outside `[min_year Q1, max_year Q4]` are ignored. The first window
/// is anchored at the earliest remaining quarter; anchors then advance one
/// quarter at a time, empty quarters included. Each window covers the anchor
/// and the three following quarters, clamped to `max_year` Q4, and the walk
/// ends with the first window that reaches that quarter.
///
/// # Arguments
/// * `facts` - The subject's diagnosis facts, in any order
/// * `config` - Analysis horizon
///
/// # Returns
/// Window scores ordered by anchor; empty when no fact falls in the horizon
///
/// # Errors
/// Fails only on an inverted horizon.
pub fn calculate(
    facts: &[DiagnosisWeightFact],
    config: &ComorbidityConfig,
) -> Result<Vec<WindowScore>> {
    config.validate()?;
    let horizon_start = Quarter::first_of(config.min_year);
    let horizon_end = Quarter::last_of(config.max_year);

    let grouped = group_by_quarter(facts, horizon_start, horizon_end);
    let Some(&first) = grouped.keys().next() else {
        return Ok(Vec::new());
    };

    let span = usize::try_from(Quarter::distance(first, horizon_end)).unwrap_or(0);
    let mut windows = Vec::with_capacity(span + 1);
    let mut anchor = first;
    loop {
        let end = anchor.advance(WINDOW_QUARTERS - 1).min(horizon_end);
        windows.push(WindowScore::new(anchor, end, window_score(&grouped, anchor, end)));
        if end == horizon_end {
            break;
        }
        anchor = anchor.increment();
    }
    Ok(windows)
}

/// Calculate window scores for every subject in parallel
///
/// Subjects without in-horizon facts are left out of the result.
pub fn calculate_all(
    facts_by_subject: &FxHashMap<String, Vec<DiagnosisWeightFact>>,
    config: &ComorbidityConfig,
) -> Result<FxHashMap<String, Vec<WindowScore>>> {
    config.validate()?;
    let start = Instant::now();

    let scores: FxHashMap<String, Vec<WindowScore>> = facts_by_subject
        .par_iter()
        .map(|(subject, facts)| calculate(facts, config).map(|w| (subject.clone(), w)))
        .filter(|result| !result.as_ref().is_ok_and(|(_, w)| w.is_empty()))
        .collect::<Result<_>>()?;

    log_operation_complete(
        "scored",
        &format!("horizon {}..={}", config.min_year, config.max_year),
        scores.len(),
        Some(start.elapsed()),
    );
    Ok(scores)
}

/// Flatten per-subject windows into the persisted table
///
/// Rows are sorted by subject, then by anchor quarter.
#[must_use]
pub fn score_records(scores: &FxHashMap<String, Vec<WindowScore>>) -> Vec<ScoreRecord> {
    let mut records: Vec<ScoreRecord> = scores
        .iter()
        .flat_map(|(subject, windows)| {
            windows.iter().map(move |w| ScoreRecord {
                subject_id: subject.clone(),
                start: w.start,
                end: w.end,
                score: w.score,
            })
        })
        .collect();
    records.sort_by(|a, b| {
        a.subject_id
            .cmp(&b.subject_id)
            .then_with(|| a.start.cmp(&b.start))
    });
    records
}
