//! Fan-out/fan-in aggregation of category × year slices
//!
//! One fetch is dispatched per (category, year) slice, with at most
//! `workers` in flight. Each finished slice is folded per subject and
//! merged into that category's partial map (within-category merge across
//! years). Once every slice is in, the partial maps are folded into one
//! composite map (cross-category merge) and every subject is hashed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use itertools::iproduct;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::aggregate::category::{Category, CategoryFetcher, SubjectFact};
use crate::aggregate::hash::digest_all;
use crate::aggregate::map::SubjectMap;
use crate::aggregate::record::CompositeRecord;
use crate::config::AggregationConfig;
use crate::error::{PipelineError, Result};
use crate::query::with_one_retry;
use crate::utils::logging::{
    create_main_progress_bar, finish_progress_bar, log_operation_complete, log_operation_start,
};

/// One (category, year) fetch unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slice {
    /// Source category
    pub category: Category,
    /// Year of the slice
    pub year: i32,
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.year)
    }
}

/// Finished composite records plus the slices that contributed nothing
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    /// Composite record per subject
    pub records: BTreeMap<String, CompositeRecord>,
    /// Slices that failed after their retry and were treated as empty
    pub failed_slices: Vec<Slice>,
    /// Number of slices dispatched
    pub slice_count: usize,
}

impl Aggregation {
    /// Digest every subject
    #[must_use]
    pub fn digests(&self) -> BTreeMap<String, String> {
        digest_all(&self.records)
    }

    /// Whether every slice delivered
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed_slices.is_empty()
    }
}

/// Runs the category × year fan-out against a fetcher
pub struct Aggregator {
    config: AggregationConfig,
    fetcher: Arc<dyn CategoryFetcher>,
}

impl Aggregator {
    /// Create an aggregator, validating its configuration
    pub fn new(config: AggregationConfig, fetcher: Arc<dyn CategoryFetcher>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, fetcher })
    }

    /// Fetch every slice and merge the facts into composite records
    ///
    /// # Errors
    /// Only fatal setup problems fail the call. A slice that fails twice is
    /// logged, recorded in `failed_slices` and contributes no facts.
    pub async fn collect(
        &self,
        categories: &[Category],
        years: RangeInclusive<i32>,
    ) -> Result<Aggregation> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(PipelineError::Resource(
                "aggregation started outside a Tokio runtime".to_string(),
            ));
        }

        let start = Instant::now();
        let categories: BTreeSet<Category> = categories.iter().copied().collect();
        let slices: Vec<Slice> = iproduct!(categories.iter().copied(), years.clone())
            .map(|(category, year)| Slice { category, year })
            .collect();
        let slice_count = slices.len();
        log_operation_start(
            "Aggregating slices for",
            &format!("{categories:?} x {}..={}", years.start(), years.end()),
        );

        let partials: Arc<FxHashMap<Category, SubjectMap>> = Arc::new(
            categories
                .iter()
                .map(|&category| (category, SubjectMap::new()))
                .collect(),
        );

        let pb = create_main_progress_bar(
            slice_count as u64,
            Some("Fetching category slices"),
            self.config.show_progress,
        );

        let timeout = self.config.fetch_timeout;
        let mut in_flight = stream::iter(slices)
            .map(|slice| {
                let fetcher = self.fetcher.clone();
                let partials = partials.clone();
                let handle = tokio::spawn(async move {
                    fetch_and_merge(fetcher.as_ref(), slice, &partials, timeout).await
                });
                async move { (slice, handle.await) }
            })
            .buffer_unordered(self.config.workers);

        let mut failed_slices = Vec::new();
        while let Some((slice, joined)) = in_flight.next().await {
            pb.inc(1);
            match joined {
                Ok(true) => {}
                Ok(false) => failed_slices.push(slice),
                Err(e) => {
                    log::error!("Slice {slice} task aborted, treating as empty: {e}");
                    failed_slices.push(slice);
                }
            }
        }
        drop(in_flight);
        finish_progress_bar(&pb, Some("Slices fetched"));
        failed_slices.sort();

        let partials = Arc::into_inner(partials).ok_or_else(|| {
            PipelineError::Resource("aggregation state still shared after fan-in".to_string())
        })?;

        let composite = SubjectMap::new();
        for (category, partial) in partials {
            log::debug!("Folding {} subjects from {category}", partial.len());
            partial
                .into_records()
                .par_bridge()
                .for_each(|record| composite.merge_record(record));
        }
        let records = composite.into_sorted();

        if !failed_slices.is_empty() {
            log::warn!(
                "{} of {slice_count} slices failed and were treated as empty: {}",
                failed_slices.len(),
                failed_slices
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        log_operation_complete(
            "aggregated",
            "the composite map",
            records.len(),
            Some(start.elapsed()),
        );

        Ok(Aggregation {
            records,
            failed_slices,
            slice_count,
        })
    }

    /// Fetch, merge and hash: subject id → lowercase hex digest
    pub async fn aggregate(
        &self,
        categories: &[Category],
        years: RangeInclusive<i32>,
    ) -> Result<BTreeMap<String, String>> {
        Ok(self.collect(categories, years).await?.digests())
    }
}

async fn fetch_once(
    fetcher: &dyn CategoryFetcher,
    slice: Slice,
    timeout: Option<Duration>,
) -> Result<Vec<SubjectFact>> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fetcher.fetch(slice.category, slice.year))
            .await
            .unwrap_or(Err(PipelineError::Timeout(limit))),
        None => fetcher.fetch(slice.category, slice.year).await,
    }
}

/// Fetch one slice (retrying once) and merge it; `false` if it failed
async fn fetch_and_merge(
    fetcher: &dyn CategoryFetcher,
    slice: Slice,
    partials: &FxHashMap<Category, SubjectMap>,
    timeout: Option<Duration>,
) -> bool {
    let label = format!("slice {slice}");
    let facts = match with_one_retry(&label, |_| fetch_once(fetcher, slice, timeout)).await {
        Ok(facts) => facts,
        Err(e) => {
            log::error!("Slice {slice} failed after retry, treating as empty: {e}");
            return false;
        }
    };

    let fact_count = facts.len();
    let mut local: FxHashMap<String, CompositeRecord> = FxHashMap::default();
    for fact in facts {
        if let Some(record) = local.get_mut(fact.subject()) {
            record.absorb(fact);
        } else {
            let record = CompositeRecord::from_fact(fact);
            local.insert(record.subject_id.clone(), record);
        }
    }

    let Some(partial) = partials.get(&slice.category) else {
        log::error!("No partial map for slice {slice}");
        return false;
    };
    let subjects = local.len();
    for record in local.into_values() {
        partial.merge_record(record);
    }
    log::debug!("Slice {slice}: {fact_count} facts for {subjects} subjects");
    true
}
