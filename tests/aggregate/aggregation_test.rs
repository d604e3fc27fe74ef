use std::collections::BTreeMap;
use std::sync::Arc;

use cohort_extract::aggregate::{
    Aggregator, Category, CategoryDefinition, FactColumns, QueryCategoryFetcher, Sex, Slice,
    SubjectFact, hash_table,
};
use cohort_extract::{AggregationConfig, CellValue, PipelineError, QuerySession, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::utils::{
    MemoryFactory, ScriptedFetcher, date, demographic, diagnosis, init, residence, result_set,
};

const YEARS: std::ops::RangeInclusive<i32> = 2010..=2011;

fn config(workers: usize) -> AggregationConfig {
    AggregationConfig {
        workers,
        show_progress: false,
        ..AggregationConfig::default()
    }
}

/// Facts per slice for subject "42" plus a few bystanders
fn slices() -> Vec<(Category, i32, Vec<SubjectFact>)> {
    vec![
        (
            Category::Demographic,
            2010,
            vec![
                demographic("42", Sex::Male, date(1980, 1, 1)),
                demographic("7", Sex::Female, date(1975, 6, 30)),
            ],
        ),
        (
            Category::Residence,
            2010,
            vec![residence("42", "020"), residence("7", "101")],
        ),
        (Category::Residence, 2011, vec![residence("42", "010")]),
        (
            Category::Diagnosis,
            2010,
            vec![diagnosis("42", "DI21"), diagnosis("7", "DJ45")],
        ),
        (
            Category::Diagnosis,
            2011,
            vec![diagnosis("42", "DI21"), diagnosis("42", "DE11")],
        ),
    ]
}

fn fetcher(seed: u64) -> ScriptedFetcher {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut slices = slices();
    slices.shuffle(&mut rng);
    slices
        .into_iter()
        .fold(ScriptedFetcher::new(seed), |fetcher, (category, year, mut facts)| {
            facts.shuffle(&mut rng);
            fetcher.with_slice(category, year, facts)
        })
}

fn categories(seed: u64) -> Vec<Category> {
    let mut categories = Category::ALL.to_vec();
    categories.shuffle(&mut StdRng::seed_from_u64(seed ^ 0x5eed));
    categories
}

async fn digests(
    fetcher: ScriptedFetcher,
    workers: usize,
    seed: u64,
) -> Result<BTreeMap<String, String>> {
    Aggregator::new(config(workers), Arc::new(fetcher))?
        .aggregate(&categories(seed), YEARS)
        .await
}

/// Subject 42's record merges both residence years and its demographics
#[tokio::test]
async fn test_composite_record_for_subject_42() -> Result<()> {
    init();
    let aggregation = Aggregator::new(config(4), Arc::new(fetcher(1)))?
        .collect(&Category::ALL, YEARS)
        .await?;

    assert!(aggregation.is_complete());
    assert_eq!(aggregation.slice_count, 8);

    let record = &aggregation.records["42"];
    assert_eq!(record.sex, Sex::Male);
    assert_eq!(record.birth_date, Some(date(1980, 1, 1)));
    assert_eq!(record.region_min.as_deref(), Some("010"));
    assert_eq!(record.region_max.as_deref(), Some("020"));
    assert_eq!(record.diagnoses.as_ref().map(|d| d.count("DI21")), Some(2));
    assert!(record.medications.is_none());

    let table = hash_table(&aggregation.digests());
    assert_eq!(table.len(), 2);
    assert_eq!(table[0].subject_id, "42");
    assert_eq!(table[0].digest.len(), 64);
    Ok(())
}

/// Digests do not depend on fetch completion order
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_digest_is_order_independent() -> Result<()> {
    init();
    let baseline = digests(fetcher(0), 1, 0).await?;

    for seed in 1..=10 {
        let run = digests(fetcher(seed), 8, seed).await?;
        assert_eq!(run, baseline, "digest changed with seed {seed}");
    }
    Ok(())
}

/// A slice that fails twice contributes nothing and is reported
#[tokio::test]
async fn test_failed_slice_is_treated_as_empty() -> Result<()> {
    init();
    let fetcher = Arc::new(fetcher(3).failing(Category::Residence, 2011, 2));
    let aggregation = Aggregator::new(config(4), fetcher.clone())?
        .collect(&Category::ALL, YEARS)
        .await?;

    assert_eq!(
        aggregation.failed_slices,
        vec![Slice {
            category: Category::Residence,
            year: 2011,
        }]
    );
    assert_eq!(fetcher.attempts(Category::Residence, 2011), 2);

    let record = &aggregation.records["42"];
    assert_eq!(record.region_min.as_deref(), Some("020"));
    assert_eq!(record.region_max.as_deref(), Some("020"));

    let complete = digests(self::fetcher(3), 4, 3).await?;
    assert_ne!(aggregation.digests()["42"], complete["42"]);
    assert_eq!(aggregation.digests()["7"], complete["7"]);
    Ok(())
}

/// One transient failure is absorbed by the retry
#[tokio::test]
async fn test_transient_slice_failure_recovers() -> Result<()> {
    init();
    let fetcher = Arc::new(fetcher(5).failing(Category::Demographic, 2010, 1));
    let aggregation = Aggregator::new(config(2), fetcher.clone())?
        .collect(&Category::ALL, YEARS)
        .await?;

    assert!(aggregation.is_complete());
    assert_eq!(fetcher.attempts(Category::Demographic, 2010), 2);
    assert_eq!(aggregation.digests(), digests(self::fetcher(5), 2, 5).await?);
    Ok(())
}

/// Category-only subjects still hash, with placeholders for the rest
#[tokio::test]
async fn test_subject_seen_in_one_category() -> Result<()> {
    init();
    let fetcher = ScriptedFetcher::new(9).with_slice(
        Category::Medication,
        2011,
        vec![SubjectFact::Medication {
            subject: "99".to_string(),
            code: "N02BE01".to_string(),
        }],
    );
    let aggregation = Aggregator::new(config(2), Arc::new(fetcher))?
        .collect(&[Category::Medication, Category::Demographic], YEARS)
        .await?;

    let record = &aggregation.records["99"];
    assert_eq!(record.sex, Sex::Unknown);
    assert!(record.birth_date.is_none());
    assert_eq!(record.medications.as_ref().map(|m| m.len()), Some(1));
    Ok(())
}

#[test]
fn test_zero_workers_rejected() {
    let result = Aggregator::new(config(0), Arc::new(ScriptedFetcher::new(0)));
    assert!(matches!(result, Err(PipelineError::Config(_))));
}

/// Category queries against the warehouse feed the same merge
#[tokio::test]
async fn test_query_backed_fetcher() -> Result<()> {
    init();
    let bef = |rows: &[(&str, &str)]| {
        result_set(
            &["PNR", "KOM"],
            rows.iter()
                .map(|&(pnr, kom)| vec![CellValue::from(pnr), CellValue::from(kom)])
                .collect(),
        )
    };
    let factory = MemoryFactory::new()
        .with_table("SELECT PNR, KOM FROM bef201012", bef(&[("42", "020")]))
        .with_table("SELECT PNR, KOM FROM bef201112", bef(&[("42", "010"), ("8", "461")]))
        .fail_times("SELECT PNR, KOM FROM bef201112", 1);
    let session = Arc::new(QuerySession::new(Arc::new(factory.clone())));
    let fetcher = QueryCategoryFetcher::new(
        session,
        [CategoryDefinition::new(
            Category::Residence,
            "SELECT PNR, KOM FROM bef{year}12",
        )],
        FactColumns::default(),
    );

    let aggregation = Aggregator::new(config(2), Arc::new(fetcher))?
        .collect(&[Category::Residence], 2010..=2012)
        .await?;

    assert_eq!(
        aggregation.failed_slices,
        vec![Slice {
            category: Category::Residence,
            year: 2012,
        }]
    );
    assert_eq!(aggregation.records.len(), 2);
    assert_eq!(aggregation.records["42"].region_min.as_deref(), Some("010"));
    assert_eq!(aggregation.records["42"].region_max.as_deref(), Some("020"));
    // 2010 once, 2011 failed then retried, 2012 twice
    assert_eq!(factory.executions(), 5);
    Ok(())
}
