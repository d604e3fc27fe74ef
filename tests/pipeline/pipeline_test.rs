use std::sync::Arc;

use cohort_extract::aggregate::{Aggregator, Category, Sex};
use cohort_extract::comorbidity::{DiagnosisColumns, calculate_all, facts_from_rows};
use cohort_extract::pipeline::{
    AndFilter, AppendComorbidityScore, AppendSubjectHash, IncludeAllFilter, NotNullFilter,
    RequiredColumnsFilter, RowFilter,
};
use cohort_extract::{
    AggregationConfig, CellValue, ComorbidityConfig, MemoryWriter, Pipeline, PipelineConfig,
    QueryJob, QuerySession, Result, ResultSet, StageConfig, TransformChain,
};
use rustc_hash::FxHashMap;

use crate::utils::{MemoryFactory, ScriptedFetcher, date, demographic, init, residence, result_set};

const COLUMNS: [&str; 3] = ["PNR", "D_INDDTO", "C_ADIAG"];

fn lpr(rows: &[(Option<&str>, &str, &str)]) -> ResultSet {
    result_set(
        &COLUMNS,
        rows.iter()
            .map(|&(pnr, day, code)| {
                vec![CellValue::from(pnr), CellValue::from(day), CellValue::from(code)]
            })
            .collect(),
    )
}

fn job(year: i32) -> QueryJob {
    QueryJob::new(
        format!("SELECT * FROM lpr_diag_{year}"),
        "dwh",
        "lpr_diag",
        year.to_string(),
        "lpr",
    )
}

fn warehouse() -> MemoryFactory {
    MemoryFactory::new()
        .with_table(
            "SELECT * FROM lpr_diag_2010",
            lpr(&[
                (Some("1"), "2010-02-10", "DI21"),
                (Some("2"), "2010-05-01", "DE112"),
                (None, "2010-05-02", "DJ45"),
                (Some("1"), "2010-11-30", "DC50"),
            ]),
        )
        .with_table(
            "SELECT * FROM lpr_diag_2011",
            lpr(&[
                (Some("1"), "2011-03-03", "DK25"),
                (Some("3"), "2011-08-19", "DZ00"),
            ]),
        )
        .fail_times("SELECT * FROM lpr_diag_2011", 1)
}

fn config() -> PipelineConfig {
    PipelineConfig::uniform(StageConfig::new(4, 2))
}

/// Every row reaches the writer once and the run reports completion
#[tokio::test]
async fn test_rows_flow_through_every_stage() -> Result<()> {
    init();
    let session = Arc::new(QuerySession::new(Arc::new(warehouse())));
    let pipeline = Pipeline::new(
        config(),
        session,
        Arc::new(IncludeAllFilter),
        Arc::new(TransformChain::new()),
    )?;

    let mut writer = MemoryWriter::new();
    let report = pipeline.run(vec![job(2010), job(2011)], &mut writer).await?;

    assert_eq!(writer.rows().len(), 6);
    assert_eq!(report.output.written, 6);
    assert!(report.stages.iter().all(|s| s.completed));
    assert_eq!(report.dropped(), 0);
    Ok(())
}

/// Failed jobs and rejected rows are dropped without stopping the run
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failures_are_contained() -> Result<()> {
    init();
    let factory = warehouse();
    let session = Arc::new(QuerySession::new(Arc::new(factory.clone())));
    let filter: Arc<dyn RowFilter> = Arc::new(AndFilter::new(vec![
        Arc::new(RequiredColumnsFilter::new(COLUMNS)),
        Arc::new(NotNullFilter::new("PNR")),
    ]));
    let pipeline = Pipeline::new(config(), session, filter, Arc::new(TransformChain::new()))?;

    let mut writer = MemoryWriter::new();
    let jobs = vec![job(2010), job(2011), job(2012)];
    let report = pipeline.run(jobs, &mut writer).await?;

    // 2012 has no table; 2011 recovers on its retry
    assert_eq!(report.stages[0].received, 3);
    assert_eq!(report.stages[0].dropped, 1);
    assert_eq!(report.stages[1].dropped, 1);
    assert_eq!(report.output.written, 5);
    assert!(
        writer
            .rows()
            .iter()
            .all(|row| !row.get("PNR").unwrap().is_null())
    );
    assert_eq!(factory.executions(), 1 + 2 + 2);
    Ok(())
}

/// Hash and score tables feed the transform stage as lookups
#[tokio::test]
async fn test_rows_are_enriched_from_lookups() -> Result<()> {
    init();
    let fetcher = ScriptedFetcher::new(7)
        .with_slice(
            Category::Demographic,
            2010,
            vec![
                demographic("1", Sex::Female, date(1950, 4, 2)),
                demographic("2", Sex::Male, date(1961, 9, 9)),
            ],
        )
        .with_slice(Category::Residence, 2011, vec![residence("1", "101")]);
    let aggregator = Aggregator::new(
        AggregationConfig {
            show_progress: false,
            ..AggregationConfig::default()
        },
        Arc::new(fetcher),
    )?;
    let hashes = Arc::new(
        aggregator
            .aggregate(&[Category::Demographic, Category::Residence], 2010..=2011)
            .await?,
    );

    let factory = warehouse();
    let diagnosis_rows = {
        let probe = QuerySession::new(Arc::new(factory.clone()));
        probe
            .execute("SELECT * FROM lpr_diag_2010")
            .await?
            .into_rows("dwh", "lpr_diag")?
    };
    let facts = facts_from_rows(&diagnosis_rows, &DiagnosisColumns::default())?;
    let scores: FxHashMap<_, _> = calculate_all(&facts, &ComorbidityConfig::new(2010, 2011))?;

    let transformer = TransformChain::new()
        .then(AppendSubjectHash::new("PNR", "SUBJECT_HASH", hashes.clone()))
        .then(AppendComorbidityScore::new(
            "PNR",
            "D_INDDTO",
            "CCI",
            Arc::new(scores),
        ));
    let session = Arc::new(QuerySession::new(Arc::new(factory)));
    let pipeline = Pipeline::new(
        config(),
        session,
        Arc::new(NotNullFilter::new("PNR")),
        Arc::new(transformer),
    )?;

    let mut writer = MemoryWriter::new();
    pipeline.run(vec![job(2010)], &mut writer).await?;

    let mut rows = writer.into_rows();
    rows.sort_by_key(|row| row.get("D_INDDTO").and_then(CellValue::as_date));
    assert_eq!(rows.len(), 3);

    // subject 1, 2010Q1: myocardial infarction (1) + malignancy in Q4 (2)
    let first = &rows[0];
    assert_eq!(
        first.get("SUBJECT_HASH").and_then(CellValue::as_str),
        hashes.get("1").map(String::as_str)
    );
    assert_eq!(first.get("CCI"), Some(&CellValue::Int(3)));

    // subject 2, 2010Q2: complicated diabetes
    assert_eq!(rows[1].get("CCI"), Some(&CellValue::Int(2)));

    // subject 1, 2010Q4: malignancy only, the Q1 infarction is out of the window
    assert_eq!(rows[2].get("CCI"), Some(&CellValue::Int(2)));
    Ok(())
}
