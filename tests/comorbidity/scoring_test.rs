use cohort_extract::comorbidity::{
    DiagnosisColumns, DiagnosisWeightFact, ScoreRecord, calculate, calculate_all,
    facts_from_rows, score_records,
};
use cohort_extract::{CellValue, ComorbidityConfig, Quarter, Result, Row};

use crate::utils::init;

fn q(year: i32, quarter: u8) -> Quarter {
    Quarter::new(year, quarter).unwrap()
}

/// The three-fact single-year scenario yields one clamped window scoring 7
#[test]
fn test_single_year_end_to_end() -> Result<()> {
    let facts = [
        DiagnosisWeightFact::new(q(2010, 1), "A", 5, "1301"),
        DiagnosisWeightFact::new(q(2010, 2), "A", 3, "1301"),
        DiagnosisWeightFact::new(q(2010, 4), "B", 2, "4202"),
    ];

    let windows = calculate(&facts, &ComorbidityConfig::new(2010, 2010))?;

    assert_eq!(windows.len(), 1);
    assert_eq!((windows[0].start, windows[0].end), (q(2010, 1), q(2010, 4)));
    assert_eq!(windows[0].score, 7);
    Ok(())
}

/// Anchors advance one quarter at a time up to the horizon's final window
#[test]
fn test_anchors_are_contiguous_between_sparse_facts() -> Result<()> {
    let facts = [
        DiagnosisWeightFact::new(q(2010, 1), "A", 1, ""),
        DiagnosisWeightFact::new(q(2011, 3), "B", 2, ""),
    ];

    let windows = calculate(&facts, &ComorbidityConfig::new(2010, 2012))?;

    let first = windows.first().unwrap();
    let last = windows.last().unwrap();
    assert_eq!(first.start, q(2010, 1));
    assert_eq!(last.start, q(2012, 1));
    assert_eq!(last.end, q(2012, 4));
    assert_eq!(
        windows.len() as u64,
        Quarter::distance(first.start, last.start) + 1
    );
    assert!(windows.iter().all(|w| w.end <= q(2012, 4)));
    assert!(windows.iter().all(|w| Quarter::distance(w.start, w.end) <= 3));
    Ok(())
}

/// Extracted rows score and persist as a sorted table
#[test]
fn test_rows_to_score_table() -> Result<()> {
    init();
    let rows: Vec<Row> = [
        ("2", "2012-07-01", "DG30"),
        ("1", "2012-01-05", "DC780"),
        ("1", "2012-02-11", "DN18"),
        ("1", "2012-12-24", "DR10"),
    ]
    .into_iter()
    .map(|(pnr, day, code)| {
        Row::from_pairs(
            "dwh",
            "lpr_diag",
            vec![
                ("PNR", CellValue::from(pnr)),
                ("D_INDDTO", CellValue::from(day)),
                ("C_ADIAG", CellValue::from(code)),
                ("C_SGH", CellValue::from("1301")),
            ],
        )
    })
    .collect::<Result<_>>()?;

    let facts = facts_from_rows(&rows, &DiagnosisColumns::default())?;
    let scores = calculate_all(&facts, &ComorbidityConfig::new(2012, 2012))?;
    let table = score_records(&scores);

    assert_eq!(
        table,
        vec![
            ScoreRecord {
                subject_id: "1".to_string(),
                start: q(2012, 1),
                end: q(2012, 4),
                score: 8,
            },
            ScoreRecord {
                subject_id: "2".to_string(),
                start: q(2012, 3),
                end: q(2012, 4),
                score: 1,
            },
        ]
    );

    let json = serde_json::to_value(&table[0])?;
    assert_eq!(json["start"], "2012Q1");
    assert_eq!(json["score"], 8);
    Ok(())
}
