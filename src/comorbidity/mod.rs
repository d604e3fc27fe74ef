//! Charlson-style comorbidity scoring over rolling four-quarter windows

pub mod charlson;
pub mod window;

pub use charlson::{CharlsonCondition, DiagnosisColumns, facts_from_rows};
pub use window::{
    DiagnosisWeightFact, ScoreRecord, WINDOW_QUARTERS, WindowScore, calculate, calculate_all,
    score_records,
};
