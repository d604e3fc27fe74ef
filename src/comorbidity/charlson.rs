//! Charlson comorbidity classes
//!
//! Maps ICD-10 diagnosis codes onto the 17 Charlson conditions and their
//! standard weights, and turns extracted diagnosis rows into weighted facts.

use std::fmt;

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::comorbidity::window::DiagnosisWeightFact;
use crate::error::Result;
use crate::model::{Quarter, Row};

/// Charlson comorbidity conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CharlsonCondition {
    /// Acute or old myocardial infarction
    MyocardialInfarction,
    /// Congestive heart failure
    CongestiveHeartFailure,
    /// Peripheral vascular disease
    PeripheralVascularDisease,
    /// Cerebrovascular disease
    CerebrovascularDisease,
    /// Dementia
    Dementia,
    /// Chronic pulmonary disease
    ChronicPulmonaryDisease,
    /// Connective tissue (rheumatic) disease
    RheumaticDisease,
    /// Peptic ulcer disease
    PepticUlcer,
    /// Mild liver disease
    MildLiverDisease,
    /// Diabetes without chronic complications
    Diabetes,
    /// Diabetes with end-organ damage
    DiabetesWithComplications,
    /// Hemiplegia or paraplegia
    Hemiplegia,
    /// Moderate or severe renal disease
    RenalDisease,
    /// Any malignancy, including leukemia and lymphoma
    Malignancy,
    /// Moderate or severe liver disease
    SevereLiverDisease,
    /// Metastatic solid tumor
    MetastaticTumor,
    /// AIDS/HIV
    Aids,
}

// ICD-10 prefixes per condition. More specific conditions are listed before
// the broader ones that share a prefix range.
const METASTATIC: &[&str] = &["C77", "C78", "C79", "C80"];
const AIDS: &[&str] = &["B20", "B21", "B22", "B24"];
const SEVERE_LIVER: &[&str] = &[
    "I850", "I859", "I864", "I982", "K704", "K711", "K721", "K729", "K765", "K766", "K767",
];
const DIABETES_COMPLICATED: &[&str] = &[
    "E102", "E103", "E104", "E105", "E107", "E112", "E113", "E114", "E115", "E117", "E122",
    "E123", "E124", "E125", "E127", "E132", "E133", "E134", "E135", "E137", "E142", "E143",
    "E144", "E145", "E147",
];
const DIABETES: &[&str] = &["E10", "E11", "E12", "E13", "E14"];
const HEMIPLEGIA: &[&str] = &[
    "G041", "G114", "G801", "G802", "G81", "G82", "G830", "G831", "G832", "G833", "G834", "G839",
];
const RENAL: &[&str] = &[
    "I120", "I131", "N032", "N033", "N034", "N035", "N036", "N037", "N052", "N053", "N054",
    "N055", "N056", "N057", "N18", "N19", "N250", "Z490", "Z491", "Z492", "Z940", "Z992",
];
const MALIGNANCY: &[&str] = &[
    "C0", "C1", "C20", "C21", "C22", "C23", "C24", "C25", "C26", "C30", "C31", "C32", "C33",
    "C34", "C37", "C38", "C39", "C40", "C41", "C43", "C45", "C46", "C47", "C48", "C49", "C5",
    "C60", "C61", "C62", "C63", "C64", "C65", "C66", "C67", "C68", "C69", "C70", "C71", "C72",
    "C73", "C74", "C75", "C76", "C81", "C82", "C83", "C84", "C85", "C88", "C90", "C91", "C92",
    "C93", "C94", "C95", "C96", "C97",
];
const MYOCARDIAL: &[&str] = &["I21", "I22", "I252"];
const HEART_FAILURE: &[&str] = &[
    "I099", "I110", "I130", "I132", "I255", "I420", "I425", "I426", "I427", "I428", "I429",
    "I43", "I50", "P290",
];
const PERIPHERAL: &[&str] = &[
    "I70", "I71", "I731", "I738", "I739", "I771", "I790", "I792", "K551", "K558", "K559", "Z958",
    "Z959",
];
const CEREBROVASCULAR: &[&str] = &["G45", "G46", "H340", "I6"];
const DEMENTIA: &[&str] = &["F00", "F01", "F02", "F03", "F051", "G30", "G311"];
const PULMONARY: &[&str] = &[
    "I278", "I279", "J4", "J60", "J61", "J62", "J63", "J64", "J65", "J66", "J67", "J684",
    "J701", "J703",
];
const RHEUMATIC: &[&str] = &["M05", "M06", "M315", "M32", "M33", "M34", "M351", "M353", "M360"];
const PEPTIC_ULCER: &[&str] = &["K25", "K26", "K27", "K28"];
const MILD_LIVER: &[&str] = &[
    "B18", "K700", "K701", "K702", "K703", "K709", "K713", "K714", "K715", "K717", "K73", "K74",
    "K760", "K762", "K763", "K764", "K768", "K769", "Z944",
];

impl CharlsonCondition {
    /// Every condition, in lookup priority order
    pub const ALL: [Self; 17] = [
        Self::MetastaticTumor,
        Self::Aids,
        Self::SevereLiverDisease,
        Self::DiabetesWithComplications,
        Self::Diabetes,
        Self::Hemiplegia,
        Self::RenalDisease,
        Self::Malignancy,
        Self::MyocardialInfarction,
        Self::CongestiveHeartFailure,
        Self::PeripheralVascularDisease,
        Self::CerebrovascularDisease,
        Self::Dementia,
        Self::ChronicPulmonaryDisease,
        Self::RheumaticDisease,
        Self::PepticUlcer,
        Self::MildLiverDisease,
    ];

    /// Standard Charlson weight
    #[must_use]
    pub const fn weight(self) -> u32 {
        match self {
            Self::MetastaticTumor | Self::Aids => 6,
            Self::SevereLiverDisease => 3,
            Self::DiabetesWithComplications
            | Self::Hemiplegia
            | Self::RenalDisease
            | Self::Malignancy => 2,
            _ => 1,
        }
    }

    /// Class label used in weight facts and score tables
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::MyocardialInfarction => "myocardial_infarction",
            Self::CongestiveHeartFailure => "congestive_heart_failure",
            Self::PeripheralVascularDisease => "peripheral_vascular_disease",
            Self::CerebrovascularDisease => "cerebrovascular_disease",
            Self::Dementia => "dementia",
            Self::ChronicPulmonaryDisease => "chronic_pulmonary_disease",
            Self::RheumaticDisease => "rheumatic_disease",
            Self::PepticUlcer => "peptic_ulcer",
            Self::MildLiverDisease => "mild_liver_disease",
            Self::Diabetes => "diabetes",
            Self::DiabetesWithComplications => "diabetes_with_complications",
            Self::Hemiplegia => "hemiplegia",
            Self::RenalDisease => "renal_disease",
            Self::Malignancy => "malignancy",
            Self::SevereLiverDisease => "severe_liver_disease",
            Self::MetastaticTumor => "metastatic_tumor",
            Self::Aids => "aids",
        }
    }

    const fn prefixes(self) -> &'static [&'static str] {
        match self {
            Self::MyocardialInfarction => MYOCARDIAL,
            Self::CongestiveHeartFailure => HEART_FAILURE,
            Self::PeripheralVascularDisease => PERIPHERAL,
            Self::CerebrovascularDisease => CEREBROVASCULAR,
            Self::Dementia => DEMENTIA,
            Self::ChronicPulmonaryDisease => PULMONARY,
            Self::RheumaticDisease => RHEUMATIC,
            Self::PepticUlcer => PEPTIC_ULCER,
            Self::MildLiverDisease => MILD_LIVER,
            Self::Diabetes => DIABETES,
            Self::DiabetesWithComplications => DIABETES_COMPLICATED,
            Self::Hemiplegia => HEMIPLEGIA,
            Self::RenalDisease => RENAL,
            Self::Malignancy => MALIGNANCY,
            Self::SevereLiverDisease => SEVERE_LIVER,
            Self::MetastaticTumor => METASTATIC,
            Self::Aids => AIDS,
        }
    }

    /// Classify an ICD-10 code
    ///
    /// Accepts dotted codes (`I21.9`) and the national `D`-prefixed form
    /// (`DI219`). Returns `None` for codes outside every class.
    #[must_use]
    pub fn classify(code: &str) -> Option<Self> {
        let clean = normalize_code(code)?;
        Self::ALL
            .into_iter()
            .find(|condition| condition.prefixes().iter().any(|p| clean.starts_with(p)))
    }
}

impl fmt::Display for CharlsonCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Uppercase, drop dots and whitespace, strip a leading national `D`
fn normalize_code(code: &str) -> Option<String> {
    let clean: String = code
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let mut chars = clean.chars();
    let stripped = match (chars.next(), chars.next()) {
        (Some('D'), Some(second)) if second.is_ascii_alphabetic() => clean[1..].to_string(),
        _ => clean,
    };
    (stripped.len() >= 3).then_some(stripped)
}

/// Source column names of a diagnosis extract
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DiagnosisColumns {
    /// Subject identifier
    pub subject: String,
    /// Date the diagnosis was recorded
    pub date: String,
    /// ICD-10 code
    pub code: String,
    /// Reporting facility; may be absent from the extract
    pub facility: String,
}

impl Default for DiagnosisColumns {
    fn default() -> Self {
        Self {
            subject: "PNR".to_string(),
            date: "D_INDDTO".to_string(),
            code: "C_ADIAG".to_string(),
            facility: "C_SGH".to_string(),
        }
    }
}

/// Turn extracted diagnosis rows into per-subject weighted facts
///
/// Rows with a null subject, date or code are skipped, as are codes that
/// fall outside every Charlson class. Each subject's facts come back sorted
/// chronologically.
///
/// # Arguments
/// * `rows` - Extracted diagnosis rows
/// * `columns` - Where to find each field
///
/// # Errors
/// Fails if a row lacks the subject, date or code column.
pub fn facts_from_rows(
    rows: &[Row],
    columns: &DiagnosisColumns,
) -> Result<FxHashMap<String, Vec<DiagnosisWeightFact>>> {
    let mut by_subject: FxHashMap<String, Vec<DiagnosisWeightFact>> = FxHashMap::default();
    let mut skipped = 0usize;

    for row in rows {
        let subject = row.get_or_err(&columns.subject)?.as_code();
        let date = row.get_or_err(&columns.date)?.as_date();
        let condition = row
            .get_or_err(&columns.code)?
            .as_code()
            .and_then(|code| CharlsonCondition::classify(&code));

        let (Some(subject), Some(date), Some(condition)) = (subject, date, condition) else {
            skipped += 1;
            continue;
        };
        let facility = row
            .get(&columns.facility)
            .and_then(|v| v.as_code())
            .unwrap_or_default();

        by_subject.entry(subject).or_default().push(DiagnosisWeightFact::new(
            Quarter::from_date(date),
            condition.label(),
            condition.weight(),
            facility,
        ));
    }

    for facts in by_subject.values_mut() {
        facts.sort_by(|a, b| a.quarter.cmp(&b.quarter).then_with(|| a.class.cmp(&b.class)));
    }
    if skipped > 0 {
        log::debug!("Skipped {skipped} diagnosis rows without a Charlson class");
    }
    Ok(by_subject)
}
