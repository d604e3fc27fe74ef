//! Source categories, the facts they yield and how they are fetched

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use futures::future::BoxFuture;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::model::Row;
use crate::query::QuerySession;

/// One class of source data, fetched per year
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Sex, birth and death dates
    Demographic,
    /// Region (municipality) codes
    Residence,
    /// Diagnosis codes
    Diagnosis,
    /// Prescription (ATC) codes
    Medication,
}

impl Category {
    /// Every category, in canonical order
    pub const ALL: [Self; 4] = [
        Self::Demographic,
        Self::Residence,
        Self::Diagnosis,
        Self::Medication,
    ];

    /// Lowercase name used in logs and slice labels
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Demographic => "demographic",
            Self::Residence => "residence",
            Self::Diagnosis => "diagnosis",
            Self::Medication => "medication",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "demographic" | "bef" => Ok(Self::Demographic),
            "residence" => Ok(Self::Residence),
            "diagnosis" | "lpr" => Ok(Self::Diagnosis),
            "medication" | "lmdb" => Ok(Self::Medication),
            other => Err(PipelineError::Config(format!("unknown category '{other}'"))),
        }
    }
}

/// Sex code; `Unknown` is the default and sorts last
///
/// Merging keeps the minimum ordinal, so any observed sex wins over
/// `Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Sex {
    /// Male (`1` / `M`)
    Male,
    /// Female (`2` / `F` / `K`)
    Female,
    /// Not observed or unrecognized
    #[default]
    Unknown,
}

impl Sex {
    /// Parse a registry sex code
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_uppercase().as_str() {
            "1" | "M" => Self::Male,
            "2" | "F" | "K" => Self::Female,
            _ => Self::Unknown,
        }
    }

    /// Code written into the canonical hash form
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
            Self::Unknown => "U",
        }
    }
}

/// One fact about one subject from one category slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectFact {
    /// Demographic facts
    Demographic {
        subject: String,
        sex: Sex,
        birth_date: Option<NaiveDate>,
        death_date: Option<NaiveDate>,
    },
    /// A region of residence
    Residence { subject: String, region: String },
    /// A diagnosis code
    Diagnosis { subject: String, code: String },
    /// A prescription code
    Medication { subject: String, code: String },
}

impl SubjectFact {
    /// Subject the fact belongs to
    #[must_use]
    pub fn subject(&self) -> &str {
        match self {
            Self::Demographic { subject, .. }
            | Self::Residence { subject, .. }
            | Self::Diagnosis { subject, .. }
            | Self::Medication { subject, .. } => subject,
        }
    }

    /// Category the fact came from
    #[must_use]
    pub const fn category(&self) -> Category {
        match self {
            Self::Demographic { .. } => Category::Demographic,
            Self::Residence { .. } => Category::Residence,
            Self::Diagnosis { .. } => Category::Diagnosis,
            Self::Medication { .. } => Category::Medication,
        }
    }

    /// Read a fact of `category` from an extracted row
    ///
    /// Returns `Ok(None)` for rows without a subject id, and for residence,
    /// diagnosis and medication rows without a code.
    ///
    /// # Errors
    /// Fails if a column the category needs is absent from the row.
    pub fn from_row(category: Category, row: &Row, columns: &FactColumns) -> Result<Option<Self>> {
        let Some(subject) = row.get_or_err(&columns.subject)?.as_code() else {
            return Ok(None);
        };

        let fact = match category {
            Category::Demographic => Some(Self::Demographic {
                sex: row
                    .get_or_err(&columns.sex)?
                    .as_code()
                    .map_or(Sex::Unknown, |c| Sex::from_code(&c)),
                birth_date: row.get_or_err(&columns.birth_date)?.as_date(),
                death_date: row.get(&columns.death_date).and_then(|v| v.as_date()),
                subject,
            }),
            Category::Residence => row
                .get_or_err(&columns.region)?
                .as_code()
                .map(|region| Self::Residence { subject, region }),
            Category::Diagnosis => row
                .get_or_err(&columns.diagnosis)?
                .as_code()
                .map(|code| Self::Diagnosis { subject, code }),
            Category::Medication => row
                .get_or_err(&columns.medication)?
                .as_code()
                .map(|code| Self::Medication { subject, code }),
        };
        Ok(fact)
    }
}

/// Source column names for each fact field
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FactColumns {
    /// Subject identifier
    pub subject: String,
    /// Sex code
    pub sex: String,
    /// Birth date
    pub birth_date: String,
    /// Death date (optional in the source)
    pub death_date: String,
    /// Region code
    pub region: String,
    /// Diagnosis code
    pub diagnosis: String,
    /// Prescription code
    pub medication: String,
}

impl Default for FactColumns {
    fn default() -> Self {
        Self {
            subject: "PNR".to_string(),
            sex: "KOEN".to_string(),
            birth_date: "FOED_DAG".to_string(),
            death_date: "DOD_DATO".to_string(),
            region: "KOM".to_string(),
            diagnosis: "C_ADIAG".to_string(),
            medication: "ATC".to_string(),
        }
    }
}

/// Produces the raw facts of one (category, year) slice
pub trait CategoryFetcher: Send + Sync {
    /// Fetch every fact in the slice
    fn fetch(&self, category: Category, year: i32) -> BoxFuture<'_, Result<Vec<SubjectFact>>>;
}

/// Ready-to-run query text for one category; `{year}` is substituted per slice
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryDefinition {
    /// Category served by the query
    pub category: Category,
    /// Query text with a `{year}` placeholder
    pub query_template: String,
}

impl CategoryDefinition {
    /// Create a definition
    pub fn new(category: Category, query_template: impl Into<String>) -> Self {
        Self {
            category,
            query_template: query_template.into(),
        }
    }

    /// Query text for one year
    #[must_use]
    pub fn render(&self, year: i32) -> String {
        self.query_template.replace("{year}", &year.to_string())
    }
}

/// Fetches category slices by running queries through a `QuerySession`
///
/// A single attempt is made per call; the aggregator owns the retry.
#[derive(Debug)]
pub struct QueryCategoryFetcher {
    session: Arc<QuerySession>,
    definitions: FxHashMap<Category, CategoryDefinition>,
    columns: FactColumns,
}

impl QueryCategoryFetcher {
    /// Create a fetcher from category definitions
    pub fn new(
        session: Arc<QuerySession>,
        definitions: impl IntoIterator<Item = CategoryDefinition>,
        columns: FactColumns,
    ) -> Self {
        Self {
            session,
            definitions: definitions
                .into_iter()
                .map(|d| (d.category, d))
                .collect(),
            columns,
        }
    }

    async fn fetch_slice(&self, category: Category, year: i32) -> Result<Vec<SubjectFact>> {
        let definition = self.definitions.get(&category).ok_or_else(|| {
            PipelineError::Config(format!("no query defined for category {category}"))
        })?;

        let result = self.session.execute(&definition.render(year)).await?;
        let rows = result.into_rows(self.session.label(), category.name())?;

        let mut facts = Vec::with_capacity(rows.len());
        for row in &rows {
            let fact = SubjectFact::from_row(category, row, &self.columns)
                .with_context(|| format!("Failed to read {category} facts for {year}"))?;
            facts.extend(fact);
        }
        Ok(facts)
    }
}

impl CategoryFetcher for QueryCategoryFetcher {
    fn fetch(&self, category: Category, year: i32) -> BoxFuture<'_, Result<Vec<SubjectFact>>> {
        Box::pin(self.fetch_slice(category, year))
    }
}
