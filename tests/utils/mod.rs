//! Shared test fixtures: an in-memory warehouse and a scripted fact fetcher

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use cohort_extract::aggregate::{Category, CategoryFetcher, Sex, SubjectFact};
use cohort_extract::{CellValue, Connection, ConnectionFactory, PipelineError, Result, ResultSet};
use futures::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Install the test logger
pub fn init() {
    cohort_extract::init_logging();
}

/// Build a date, panicking on invalid input
#[must_use]
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Build a result set from string columns and cells
#[must_use]
pub fn result_set(columns: &[&str], rows: Vec<Vec<CellValue>>) -> ResultSet {
    ResultSet::new(columns.iter().map(ToString::to_string).collect(), rows)
}

#[derive(Default)]
struct Warehouse {
    tables: HashMap<String, ResultSet>,
    // remaining scripted failures per query
    failures: Mutex<HashMap<String, usize>>,
    executions: AtomicUsize,
    connects: AtomicUsize,
    // bumped by an outage; older connections fail but still look valid
    generation: AtomicUsize,
}

/// Connection factory serving canned result sets keyed by query text
///
/// Unknown queries fail every time; queries registered with `fail_times`
/// fail that many times before succeeding.
#[derive(Clone, Default)]
pub struct MemoryFactory {
    warehouse: Arc<Warehouse>,
    delay: Option<Duration>,
}

impl MemoryFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `rows` for `query`
    #[must_use]
    pub fn with_table(mut self, query: &str, rows: ResultSet) -> Self {
        Arc::get_mut(&mut self.warehouse)
            .expect("configure the factory before sharing it")
            .tables
            .insert(query.to_string(), rows);
        self
    }

    /// Make `query` fail `times` times before it succeeds
    #[must_use]
    pub fn fail_times(self, query: &str, times: usize) -> Self {
        self.warehouse
            .failures
            .lock()
            .unwrap()
            .insert(query.to_string(), times);
        self
    }

    /// Delay every query by `delay`
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Silently kill every connection opened so far
    pub fn outage(&self) {
        self.warehouse.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Queries executed so far, failed attempts included
    #[must_use]
    pub fn executions(&self) -> usize {
        self.warehouse.executions.load(Ordering::SeqCst)
    }

    /// Connections opened so far
    #[must_use]
    pub fn connects(&self) -> usize {
        self.warehouse.connects.load(Ordering::SeqCst)
    }
}

struct MemoryConnection {
    warehouse: Arc<Warehouse>,
    delay: Option<Duration>,
    broken: bool,
    generation: usize,
}

impl Connection for MemoryConnection {
    fn is_valid(&self) -> bool {
        !self.broken
    }

    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, Result<ResultSet>> {
        Box::pin(async move {
            self.warehouse.executions.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let scripted_failure = {
                let mut failures = self.warehouse.failures.lock().unwrap();
                match failures.get_mut(query) {
                    Some(remaining) if *remaining > 0 => {
                        *remaining -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if self.generation < self.warehouse.generation.load(Ordering::SeqCst) {
                return Err(PipelineError::Connection("stale connection".to_string()));
            }
            if scripted_failure {
                self.broken = true;
                return Err(PipelineError::Connection(format!(
                    "connection reset while running '{query}'"
                )));
            }

            self.warehouse
                .tables
                .get(query)
                .cloned()
                .ok_or_else(|| PipelineError::query(query, "no such table"))
        })
    }
}

impl ConnectionFactory for MemoryFactory {
    fn label(&self) -> &str {
        "memory"
    }

    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn Connection>>> {
        Box::pin(async move {
            self.warehouse.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemoryConnection {
                warehouse: self.warehouse.clone(),
                delay: self.delay,
                broken: false,
                generation: self.warehouse.generation.load(Ordering::SeqCst),
            }) as Box<dyn Connection>)
        })
    }
}

/// Fetcher with scripted facts per slice and seeded random latency
///
/// The latency shuffles completion order between runs with different seeds.
pub struct ScriptedFetcher {
    facts: HashMap<(Category, i32), Vec<SubjectFact>>,
    failing: HashMap<(Category, i32), usize>,
    attempts: Mutex<HashMap<(Category, i32), usize>>,
    rng: Mutex<StdRng>,
    max_delay_ms: u64,
}

impl ScriptedFetcher {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            facts: HashMap::new(),
            failing: HashMap::new(),
            attempts: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            max_delay_ms: 5,
        }
    }

    /// Serve `facts` for the slice
    #[must_use]
    pub fn with_slice(mut self, category: Category, year: i32, facts: Vec<SubjectFact>) -> Self {
        self.facts.entry((category, year)).or_default().extend(facts);
        self
    }

    /// Fail the first `times` attempts of the slice
    #[must_use]
    pub fn failing(mut self, category: Category, year: i32, times: usize) -> Self {
        self.failing.insert((category, year), times);
        self
    }

    /// Attempts made for one slice
    #[must_use]
    pub fn attempts(&self, category: Category, year: i32) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(&(category, year))
            .copied()
            .unwrap_or(0)
    }
}

impl CategoryFetcher for ScriptedFetcher {
    fn fetch(&self, category: Category, year: i32) -> BoxFuture<'_, Result<Vec<SubjectFact>>> {
        let key = (category, year);
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(key).or_insert(0);
            *count += 1;
            *count
        };
        let delay_ms = self.rng.lock().unwrap().random_range(0..=self.max_delay_ms);
        let delay = Duration::from_millis(delay_ms);
        let fails = self.failing.get(&key).is_some_and(|&times| attempt <= times);
        let facts = self.facts.get(&key).cloned().unwrap_or_default();

        Box::pin(async move {
            tokio::time::sleep(delay).await;
            if fails {
                Err(PipelineError::query(
                    format!("{category}/{year}"),
                    format!("scripted failure on attempt {attempt}"),
                ))
            } else {
                Ok(facts)
            }
        })
    }
}

/// Demographic fact for a subject
#[must_use]
pub fn demographic(subject: &str, sex: Sex, birth: NaiveDate) -> SubjectFact {
    SubjectFact::Demographic {
        subject: subject.to_string(),
        sex,
        birth_date: Some(birth),
        death_date: None,
    }
}

/// Residence fact for a subject
#[must_use]
pub fn residence(subject: &str, region: &str) -> SubjectFact {
    SubjectFact::Residence {
        subject: subject.to_string(),
        region: region.to_string(),
    }
}

/// Diagnosis fact for a subject
#[must_use]
pub fn diagnosis(subject: &str, code: &str) -> SubjectFact {
    SubjectFact::Diagnosis {
        subject: subject.to_string(),
        code: code.to_string(),
    }
}
