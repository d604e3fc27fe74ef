//! Calendar quarters
//!
//! Quarters are ordered chronologically and identified by a single ordinal
//! (`year * 4 + quarter - 1`), which makes stepping and distances across
//! year boundaries plain integer arithmetic.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PipelineError, Result};

/// A (year, quarter) pair with quarter in 1..=4
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quarter {
    year: i32,
    quarter: u8,
}

impl Quarter {
    /// Create a quarter, validating the quarter number
    pub fn new(year: i32, quarter: u8) -> Result<Self> {
        if !(1..=4).contains(&quarter) {
            return Err(PipelineError::InvalidQuarter(format!("{year}Q{quarter}")));
        }
        Ok(Self { year, quarter })
    }

    /// First quarter of a year
    #[must_use]
    pub const fn first_of(year: i32) -> Self {
        Self { year, quarter: 1 }
    }

    /// Last quarter of a year
    #[must_use]
    pub const fn last_of(year: i32) -> Self {
        Self { year, quarter: 4 }
    }

    /// The quarter containing a date
    #[must_use]
    pub fn from_date(date: NaiveDate) -> Self {
        // month0 is 0..=11, so the quarter is always 1..=4
        let quarter = u8::try_from(date.month0() / 3 + 1).unwrap_or(4);
        Self {
            year: date.year(),
            quarter,
        }
    }

    /// Calendar year
    #[must_use]
    pub const fn year(self) -> i32 {
        self.year
    }

    /// Quarter number, 1..=4
    #[must_use]
    pub const fn quarter(self) -> u8 {
        self.quarter
    }

    /// Linear position on the quarter axis
    #[must_use]
    pub const fn ordinal(self) -> i64 {
        self.year as i64 * 4 + self.quarter as i64 - 1
    }

    const fn from_ordinal(ordinal: i64) -> Self {
        let year = ordinal.div_euclid(4);
        let quarter = ordinal.rem_euclid(4) + 1;
        Self {
            year: year as i32,
            quarter: quarter as u8,
        }
    }

    /// The following quarter; Q4 wraps to Q1 of the next year
    #[must_use]
    pub const fn increment(self) -> Self {
        if self.quarter == 4 {
            Self {
                year: self.year + 1,
                quarter: 1,
            }
        } else {
            Self {
                year: self.year,
                quarter: self.quarter + 1,
            }
        }
    }

    /// The quarter `n` steps later
    #[must_use]
    pub const fn advance(self, n: u32) -> Self {
        Self::from_ordinal(self.ordinal() + n as i64)
    }

    /// Number of quarter steps between two quarters, in either order
    #[must_use]
    pub const fn distance(a: Self, b: Self) -> u64 {
        a.ordinal().abs_diff(b.ordinal())
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q{}", self.year, self.quarter)
    }
}

impl FromStr for Quarter {
    type Err = PipelineError;

    /// Accepts `2010Q1`, `2010-Q1` and `2010q1`
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PipelineError::InvalidQuarter(s.to_string());
        let upper = s.trim().to_uppercase();
        let (year, quarter) = upper.split_once('Q').ok_or_else(invalid)?;
        let year = year.trim_end_matches('-').parse().map_err(|_| invalid())?;
        let quarter = quarter.parse().map_err(|_| invalid())?;
        Self::new(year, quarter)
    }
}

impl Serialize for Quarter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quarter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
