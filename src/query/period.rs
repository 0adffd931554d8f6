use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;

use crate::date_util::{format_day, month_end, parse_day};
use crate::error::{Error, Result};

static RE_ROLLING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,4})[dD]?$").unwrap());
static RE_QUARTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})-[qQ]([1-4])$").unwrap());
static RE_MONTH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})$").unwrap());
static RE_YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})$").unwrap());

/// A reporting window for KPI aggregation and entry queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Period {
    /// The last N days ending on (and including) the given day.
    Rolling(u32, NaiveDate),
    Month(i32, u8),
    Quarter(i32, u8),
    Year(i32),
    /// Explicit inclusive range.
    Range(NaiveDate, NaiveDate),
}

impl Period {
    /// Parse a period string relative to today.
    pub fn parse(s: &str) -> Result<Self> {
        Self::parse_as_of(s, chrono::Local::now().date_naive())
    }

    /// Parse a period string.
    ///
    /// Supported formats:
    /// - `30` or `30d` — rolling last N days ending at `as_of`
    /// - `2025-06` — calendar month
    /// - `2025-Q2` — calendar quarter
    /// - `2025` — calendar year
    /// - `2025-06-01..2025-06-15` — explicit inclusive range
    pub fn parse_as_of(s: &str, as_of: NaiveDate) -> Result<Self> {
        let s = s.trim();

        if let Some((start, end)) = s.split_once("..") {
            let start = parse_day(start)
                .ok_or_else(|| Error::PeriodParse(format!("invalid range start: {s}")))?;
            let end = parse_day(end)
                .ok_or_else(|| Error::PeriodParse(format!("invalid range end: {s}")))?;
            if end < start {
                return Err(Error::PeriodParse(format!("range ends before it starts: {s}")));
            }
            return Ok(Period::Range(start, end));
        }

        // Four bare digits read as a year, not a 2025-day window
        if let Some(caps) = RE_YEAR.captures(s) {
            let year: i32 = caps[1]
                .parse()
                .map_err(|_| Error::PeriodParse(format!("invalid year: {s}")))?;
            return Ok(Period::Year(year));
        }

        if let Some(caps) = RE_ROLLING.captures(s) {
            let days: u32 = caps[1]
                .parse()
                .map_err(|_| Error::PeriodParse(format!("invalid day count: {s}")))?;
            if days == 0 {
                return Err(Error::PeriodParse("rolling period needs at least 1 day".into()));
            }
            return Ok(Period::Rolling(days, as_of));
        }

        if let Some(caps) = RE_QUARTER.captures(s) {
            let year: i32 = caps[1]
                .parse()
                .map_err(|_| Error::PeriodParse(format!("invalid year: {s}")))?;
            let q: u8 = caps[2]
                .parse()
                .map_err(|_| Error::PeriodParse(format!("invalid quarter: {s}")))?;
            return Ok(Period::Quarter(year, q));
        }

        if let Some(caps) = RE_MONTH.captures(s) {
            let year: i32 = caps[1]
                .parse()
                .map_err(|_| Error::PeriodParse(format!("invalid year: {s}")))?;
            let month: u8 = caps[2]
                .parse()
                .map_err(|_| Error::PeriodParse(format!("invalid month: {s}")))?;
            if (1..=12).contains(&month) {
                return Ok(Period::Month(year, month));
            }
        }

        Err(Error::PeriodParse(format!("unrecognized period: {s}")))
    }

    /// Canonical key, parseable again by [`Period::parse_as_of`].
    pub fn to_key(&self) -> String {
        match self {
            Period::Rolling(n, _) => format!("{n}d"),
            Period::Month(y, m) => format!("{y}-{m:02}"),
            Period::Quarter(y, q) => format!("{y}-Q{q}"),
            Period::Year(y) => format!("{y}"),
            Period::Range(start, end) => format!("{}..{}", format_day(*start), format_day(*end)),
        }
    }

    /// Inclusive (start, end) days covered by this period.
    pub fn date_range(&self) -> (NaiveDate, NaiveDate) {
        match self {
            Period::Rolling(n, as_of) => {
                (*as_of - Duration::days(i64::from(*n).max(1) - 1), *as_of)
            }
            Period::Month(y, m) => {
                let start = first_of(*y, u32::from(*m));
                (start, month_end(start))
            }
            Period::Quarter(y, q) => {
                let start_month = (u32::from(*q) - 1) * 3 + 1;
                let start = first_of(*y, start_month);
                (start, month_end(first_of(*y, start_month + 2)))
            }
            Period::Year(y) => (first_of(*y, 1), month_end(first_of(*y, 12))),
            Period::Range(start, end) => (*start, *end),
        }
    }

    /// Inclusive range as `YYYY-MM-DD` strings, for SQL filters.
    pub fn date_strings(&self) -> (String, String) {
        let (start, end) = self.date_range();
        (format_day(start), format_day(end))
    }

    /// Number of days in the period.
    pub fn days(&self) -> i64 {
        let (start, end) = self.date_range();
        (end - start).num_days() + 1
    }

    /// The period immediately before this one. Day-based windows shift back
    /// by their own length; calendar periods step to the prior unit.
    pub fn previous(&self) -> Self {
        match self {
            Period::Rolling(n, as_of) => Period::Rolling(*n, *as_of - Duration::days(i64::from(*n))),
            Period::Month(y, m) => {
                if *m == 1 {
                    Period::Month(y - 1, 12)
                } else {
                    Period::Month(*y, m - 1)
                }
            }
            Period::Quarter(y, q) => {
                if *q == 1 {
                    Period::Quarter(y - 1, 4)
                } else {
                    Period::Quarter(*y, q - 1)
                }
            }
            Period::Year(y) => Period::Year(y - 1),
            Period::Range(start, end) => {
                let len = (*end - *start).num_days() + 1;
                Period::Range(*start - Duration::days(len), *end - Duration::days(len))
            }
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        let (start, end) = self.date_range();
        day >= start && day <= end
    }

    /// Human label for headings.
    pub fn label(&self) -> String {
        match self {
            Period::Rolling(n, as_of) => format!("last {n} days to {}", format_day(*as_of)),
            Period::Month(..) => self.date_range().0.format("%B %Y").to_string(),
            Period::Quarter(y, q) => format!("Q{q} {y}"),
            Period::Year(y) => format!("{y}"),
            Period::Range(start, end) => format!("{} to {}", format_day(*start), format_day(*end)),
        }
    }
}

fn first_of(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

impl std::str::FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Period::parse(s)
    }
}

/// The calendar month containing `day`.
pub fn month_of(day: NaiveDate) -> Period {
    Period::Month(day.year(), day.month() as u8)
}
