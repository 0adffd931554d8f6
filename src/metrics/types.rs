use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;

use crate::access::UserFilter;
use crate::catalog::AggregationKind;
use crate::date_util::{format_day, week_start};
use crate::error::{Error, Result};
use crate::query::period::Period;

/// Metric name → value. Every catalog metric is present once a record
/// has been pivoted, so absent metrics read as 0 rather than missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetricValues(BTreeMap<String, f64>);

impl MetricValues {
    /// All given metrics, each at 0.
    pub fn zeroed<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self(names.into_iter().map(|n| (n.to_string(), 0.0)).collect())
    }

    pub fn get(&self, name: &str) -> f64 {
        self.0.get(name).copied().unwrap_or(0.0)
    }

    pub fn add(&mut self, name: &str, value: f64) {
        *self.0.entry(name.to_string()).or_insert(0.0) += value;
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.0.insert(name.to_string(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One user's metrics for one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotedEntry {
    pub date: NaiveDate,
    pub user_id: String,
    pub user_name: Option<String>,
    pub values: MetricValues,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Pivot {
    /// Date descending, then user id.
    pub entries: Vec<PivotedEntry>,
    /// Rows dropped for an unparseable date or an unknown metric.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    Day,
    Week,
    Month,
}

impl GroupBy {
    /// Chart bucket key for a day.
    pub fn bucket_key(&self, day: NaiveDate) -> String {
        match self {
            GroupBy::Day => format_day(day),
            GroupBy::Week => format_day(week_start(day)),
            GroupBy::Month => day.format("%Y-%m").to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupBy::Day => "day",
            GroupBy::Week => "week",
            GroupBy::Month => "month",
        }
    }
}

impl FromStr for GroupBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "day" | "daily" => Ok(GroupBy::Day),
            "week" | "weekly" => Ok(GroupBy::Week),
            "month" | "monthly" => Ok(GroupBy::Month),
            other => Err(Error::InvalidInput(format!(
                "unknown grouping '{other}' (expected day, week or month)"
            ))),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub bucket: String,
    pub values: MetricValues,
}

/// Summary card for one catalog KPI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricCard {
    pub kpi_id: String,
    pub name: String,
    pub sector: String,
    pub aggregation: AggregationKind,
    pub value: f64,
    pub previous: f64,
    /// Whole percent change against the previous period.
    pub trend: i64,
}

/// Summary card for a derived percentage metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatioCard {
    pub id: String,
    pub name: String,
    pub value: f64,
    pub previous: f64,
    pub trend: i64,
}

#[derive(Debug, Clone)]
pub struct SeriesRequest {
    pub period: Period,
    pub user: UserFilter,
    pub group_by: GroupBy,
    pub recent_limit: usize,
}

/// Everything the dashboard shows for one period.
#[derive(Debug, Clone, Serialize)]
pub struct KpiSeries {
    pub period: String,
    pub previous_period: String,
    pub user: UserFilter,
    pub group_by: GroupBy,
    pub cards: Vec<MetricCard>,
    pub ratios: Vec<RatioCard>,
    /// Chronological.
    pub chart: Vec<ChartPoint>,
    pub recent_entries: Vec<PivotedEntry>,
    pub skipped_rows: usize,
}
