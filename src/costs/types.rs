use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Open,
    Closed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Open => "open",
            JobStatus::Closed => "closed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(JobStatus::Open),
            "closed" => Ok(JobStatus::Closed),
            other => Err(Error::InvalidInput(format!("unknown job status '{other}'"))),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_title: String,
    pub client_id: Option<String>,
    pub status: JobStatus,
    pub job_date: Option<String>,
    /// Older rows carry the start date here instead of `job_date`.
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl Job {
    /// The raw start date: `job_date`, falling back to `start_date`.
    pub fn start_raw(&self) -> Option<&str> {
        self.job_date
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.start_date.as_deref().filter(|s| !s.trim().is_empty()))
    }
}

/// A discrete operational expense dated to a specific day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCost {
    pub id: String,
    pub job_id: Option<String>,
    pub description: String,
    pub amount: f64,
    pub cost_date: String,
}

/// A cost-bearing employee and their hourly rate (0 when no rate row exists).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeRate {
    pub rate_id: Option<String>,
    pub user_id: String,
    pub name: String,
    pub hourly_rate: f64,
}

/// One month of the cost overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyCost {
    /// Normalized month key, `YYYY-MM-01`.
    pub month_date: String,
    /// Display label, e.g. `Jun 2025`.
    pub month: String,
    pub total_employee_cost: f64,
    pub total_job_costs: f64,
    pub total_cost: f64,
    pub open_jobs_count: u64,
    pub cost_per_job: f64,
}

/// A job and the unit cost of the month it started in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobAllocation {
    pub job_id: String,
    pub job_title: String,
    pub client_id: Option<String>,
    pub status: JobStatus,
    pub start_date: NaiveDate,
    pub end_date: Option<String>,
    pub month_date: String,
    pub total_allocated_cost: f64,
}

/// Per-employee labor cost for one month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmployeeCostLine {
    pub user_id: String,
    pub name: String,
    pub hourly_rate: f64,
    pub hours: f64,
    /// True when `hours` comes from an adjustment rather than the default.
    pub adjusted: bool,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostSeries {
    pub window: String,
    /// Chronological.
    pub months: Vec<MonthlyCost>,
    /// Start date descending.
    pub allocations: Vec<JobAllocation>,
}

impl CostSeries {
    /// The most recent month in the window (what the summary cards show).
    pub fn latest(&self) -> Option<&MonthlyCost> {
        self.months.last()
    }
}
