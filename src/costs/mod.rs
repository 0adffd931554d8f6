//! Monthly operating cost: employee labor plus discrete job costs, divided
//! across the jobs that started in each month.

pub mod hours;
pub mod types;

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

pub use hours::{AdjustedHours, DEFAULT_MONTHLY_HOURS};
pub use types::{
    CostSeries, EmployeeCostLine, EmployeeRate, Job, JobAllocation, JobCost, JobStatus,
    MonthlyCost,
};

use crate::calc::safe_divide;
use crate::date_util::{month_key, month_label, parse_day, parse_month, same_month, shift_months};
use crate::error::{Error, Result};
use crate::storage::{repository, Database};

/// Which months a cost report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthWindow {
    /// `months` months ending with the month of `as_of`.
    Trailing { months: u32, as_of: NaiveDate },
    Single(i32, u32),
}

impl MonthWindow {
    pub fn trailing(months: u32) -> Self {
        MonthWindow::Trailing {
            months,
            as_of: chrono::Local::now().date_naive(),
        }
    }

    /// Parse `6`, `12` (trailing months) or `YYYY-MM` (one month).
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u32>() {
            return Ok(Self::trailing(n));
        }
        let month = parse_month(s)
            .ok_or_else(|| Error::InvalidInput(format!("expected month count or YYYY-MM, got '{s}'")))?;
        Ok(MonthWindow::Single(month.year(), month.month()))
    }

    /// First-of-month dates covered, oldest first.
    pub fn months(&self) -> Result<Vec<NaiveDate>> {
        match *self {
            MonthWindow::Trailing { months, as_of } => {
                if months == 0 {
                    return Err(Error::InvalidInput("month window needs at least 1 month".into()));
                }
                let months = i32::try_from(months)
                    .map_err(|_| Error::InvalidInput(format!("month window of {months} months is too large")))?;
                (0..months)
                    .rev()
                    .map(|back| {
                        shift_months(as_of, -back)
                            .ok_or_else(|| Error::InvalidInput("month window out of range".into()))
                    })
                    .collect()
            }
            MonthWindow::Single(year, month) => NaiveDate::from_ymd_opt(year, month, 1)
                .map(|d| vec![d])
                .ok_or_else(|| Error::InvalidInput(format!("invalid month {year}-{month:02}"))),
        }
    }

    pub fn label(&self) -> String {
        match self {
            MonthWindow::Trailing { months, .. } => format!("last {months} months"),
            MonthWindow::Single(year, month) => format!("{year}-{month:02}"),
        }
    }
}

/// Everything the cost engine reads from storage.
#[derive(Debug, Clone, Default)]
pub struct CostInputs {
    pub jobs: Vec<Job>,
    pub costs: Vec<JobCost>,
    pub employees: Vec<EmployeeRate>,
}

/// Labor cost per employee for the month containing `month`.
pub fn employee_cost_lines(
    employees: &[EmployeeRate],
    hours: &AdjustedHours,
    month: NaiveDate,
) -> Vec<EmployeeCostLine> {
    employees
        .iter()
        .map(|e| {
            let adjusted = hours.get(month, &e.user_id);
            let worked = adjusted.unwrap_or(hours.default_hours());
            EmployeeCostLine {
                user_id: e.user_id.clone(),
                name: e.name.clone(),
                hourly_rate: e.hourly_rate,
                hours: worked,
                adjusted: adjusted.is_some(),
                cost: worked * e.hourly_rate,
            }
        })
        .collect()
}

/// Compute monthly cost rows and per-job allocation for a window.
pub fn compute_cost_series(
    inputs: &CostInputs,
    hours: &AdjustedHours,
    window: &MonthWindow,
) -> Result<CostSeries> {
    let months = window.months()?;

    let mut job_starts: Vec<(&Job, NaiveDate)> = Vec::with_capacity(inputs.jobs.len());
    for job in &inputs.jobs {
        match job.start_raw().and_then(parse_day) {
            Some(start) => job_starts.push((job, start)),
            None => log::warn!(
                "Skipping job {} with unusable start date {:?}",
                job.id,
                job.start_raw()
            ),
        }
    }

    let mut dated_costs: Vec<(f64, NaiveDate)> = Vec::with_capacity(inputs.costs.len());
    for cost in &inputs.costs {
        match parse_day(&cost.cost_date) {
            Some(day) => dated_costs.push((cost.amount, day)),
            None => log::warn!(
                "Skipping job cost {} with unparseable date '{}'",
                cost.id,
                cost.cost_date
            ),
        }
    }

    let mut rows = Vec::with_capacity(months.len());
    for &month in &months {
        let total_employee_cost: f64 = employee_cost_lines(&inputs.employees, hours, month)
            .iter()
            .map(|line| line.cost)
            .sum();
        let total_job_costs: f64 = dated_costs
            .iter()
            .filter(|(_, day)| same_month(*day, month))
            .map(|(amount, _)| amount)
            .sum();
        // Discrete: only jobs starting this month count; end_date plays no part.
        let open_jobs_count = job_starts
            .iter()
            .filter(|(_, start)| same_month(*start, month))
            .count() as u64;
        let total_cost = total_employee_cost + total_job_costs;

        rows.push(MonthlyCost {
            month_date: month_key(month),
            month: month_label(month),
            total_employee_cost,
            total_job_costs,
            total_cost,
            open_jobs_count,
            cost_per_job: safe_divide(total_cost, open_jobs_count as f64, 0.0),
        });
    }

    let unit_costs: BTreeMap<&str, f64> = rows
        .iter()
        .map(|row| (row.month_date.as_str(), row.cost_per_job))
        .collect();

    let mut allocations: Vec<JobAllocation> = job_starts
        .iter()
        .filter_map(|(job, start)| {
            let key = month_key(*start);
            let unit = *unit_costs.get(key.as_str())?;
            Some(JobAllocation {
                job_id: job.id.clone(),
                job_title: job.job_title.clone(),
                client_id: job.client_id.clone(),
                status: job.status,
                start_date: *start,
                end_date: job.end_date.clone(),
                month_date: key,
                total_allocated_cost: unit,
            })
        })
        .collect();
    allocations.sort_by(|a, b| {
        b.start_date
            .cmp(&a.start_date)
            .then_with(|| a.job_id.cmp(&b.job_id))
    });

    log::debug!(
        "Cost series over {}: {} months, {} allocated jobs",
        window.label(),
        rows.len(),
        allocations.len()
    );

    Ok(CostSeries {
        window: window.label(),
        months: rows,
        allocations,
    })
}

pub async fn load_cost_inputs(db: &Database) -> Result<CostInputs> {
    let inputs = db
        .reader()
        .call(|conn| {
            Ok::<CostInputs, rusqlite::Error>(CostInputs {
                jobs: repository::list_jobs(conn)?,
                costs: repository::list_job_costs(conn)?,
                employees: repository::list_employees_with_rates(conn)?,
            })
        })
        .await?;
    Ok(inputs)
}

pub async fn cost_series(
    db: &Database,
    window: &MonthWindow,
    hours: &AdjustedHours,
) -> Result<CostSeries> {
    let inputs = load_cost_inputs(db).await?;
    compute_cost_series(&inputs, hours, window)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn employee(id: &str, rate: f64) -> EmployeeRate {
        EmployeeRate {
            rate_id: None,
            user_id: id.into(),
            name: id.to_uppercase(),
            hourly_rate: rate,
        }
    }

    fn job(id: &str, start: &str) -> Job {
        Job {
            id: id.into(),
            job_title: format!("Job {id}"),
            client_id: None,
            status: JobStatus::Open,
            job_date: Some(start.into()),
            start_date: None,
            end_date: None,
        }
    }

    fn cost(id: &str, amount: f64, date: &str) -> JobCost {
        JobCost {
            id: id.into(),
            job_id: None,
            description: String::new(),
            amount,
            cost_date: date.into(),
        }
    }

    fn single(year: i32, month: u32) -> MonthWindow {
        MonthWindow::Single(year, month)
    }

    #[test]
    fn test_trailing_window_months() {
        let window = MonthWindow::Trailing {
            months: 6,
            as_of: ymd(2025, 3, 17),
        };
        let months = window.months().unwrap();
        assert_eq!(months.len(), 6);
        assert_eq!(months[0], ymd(2024, 10, 1));
        assert_eq!(months[5], ymd(2025, 3, 1));

        let empty = MonthWindow::Trailing {
            months: 0,
            as_of: ymd(2025, 3, 17),
        };
        assert!(empty.months().is_err());
    }

    #[test]
    fn test_oversized_trailing_window_is_rejected() {
        for months in [u32::MAX, i32::MAX as u32] {
            let window = MonthWindow::Trailing {
                months,
                as_of: ymd(2025, 3, 17),
            };
            assert!(matches!(window.months(), Err(Error::InvalidInput(_))));
        }
        assert!(MonthWindow::parse("4294967295").unwrap().months().is_err());
    }

    #[test]
    fn test_window_parse() {
        assert!(matches!(
            MonthWindow::parse("12").unwrap(),
            MonthWindow::Trailing { months: 12, .. }
        ));
        assert_eq!(MonthWindow::parse("2025-06").unwrap(), single(2025, 6));
        assert!(MonthWindow::parse("june").is_err());
    }

    #[test]
    fn test_employee_cost_with_default_hours() {
        let inputs = CostInputs {
            employees: vec![employee("a", 20.0), employee("b", 25.0)],
            ..Default::default()
        };
        let series = compute_cost_series(&inputs, &AdjustedHours::new(), &single(2025, 6)).unwrap();
        let june = series.latest().unwrap();
        // 173.2 × (20 + 25)
        assert!((june.total_employee_cost - 7794.0).abs() < 0.1);
        assert_eq!(june.open_jobs_count, 0);
        assert_eq!(june.cost_per_job, 0.0);
    }

    #[test]
    fn test_adjusted_hours_override_one_employee() {
        let inputs = CostInputs {
            employees: vec![employee("a", 20.0), employee("b", 25.0)],
            ..Default::default()
        };
        let mut hours = AdjustedHours::new();
        hours.set(ymd(2025, 6, 1), "a", 100.0).unwrap();

        let lines = employee_cost_lines(&inputs.employees, &hours, ymd(2025, 6, 1));
        assert_eq!(lines[0].cost, 2000.0);
        assert!(lines[0].adjusted);
        assert!(!lines[1].adjusted);

        let series = compute_cost_series(&inputs, &hours, &single(2025, 6)).unwrap();
        let june = series.latest().unwrap();
        assert!((june.total_employee_cost - (2000.0 + 173.2 * 25.0)).abs() < 1e-6);
    }

    #[test]
    fn test_cost_per_job_split_evenly() {
        let inputs = CostInputs {
            jobs: vec![
                job("j1", "2025-03-03"),
                job("j2", "2025-03-10"),
                job("j3", "2025-03-28"),
            ],
            costs: vec![cost("c1", 5000.0, "2025-03-05"), cost("c2", 4000.0, "2025-03-31")],
            employees: vec![],
        };
        let series = compute_cost_series(&inputs, &AdjustedHours::new(), &single(2025, 3)).unwrap();
        let march = series.latest().unwrap();
        assert_eq!(march.total_cost, 9000.0);
        assert_eq!(march.open_jobs_count, 3);
        assert_eq!(march.cost_per_job, 3000.0);

        assert_eq!(series.allocations.len(), 3);
        assert!(series.allocations.iter().all(|a| a.total_allocated_cost == 3000.0));
        // Start date descending
        assert_eq!(series.allocations[0].job_id, "j3");
        assert_eq!(series.allocations[2].job_id, "j1");
    }

    #[test]
    fn test_open_jobs_are_discrete_per_month() {
        let mut long_running = job("j1", "2025-01-15");
        long_running.end_date = Some("2025-12-31".into());
        let inputs = CostInputs {
            jobs: vec![long_running, job("j2", "2025-02-01")],
            ..Default::default()
        };
        let window = MonthWindow::Trailing {
            months: 3,
            as_of: ymd(2025, 3, 1),
        };
        let series = compute_cost_series(&inputs, &AdjustedHours::new(), &window).unwrap();
        let counts: Vec<u64> = series.months.iter().map(|m| m.open_jobs_count).collect();
        assert_eq!(counts, vec![1, 1, 0]);
        assert_eq!(series.months[0].month, "Jan 2025");
        assert_eq!(series.months[2].month_date, "2025-03-01");
    }

    #[test]
    fn test_jobs_outside_window_not_allocated() {
        let inputs = CostInputs {
            jobs: vec![job("old", "2024-01-10"), job("new", "2025-06-02")],
            costs: vec![cost("c1", 600.0, "2025-06-15"), cost("c2", 999.0, "2024-01-10")],
            employees: vec![],
        };
        let series = compute_cost_series(&inputs, &AdjustedHours::new(), &single(2025, 6)).unwrap();
        assert_eq!(series.allocations.len(), 1);
        assert_eq!(series.allocations[0].job_id, "new");
        assert_eq!(series.allocations[0].total_allocated_cost, 600.0);
        assert_eq!(series.latest().unwrap().total_job_costs, 600.0);
    }

    #[test]
    fn test_bad_dates_are_skipped() {
        let mut legacy = job("legacy", "");
        legacy.start_date = Some("2025-06-09".into());
        let inputs = CostInputs {
            jobs: vec![job("broken", "someday"), legacy],
            costs: vec![cost("c1", 100.0, "not a date"), cost("c2", 50.0, "2025-06-09T10:00:00")],
            employees: vec![],
        };
        let series = compute_cost_series(&inputs, &AdjustedHours::new(), &single(2025, 6)).unwrap();
        let june = series.latest().unwrap();
        // The legacy row falls back to start_date
        assert_eq!(june.open_jobs_count, 1);
        assert_eq!(june.total_job_costs, 50.0);
        assert_eq!(series.allocations[0].job_id, "legacy");
    }

    #[tokio::test]
    async fn test_cost_series_from_database() {
        use crate::access::{Role, User};

        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| {
                repository::upsert_user(
                    conn,
                    &User {
                        id: "a".into(),
                        name: "Ann".into(),
                        email: None,
                        role: Role::User,
                        job_cost_employee: true,
                    },
                )?;
                repository::upsert_employee_rate(conn, "a", 10.0)?;
                repository::upsert_job(conn, &job("j1", "2025-06-02"))?;
                repository::upsert_job(conn, &job("j2", "2025-06-20"))?;
                repository::insert_job_cost(conn, &cost("c1", 268.0, "2025-06-05"))?;
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();

        let series = cost_series(&db, &single(2025, 6), &AdjustedHours::new()).await.unwrap();
        let june = series.latest().unwrap();
        assert!((june.total_cost - 2000.0).abs() < 1e-6);
        assert!((june.cost_per_job - 1000.0).abs() < 1e-6);
        assert_eq!(series.allocations.len(), 2);
    }
}
