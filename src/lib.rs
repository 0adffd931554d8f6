pub mod access;
pub mod calc;
pub mod catalog;
pub mod costs;
pub mod date_util;
pub mod editor;
pub mod error;
pub mod metrics;
pub mod query;
pub mod settings;
pub mod storage;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

pub use access::{Role, User, UserFilter, Viewer};
pub use catalog::{AggregationKind, Catalog, KpiDefinition, RatioDefinition};
pub use costs::{
    AdjustedHours, CostSeries, EmployeeCostLine, EmployeeRate, Job, JobCost, JobStatus,
    MonthWindow,
};
pub use editor::{LoadedEntries, SaveReport};
pub use error::{Error, Result};
pub use metrics::{GroupBy, KpiSeries, SeriesRequest};
pub use query::builder::{EntryQuery, EntryRow};
pub use query::period::Period;
pub use settings::ReportSettings;
pub use storage::Database;

use storage::repository;

static RE_SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

fn slugify(name: &str) -> String {
    RE_SLUG
        .replace_all(&name.trim().to_lowercase(), "_")
        .trim_matches('_')
        .to_string()
}

/// Main entry point for KPI and job-cost reporting.
pub struct KpiBoard {
    db: Database,
}

impl KpiBoard {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    // ── Identity ───────────────────────────────────────────────────

    /// Load the acting identity for a user id, email, or name.
    pub async fn viewer(&self, identifier: &str) -> Result<Viewer> {
        let user_id = self.resolve_user(identifier).await?;
        let user = self
            .db
            .reader()
            .call(move |conn| repository::get_user(conn, &user_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("user '{identifier}'")))?;
        Ok(Viewer::from(user))
    }

    /// Resolve a user id, email, or display name to a user id.
    pub async fn resolve_user(&self, identifier: &str) -> Result<String> {
        let ident = identifier.to_string();
        self.db
            .reader()
            .call(move |conn| repository::resolve_user_identifier(conn, &ident))
            .await?
            .ok_or_else(|| Error::NotFound(format!("user '{identifier}'")))
    }

    pub async fn settings(&self) -> Result<ReportSettings> {
        let pairs = self.config_list().await?;
        Ok(ReportSettings::from_pairs(&pairs))
    }

    // ── KPI reporting ──────────────────────────────────────────────

    /// Dashboard cards, ratios, chart and recent entries. Non-admins only
    /// ever see their own entries.
    pub async fn kpi_series(&self, viewer: &Viewer, request: &SeriesRequest) -> Result<KpiSeries> {
        let scoped = SeriesRequest {
            user: access::scope_user_filter(viewer, &request.user),
            ..request.clone()
        };
        let catalog = self.full_catalog().await?;
        metrics::compute_kpi_series(&self.db, &catalog, &scoped).await
    }

    /// Raw entry rows for the history view, scoped like the dashboard.
    pub async fn entry_history(
        &self,
        viewer: &Viewer,
        user: &UserFilter,
        query: EntryQuery,
    ) -> Result<Vec<EntryRow>> {
        let query = match access::scope_user_filter(viewer, user) {
            UserFilter::User(id) => query.user(&id),
            UserFilter::All => query,
        };
        query.entries(&self.db).await
    }

    // ── Entry editing ──────────────────────────────────────────────

    pub async fn load_entry(&self, viewer: &Viewer, user_id: &str, date: NaiveDate) -> Result<LoadedEntries> {
        access::require_self_or_admin(viewer, user_id)?;
        editor::load_entries_for(&self.db, user_id, date).await
    }

    /// Save one day's values for a user, keyed by KPI id.
    pub async fn save_entry(
        &self,
        viewer: &Viewer,
        user_id: &str,
        date: NaiveDate,
        values: &BTreeMap<String, String>,
    ) -> Result<SaveReport> {
        access::require_self_or_admin(viewer, user_id)?;
        let catalog = self.catalog_for(user_id).await?;
        editor::save_all(&self.db, user_id, date, values, &catalog).await
    }

    pub async fn delete_entry(&self, viewer: &Viewer, user_id: &str, date: NaiveDate) -> Result<usize> {
        access::require_self_or_admin(viewer, user_id)?;
        editor::delete_entry(&self.db, user_id, date).await
    }

    // ── Costs ──────────────────────────────────────────────────────

    pub async fn cost_series(
        &self,
        viewer: &Viewer,
        window: &MonthWindow,
        hours: &AdjustedHours,
    ) -> Result<CostSeries> {
        access::require_admin(viewer, "view job costs")?;
        costs::cost_series(&self.db, window, hours).await
    }

    pub async fn employee_cost_lines(
        &self,
        viewer: &Viewer,
        month: NaiveDate,
        hours: &AdjustedHours,
    ) -> Result<Vec<EmployeeCostLine>> {
        access::require_admin(viewer, "view employee costs")?;
        let inputs = costs::load_cost_inputs(&self.db).await?;
        Ok(costs::employee_cost_lines(&inputs.employees, hours, month))
    }

    pub async fn update_employee_rate(&self, viewer: &Viewer, user_id: &str, rate: f64) -> Result<()> {
        access::require_admin(viewer, "edit hourly rates")?;
        if !rate.is_finite() || rate < 0.0 {
            return Err(Error::InvalidInput(format!(
                "hourly rate must be a non-negative number, got {rate}"
            )));
        }
        let user_id = user_id.to_string();
        let rate_id = self
            .db
            .writer()
            .call({
                let user_id = user_id.clone();
                move |conn| -> std::result::Result<Option<String>, rusqlite::Error> {
                    if repository::get_user(conn, &user_id)?.is_none() {
                        return Ok(None);
                    }
                    repository::upsert_employee_rate(conn, &user_id, rate).map(Some)
                }
            })
            .await?
            .ok_or_else(|| Error::NotFound(format!("user '{user_id}'")))?;
        log::info!("Set hourly rate for {user_id} to {rate} ({rate_id})");
        Ok(())
    }

    // ── Catalog ────────────────────────────────────────────────────

    pub async fn full_catalog(&self) -> Result<Catalog> {
        let catalog = self
            .db
            .reader()
            .call(|conn| repository::load_catalog(conn))
            .await?;
        Ok(catalog)
    }

    /// The KPIs a user tracks: their assignments, or the full catalog.
    pub async fn catalog_for(&self, user_id: &str) -> Result<Catalog> {
        let user_id = user_id.to_string();
        let catalog = self
            .db
            .reader()
            .call(move |conn| repository::load_catalog_for_user(conn, &user_id))
            .await?;
        Ok(catalog)
    }

    pub async fn add_kpi(
        &self,
        viewer: &Viewer,
        name: &str,
        sector: &str,
        aggregation: AggregationKind,
    ) -> Result<KpiDefinition> {
        access::require_admin(viewer, "manage the KPI catalog")?;
        let id = slugify(name);
        if id.is_empty() || sector.trim().is_empty() {
            return Err(Error::InvalidInput("KPI name and sector are required".into()));
        }
        let draft = KpiDefinition {
            id,
            name: name.trim().to_string(),
            sector: sector.trim().to_string(),
            aggregation,
            sort_order: 0,
        };
        let (id, name) = (draft.id.clone(), draft.name.clone());
        let kpi = self
            .db
            .writer()
            .call(move |conn| -> std::result::Result<Option<KpiDefinition>, rusqlite::Error> {
                let mut kpi = draft;
                kpi.sort_order = repository::next_kpi_sort_order(conn)?;
                Ok(repository::insert_kpi(conn, &kpi)?.then_some(kpi))
            })
            .await?
            .ok_or_else(|| Error::InvalidInput(format!("KPI '{name}' (id '{id}') already exists")))?;
        log::info!("Added KPI {} ({})", kpi.name, kpi.aggregation);
        Ok(kpi)
    }

    pub async fn add_ratio(
        &self,
        viewer: &Viewer,
        name: &str,
        numerator: &str,
        denominator: &str,
    ) -> Result<RatioDefinition> {
        access::require_admin(viewer, "manage the KPI catalog")?;
        let catalog = self.full_catalog().await?;
        let lookup = |key: &str| {
            catalog
                .resolve(key)
                .map(|k| k.id.clone())
                .ok_or_else(|| Error::NotFound(format!("KPI '{key}'")))
        };
        let ratio = RatioDefinition {
            id: slugify(name),
            name: name.trim().to_string(),
            numerator_kpi_id: lookup(numerator)?,
            denominator_kpi_id: lookup(denominator)?,
        };
        if ratio.id.is_empty() {
            return Err(Error::InvalidInput("ratio name is required".into()));
        }
        let stored = ratio.clone();
        self.db
            .writer()
            .call(move |conn| repository::upsert_ratio(conn, &stored))
            .await?;
        Ok(ratio)
    }

    pub async fn assign_kpi(&self, viewer: &Viewer, user_id: &str, kpi: &str) -> Result<String> {
        access::require_admin(viewer, "assign KPIs")?;
        let kpi_id = self
            .full_catalog()
            .await?
            .resolve(kpi)
            .map(|k| k.id.clone())
            .ok_or_else(|| Error::NotFound(format!("KPI '{kpi}'")))?;
        let user_id = user_id.to_string();
        let assigned = kpi_id.clone();
        self.db
            .writer()
            .call(move |conn| repository::assign_user_kpi(conn, &user_id, &assigned))
            .await?;
        Ok(kpi_id)
    }

    // ── Users ──────────────────────────────────────────────────────

    /// Add or update a user. The very first user may be added without an
    /// acting admin so a fresh database can be bootstrapped.
    pub async fn add_user(&self, viewer: Option<&Viewer>, user: User) -> Result<User> {
        let existing = self.list_users().await?;
        match viewer {
            Some(v) => access::require_admin(v, "manage users")?,
            None if existing.is_empty() => {
                log::info!("Bootstrapping first user {}", user.id);
            }
            None => {
                return Err(Error::Forbidden(
                    "an administrator is required to add users".into(),
                ))
            }
        }
        if user.id.trim().is_empty() || user.name.trim().is_empty() {
            return Err(Error::InvalidInput("user id and name are required".into()));
        }
        let stored = user.clone();
        self.db
            .writer()
            .call(move |conn| repository::upsert_user(conn, &stored))
            .await?;
        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let users = self
            .db
            .reader()
            .call(|conn| repository::list_users(conn))
            .await?;
        Ok(users)
    }

    // ── Jobs & expenses ────────────────────────────────────────────

    pub async fn add_job(&self, viewer: &Viewer, mut job: Job) -> Result<Job> {
        access::require_admin(viewer, "manage jobs")?;
        if job.job_title.trim().is_empty() {
            return Err(Error::InvalidInput("job title is required".into()));
        }
        if job.id.is_empty() {
            job.id = uuid::Uuid::new_v4().to_string();
        }
        let stored = job.clone();
        self.db
            .writer()
            .call(move |conn| repository::upsert_job(conn, &stored))
            .await?;
        Ok(job)
    }

    pub async fn list_jobs(&self, viewer: &Viewer) -> Result<Vec<Job>> {
        access::require_admin(viewer, "view jobs")?;
        let jobs = self
            .db
            .reader()
            .call(|conn| repository::list_jobs(conn))
            .await?;
        Ok(jobs)
    }

    pub async fn add_expense(&self, viewer: &Viewer, mut cost: JobCost) -> Result<JobCost> {
        access::require_admin(viewer, "record job costs")?;
        if !cost.amount.is_finite() {
            return Err(Error::InvalidInput(format!("invalid amount {}", cost.amount)));
        }
        if date_util::parse_day(&cost.cost_date).is_none() {
            return Err(Error::InvalidInput(format!("invalid cost date '{}'", cost.cost_date)));
        }
        if cost.id.is_empty() {
            cost.id = uuid::Uuid::new_v4().to_string();
        }
        let stored = cost.clone();
        self.db
            .writer()
            .call(move |conn| repository::insert_job_cost(conn, &stored))
            .await?;
        Ok(cost)
    }

    pub async fn list_expenses(&self, viewer: &Viewer) -> Result<Vec<JobCost>> {
        access::require_admin(viewer, "view job costs")?;
        let costs = self
            .db
            .reader()
            .call(|conn| repository::list_job_costs(conn))
            .await?;
        Ok(costs)
    }

    // ── Status & config ────────────────────────────────────────────

    pub async fn status(&self) -> Result<Vec<(&'static str, i64)>> {
        let counts = self
            .db
            .reader()
            .call(|conn| repository::table_counts(conn))
            .await?;
        Ok(counts)
    }

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Store a setting. Values for known keys are validated first.
    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        settings::validate(key, value)?;
        self.db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}
