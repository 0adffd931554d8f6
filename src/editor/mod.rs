//! Per-day KPI entry editing. A save classifies every catalog KPI's form
//! value, plans insert/update/delete writes against what is stored, and
//! runs the writes concurrently.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::catalog::Catalog;
use crate::date_util::format_day;
use crate::error::{Error, Result};
use crate::storage::repository::{self, NewEntry, StoredEntry};
use crate::storage::Database;

/// Stored entries for one (user, date), keyed by KPI id.
pub type LoadedEntries = BTreeMap<String, StoredEntry>;

/// A classified form field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Empty or whitespace: no entry.
    Blank,
    Number(f64),
    /// Unparseable, negative, or non-finite.
    Invalid(String),
}

pub fn parse_form_value(raw: Option<&str>) -> FieldValue {
    let raw = raw.unwrap_or("").trim();
    if raw.is_empty() {
        return FieldValue::Blank;
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => FieldValue::Number(v),
        _ => FieldValue::Invalid(raw.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryWrite {
    Insert(NewEntry),
    Update {
        entry_id: String,
        kpi_id: String,
        value: f64,
        sector: String,
    },
    Delete {
        entry_id: String,
        kpi_id: String,
    },
}

impl EntryWrite {
    pub fn kpi_id(&self) -> &str {
        match self {
            EntryWrite::Insert(e) => &e.kpi_id,
            EntryWrite::Update { kpi_id, .. } | EntryWrite::Delete { kpi_id, .. } => kpi_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SavePlan {
    pub writes: Vec<EntryWrite>,
    /// KPI ids whose form value was rejected.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SaveReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: Vec<String>,
}

/// Decide the writes for one save. A KPI missing from `form` is blank.
pub fn plan_writes(
    user_id: &str,
    date: NaiveDate,
    form: &BTreeMap<String, String>,
    existing: &LoadedEntries,
    catalog: &Catalog,
) -> SavePlan {
    let mut plan = SavePlan::default();
    for kpi in &catalog.kpis {
        let stored = existing.get(&kpi.id);
        match parse_form_value(form.get(&kpi.id).map(String::as_str)) {
            FieldValue::Blank => {
                if let Some(stored) = stored {
                    plan.writes.push(EntryWrite::Delete {
                        entry_id: stored.id.clone(),
                        kpi_id: kpi.id.clone(),
                    });
                }
            }
            FieldValue::Number(value) => match stored {
                Some(stored) => plan.writes.push(EntryWrite::Update {
                    entry_id: stored.id.clone(),
                    kpi_id: kpi.id.clone(),
                    value,
                    sector: kpi.sector.clone(),
                }),
                None => plan.writes.push(EntryWrite::Insert(NewEntry {
                    id: uuid::Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    kpi_id: kpi.id.clone(),
                    date: format_day(date),
                    sector: kpi.sector.clone(),
                    value,
                })),
            },
            FieldValue::Invalid(raw) => {
                log::warn!("Skipping {} for {user_id} on {date}: invalid value '{raw}'", kpi.id);
                plan.skipped.push(kpi.id.clone());
            }
        }
    }
    plan
}

pub async fn load_entries_for(db: &Database, user_id: &str, date: NaiveDate) -> Result<LoadedEntries> {
    let user_id = user_id.to_string();
    let day = format_day(date);
    let rows = db
        .reader()
        .call(move |conn| repository::entries_for_user_date(conn, &user_id, &day))
        .await?;

    let mut loaded = LoadedEntries::new();
    for row in rows {
        if loaded.contains_key(&row.kpi_id) {
            log::warn!("Duplicate entry {} for {} on {date}; keeping the first", row.id, row.kpi_id);
            continue;
        }
        loaded.insert(row.kpi_id.clone(), row);
    }
    Ok(loaded)
}

async fn apply_write(db: Database, write: EntryWrite) -> Result<EntryWrite> {
    let kpi_id = write.kpi_id().to_string();
    let op = write.clone();
    db.writer()
        .call(move |conn| {
            match &op {
                EntryWrite::Insert(entry) => repository::insert_entry(conn, entry)?,
                EntryWrite::Update {
                    entry_id,
                    value,
                    sector,
                    ..
                } => {
                    repository::update_entry(conn, entry_id, *value, sector)?;
                }
                EntryWrite::Delete { entry_id, .. } => {
                    repository::delete_entry_by_id(conn, entry_id)?;
                }
            }
            Ok::<(), rusqlite::Error>(())
        })
        .await
        .map_err(|e| Error::Write {
            kpi_id,
            message: e.to_string(),
        })?;
    Ok(write)
}

/// Save every catalog KPI for one user and day. Writes run concurrently;
/// the first failure fails the save, but writes that already landed stay.
pub async fn save_all(
    db: &Database,
    user_id: &str,
    date: NaiveDate,
    form: &BTreeMap<String, String>,
    catalog: &Catalog,
) -> Result<SaveReport> {
    let existing = load_entries_for(db, user_id, date).await?;
    let plan = plan_writes(user_id, date, form, &existing, catalog);

    let tasks: Vec<JoinHandle<Result<EntryWrite>>> = plan
        .writes
        .into_iter()
        .map(|write| tokio::spawn(apply_write(db.clone(), write)))
        .collect();

    let mut report = SaveReport {
        skipped: plan.skipped,
        ..Default::default()
    };
    let mut first_error: Option<Error> = None;
    for task in tasks {
        let joined = task.await;
        let outcome = joined.map_err(|e| Error::Other(format!("entry write task failed: {e}")));
        match outcome.and_then(|r| r) {
            Ok(EntryWrite::Insert(_)) => report.inserted += 1,
            Ok(EntryWrite::Update { .. }) => report.updated += 1,
            Ok(EntryWrite::Delete { .. }) => report.deleted += 1,
            Err(e) => {
                log::error!("Save for {user_id} on {date} failed: {e}");
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    log::info!(
        "Saved {user_id} {date}: {} inserted, {} updated, {} deleted, {} skipped",
        report.inserted,
        report.updated,
        report.deleted,
        report.skipped.len()
    );
    Ok(report)
}

/// Delete every entry for one user and day. Returns the number removed.
pub async fn delete_entry(db: &Database, user_id: &str, date: NaiveDate) -> Result<usize> {
    let user_id = user_id.to_string();
    let day = format_day(date);
    let removed = db
        .writer()
        .call(move |conn| repository::delete_entries_for_user_date(conn, &user_id, &day))
        .await?;
    log::info!("Deleted {removed} entries on {date}");
    Ok(removed)
}
