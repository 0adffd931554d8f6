//! KPI aggregation: pivot raw entry rows into per-user-per-day records,
//! then roll them up into chart points and summary cards.

pub mod types;

use std::collections::BTreeMap;

pub use types::*;

use crate::calc::{close_rate, safe_divide, trend};
use crate::catalog::{AggregationKind, Catalog};
use crate::date_util::parse_day;
use crate::error::Result;
use crate::query::builder::{EntryQuery, EntryRow};
use crate::storage::Database;

/// Pivot raw rows into one record per (date, user). Rows with an
/// unparseable date or a metric outside the catalog are skipped.
pub fn pivot_entries(rows: &[EntryRow], catalog: &Catalog) -> Pivot {
    let mut records: BTreeMap<(chrono::NaiveDate, String), PivotedEntry> = BTreeMap::new();
    let mut skipped = 0;

    for row in rows {
        let Some(date) = parse_day(&row.date) else {
            log::warn!("Skipping entry {} with unparseable date '{}'", row.id, row.date);
            skipped += 1;
            continue;
        };
        let kpi = row
            .kpi_name
            .as_deref()
            .and_then(|name| catalog.by_name(name))
            .or_else(|| catalog.by_id(&row.kpi_id));
        let Some(kpi) = kpi else {
            log::warn!("Skipping entry {} for unknown metric {}", row.id, row.kpi_id);
            skipped += 1;
            continue;
        };

        let record = records
            .entry((date, row.user_id.clone()))
            .or_insert_with(|| PivotedEntry {
                date,
                user_id: row.user_id.clone(),
                user_name: row.user_name.clone(),
                values: MetricValues::zeroed(catalog.names()),
            });
        record.values.add(&kpi.name, row.value);
    }

    // Newest day first; users stay ascending within a day.
    let mut entries: Vec<PivotedEntry> = records.into_values().collect();
    entries.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.user_id.cmp(&b.user_id)));

    if skipped > 0 {
        log::debug!("Pivoted {} records, skipped {skipped} rows", entries.len());
    }
    Pivot { entries, skipped }
}

/// One point per bucket, oldest first, each metric summed across records.
pub fn chart_series(entries: &[PivotedEntry], group_by: GroupBy, catalog: &Catalog) -> Vec<ChartPoint> {
    let mut buckets: BTreeMap<String, MetricValues> = BTreeMap::new();
    for entry in entries {
        let values = buckets
            .entry(group_by.bucket_key(entry.date))
            .or_insert_with(|| MetricValues::zeroed(catalog.names()));
        for (name, value) in entry.values.iter() {
            values.add(name, value);
        }
    }
    buckets
        .into_iter()
        .map(|(bucket, values)| ChartPoint { bucket, values })
        .collect()
}

/// Plain per-metric sums.
pub fn totals(entries: &[PivotedEntry], catalog: &Catalog) -> MetricValues {
    let mut sums = MetricValues::zeroed(catalog.names());
    for entry in entries {
        for (name, value) in entry.values.iter() {
            sums.add(name, value);
        }
    }
    sums
}

/// Period aggregate per metric: flow metrics summed, stock metrics
/// averaged over the pivoted records.
pub fn aggregate(entries: &[PivotedEntry], catalog: &Catalog) -> MetricValues {
    let sums = totals(entries, catalog);
    let mut out = MetricValues::default();
    for kpi in &catalog.kpis {
        let sum = sums.get(&kpi.name);
        let value = match kpi.aggregation {
            AggregationKind::Flow => sum,
            AggregationKind::Stock => safe_divide(sum, entries.len() as f64, 0.0),
        };
        out.set(&kpi.name, value);
    }
    out
}

pub fn metric_cards(catalog: &Catalog, current: &MetricValues, previous: &MetricValues) -> Vec<MetricCard> {
    catalog
        .kpis
        .iter()
        .map(|kpi| {
            let value = current.get(&kpi.name);
            let prev = previous.get(&kpi.name);
            MetricCard {
                kpi_id: kpi.id.clone(),
                name: kpi.name.clone(),
                sector: kpi.sector.clone(),
                aggregation: kpi.aggregation,
                value,
                previous: prev,
                trend: trend(value, prev),
            }
        })
        .collect()
}

/// Ratio cards from plain totals: Σ numerator / Σ denominator × 100.
pub fn ratio_cards(catalog: &Catalog, current: &MetricValues, previous: &MetricValues) -> Vec<RatioCard> {
    fn name_of_in<'a>(catalog: &'a Catalog, id: &'a str) -> &'a str {
        catalog.by_id(id).map(|k| k.name.as_str()).unwrap_or(id)
    }
    let name_of = |id| name_of_in(catalog, id);
    catalog
        .ratios
        .iter()
        .map(|ratio| {
            let numerator = name_of(&ratio.numerator_kpi_id);
            let denominator = name_of(&ratio.denominator_kpi_id);
            let value = close_rate(current.get(numerator), current.get(denominator));
            let prev = close_rate(previous.get(numerator), previous.get(denominator));
            RatioCard {
                id: ratio.id.clone(),
                name: ratio.name.clone(),
                value,
                previous: prev,
                trend: trend(value, prev),
            }
        })
        .collect()
}

/// Assemble the dashboard from the rows of the current and previous periods.
pub fn build_series(
    request: &SeriesRequest,
    catalog: &Catalog,
    current_rows: &[EntryRow],
    previous_rows: &[EntryRow],
) -> KpiSeries {
    let current = pivot_entries(current_rows, catalog);
    let previous = pivot_entries(previous_rows, catalog);

    let cards = metric_cards(
        catalog,
        &aggregate(&current.entries, catalog),
        &aggregate(&previous.entries, catalog),
    );
    let ratios = ratio_cards(
        catalog,
        &totals(&current.entries, catalog),
        &totals(&previous.entries, catalog),
    );
    let chart = chart_series(&current.entries, request.group_by, catalog);
    let recent_entries = current
        .entries
        .iter()
        .take(request.recent_limit)
        .cloned()
        .collect();

    KpiSeries {
        period: request.period.to_key(),
        previous_period: request.period.previous().to_key(),
        user: request.user.clone(),
        group_by: request.group_by,
        cards,
        ratios,
        chart,
        recent_entries,
        skipped_rows: current.skipped,
    }
}

fn scoped_query(request: &SeriesRequest, period: &crate::query::period::Period) -> EntryQuery {
    let query = EntryQuery::new().period(period);
    match request.user.user_id() {
        Some(user_id) => query.user(user_id),
        None => query,
    }
}

/// Load both periods' rows and compute the dashboard.
pub async fn compute_kpi_series(
    db: &Database,
    catalog: &Catalog,
    request: &SeriesRequest,
) -> Result<KpiSeries> {
    let current_query = scoped_query(request, &request.period);
    let previous_query = scoped_query(request, &request.period.previous());

    let (current_rows, previous_rows) = db
        .reader()
        .call(move |conn| {
            let current = current_query.rows(conn)?;
            let previous = previous_query.rows(conn)?;
            Ok::<_, rusqlite::Error>((current, previous))
        })
        .await?;

    log::debug!(
        "KPI series {} for {}: {} rows, {} previous",
        request.period,
        request.user,
        current_rows.len(),
        previous_rows.len()
    );
    Ok(build_series(request, catalog, &current_rows, &previous_rows))
}
