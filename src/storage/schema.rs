use rusqlite::params;

/// Default KPI catalog: (id, name, sector, aggregation).
const DEFAULT_KPIS: &[(&str, &str, &str, &str)] = &[
    ("calls_made", "Calls Made", "Prospecting", "flow"),
    ("meetings_set", "Meetings Set", "Prospecting", "flow"),
    ("meetings_completed", "Meetings Completed", "Prospecting", "flow"),
    ("closes", "Closes", "Prospecting", "flow"),
    ("open_requisitions", "Open Requisitions", "RAR", "stock"),
    ("closed_job_reqs", "Closed Job Reqs", "RAR", "flow"),
    ("vip_list", "VIP List", "RAR", "stock"),
];

/// Default ratio metrics: (id, name, numerator, denominator).
const DEFAULT_RATIOS: &[(&str, &str, &str, &str)] = &[
    ("req_close_rate", "Req. Close Rate", "closed_job_reqs", "open_requisitions"),
    ("pcl", "PCL", "closes", "calls_made"),
];

/// Populate the KPI catalog with the default metrics.
/// Called on DB open; does nothing once any KPI exists.
pub fn ensure_default_catalog(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM kpis", [], |row| row.get(0))?;
    if existing > 0 {
        return Ok(());
    }

    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO kpis (id, name, sector, aggregation, sort_order)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (i, (id, name, sector, aggregation)) in DEFAULT_KPIS.iter().enumerate() {
        stmt.execute(params![id, name, sector, aggregation, i as i64])?;
    }

    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO kpi_ratios (id, name, numerator_kpi_id, denominator_kpi_id, sort_order)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (i, (id, name, numerator, denominator)) in DEFAULT_RATIOS.iter().enumerate() {
        stmt.execute(params![id, name, numerator, denominator, i as i64])?;
    }

    log::info!(
        "Seeded default KPI catalog ({} metrics, {} ratios)",
        DEFAULT_KPIS.len(),
        DEFAULT_RATIOS.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::catalog::AggregationKind;
    use crate::storage::{repository, Database};

    #[tokio::test]
    async fn test_default_catalog_seeded() {
        let db = Database::open_memory().await.unwrap();

        let catalog = db
            .reader()
            .call(|conn| repository::load_catalog(conn))
            .await
            .unwrap();

        assert_eq!(catalog.kpis.len(), 7);
        assert_eq!(catalog.kpis[0].id, "calls_made");
        assert_eq!(
            catalog.by_id("open_requisitions").unwrap().aggregation,
            AggregationKind::Stock
        );
        assert_eq!(catalog.by_id("closes").unwrap().aggregation, AggregationKind::Flow);
        assert_eq!(catalog.ratios.len(), 2);
    }

    #[tokio::test]
    async fn test_seeding_skips_existing_catalog() {
        let db = Database::open_memory().await.unwrap();

        let count: i64 = db
            .writer()
            .call(|conn| {
                conn.execute("DELETE FROM kpis WHERE id != 'calls_made'", [])?;
                super::ensure_default_catalog(conn)?;
                conn.query_row("SELECT COUNT(*) FROM kpis", [], |row| row.get(0))
            })
            .await
            .unwrap();

        assert_eq!(count, 1);
    }
}
