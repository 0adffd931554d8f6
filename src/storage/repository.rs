use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::access::{Role, User};
use crate::catalog::{AggregationKind, Catalog, KpiDefinition, RatioDefinition};
use crate::costs::{EmployeeRate, Job, JobCost, JobStatus};

// ── Users ──────────────────────────────────────────────────────────

pub fn upsert_user(conn: &Connection, user: &User) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO users (id, name, email, role, job_cost_employee)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           email = COALESCE(excluded.email, users.email),
           role = excluded.role,
           job_cost_employee = excluded.job_cost_employee",
        params![
            user.id,
            user.name,
            user.email,
            user.role.as_str(),
            user.job_cost_employee as i32
        ],
    )?;
    Ok(())
}

fn user_from_row(row: &Row<'_>) -> Result<User, rusqlite::Error> {
    let role: String = row.get(3)?;
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        // The CHECK constraint only admits 'admin' and 'user'
        role: if role == "admin" { Role::Admin } else { Role::User },
        job_cost_employee: row.get::<_, i32>(4)? != 0,
    })
}

pub fn get_user(conn: &Connection, id: &str) -> Result<Option<User>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, name, email, role, job_cost_employee FROM users WHERE id = ?1",
        params![id],
        user_from_row,
    )
    .optional()
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, name, email, role, job_cost_employee FROM users ORDER BY name, id",
    )?;
    let rows = stmt.query_map([], user_from_row)?;
    rows.collect()
}

/// Resolve a user identifier to an id.
/// Accepts an id, an email, or a (case-insensitive) display name.
/// Returns None if no match is found.
pub fn resolve_user_identifier(
    conn: &Connection,
    identifier: &str,
) -> Result<Option<String>, rusqlite::Error> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Ok(None);
    }
    conn.query_row(
        "SELECT id FROM users
         WHERE id = ?1 OR email = ?1 OR lower(name) = lower(?1)
         ORDER BY CASE WHEN id = ?1 THEN 0 WHEN email = ?1 THEN 1 ELSE 2 END
         LIMIT 1",
        params![identifier],
        |row| row.get(0),
    )
    .optional()
}

// ── KPI catalog ────────────────────────────────────────────────────

fn kpi_from_row(row: &Row<'_>) -> Result<KpiDefinition, rusqlite::Error> {
    let aggregation: String = row.get(3)?;
    Ok(KpiDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        sector: row.get(2)?,
        aggregation: if aggregation == "stock" {
            AggregationKind::Stock
        } else {
            AggregationKind::Flow
        },
        sort_order: row.get(4)?,
    })
}

pub fn load_catalog(conn: &Connection) -> Result<Catalog, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, name, sector, aggregation, sort_order FROM kpis ORDER BY sort_order, name",
    )?;
    let kpis: Vec<KpiDefinition> = stmt
        .query_map([], kpi_from_row)?
        .collect::<Result<_, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, name, numerator_kpi_id, denominator_kpi_id
         FROM kpi_ratios ORDER BY sort_order, name",
    )?;
    let ratios: Vec<RatioDefinition> = stmt
        .query_map([], |row| {
            Ok(RatioDefinition {
                id: row.get(0)?,
                name: row.get(1)?,
                numerator_kpi_id: row.get(2)?,
                denominator_kpi_id: row.get(3)?,
            })
        })?
        .collect::<Result<_, _>>()?;

    Ok(Catalog::new(kpis, ratios))
}

/// The catalog as seen by one user: their assigned KPIs, or everything
/// when nothing is assigned.
pub fn load_catalog_for_user(conn: &Connection, user_id: &str) -> Result<Catalog, rusqlite::Error> {
    let catalog = load_catalog(conn)?;
    let assigned = list_user_kpi_ids(conn, user_id)?;
    Ok(catalog.restricted_to(&assigned))
}

/// Insert a new KPI. Returns false without writing when its id or name
/// is already taken.
pub fn insert_kpi(conn: &Connection, kpi: &KpiDefinition) -> Result<bool, rusqlite::Error> {
    let inserted = conn.execute(
        "INSERT INTO kpis (id, name, sector, aggregation, sort_order)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT DO NOTHING",
        params![
            kpi.id,
            kpi.name,
            kpi.sector,
            kpi.aggregation.as_str(),
            kpi.sort_order
        ],
    )?;
    Ok(inserted == 1)
}

pub fn next_kpi_sort_order(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.query_row("SELECT COALESCE(MAX(sort_order) + 1, 0) FROM kpis", [], |row| {
        row.get(0)
    })
}

pub fn upsert_ratio(conn: &Connection, ratio: &RatioDefinition) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO kpi_ratios (id, name, numerator_kpi_id, denominator_kpi_id, sort_order)
         VALUES (?1, ?2, ?3, ?4, (SELECT COALESCE(MAX(sort_order) + 1, 0) FROM kpi_ratios))
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           numerator_kpi_id = excluded.numerator_kpi_id,
           denominator_kpi_id = excluded.denominator_kpi_id",
        params![
            ratio.id,
            ratio.name,
            ratio.numerator_kpi_id,
            ratio.denominator_kpi_id
        ],
    )?;
    Ok(())
}

pub fn assign_user_kpi(conn: &Connection, user_id: &str, kpi_id: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR IGNORE INTO user_kpis (user_id, kpi_id) VALUES (?1, ?2)",
        params![user_id, kpi_id],
    )?;
    Ok(())
}

pub fn list_user_kpi_ids(conn: &Connection, user_id: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT uk.kpi_id FROM user_kpis uk
         JOIN kpis k ON k.id = uk.kpi_id
         WHERE uk.user_id = ?1
         ORDER BY k.sort_order",
    )?;
    let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
    rows.collect()
}

// ── KPI entries ────────────────────────────────────────────────────

/// An existing entry row for one (user, date).
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub id: String,
    pub kpi_id: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub id: String,
    pub user_id: String,
    pub kpi_id: String,
    pub date: String,
    pub sector: String,
    pub value: f64,
}

pub fn entries_for_user_date(
    conn: &Connection,
    user_id: &str,
    date: &str,
) -> Result<Vec<StoredEntry>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, kpi_id, value FROM kpi_entries
         WHERE user_id = ?1 AND date = ?2
         ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map(params![user_id, date], |row| {
        Ok(StoredEntry {
            id: row.get(0)?,
            kpi_id: row.get(1)?,
            value: row.get(2)?,
        })
    })?;
    rows.collect()
}

pub fn insert_entry(conn: &Connection, entry: &NewEntry) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO kpi_entries (id, user_id, kpi_id, date, sector, value)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.id,
            entry.user_id,
            entry.kpi_id,
            entry.date,
            entry.sector,
            entry.value
        ],
    )?;
    Ok(())
}

pub fn update_entry(
    conn: &Connection,
    entry_id: &str,
    value: f64,
    sector: &str,
) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "UPDATE kpi_entries SET value = ?2, sector = ?3, updated_at = datetime('now')
         WHERE id = ?1",
        params![entry_id, value, sector],
    )
}

pub fn delete_entry_by_id(conn: &Connection, entry_id: &str) -> Result<usize, rusqlite::Error> {
    conn.execute("DELETE FROM kpi_entries WHERE id = ?1", params![entry_id])
}

pub fn delete_entries_for_user_date(
    conn: &Connection,
    user_id: &str,
    date: &str,
) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "DELETE FROM kpi_entries WHERE user_id = ?1 AND date = ?2",
        params![user_id, date],
    )
}

// ── Jobs & costs ───────────────────────────────────────────────────

pub fn upsert_job(conn: &Connection, job: &Job) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO jobs (id, job_title, client_id, status, job_date, start_date, end_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
           job_title = excluded.job_title, client_id = excluded.client_id,
           status = excluded.status, job_date = excluded.job_date,
           start_date = excluded.start_date, end_date = excluded.end_date",
        params![
            job.id,
            job.job_title,
            job.client_id,
            job.status.as_str(),
            job.job_date,
            job.start_date,
            job.end_date
        ],
    )?;
    Ok(())
}

/// All jobs, most recent start first.
pub fn list_jobs(conn: &Connection) -> Result<Vec<Job>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, job_title, client_id, status, job_date, start_date, end_date
         FROM jobs
         ORDER BY COALESCE(job_date, start_date) DESC, id",
    )?;
    let rows = stmt.query_map([], |row| {
        let status: String = row.get(3)?;
        Ok(Job {
            id: row.get(0)?,
            job_title: row.get(1)?,
            client_id: row.get(2)?,
            status: if status == "closed" {
                JobStatus::Closed
            } else {
                JobStatus::Open
            },
            job_date: row.get(4)?,
            start_date: row.get(5)?,
            end_date: row.get(6)?,
        })
    })?;
    rows.collect()
}

pub fn insert_job_cost(conn: &Connection, cost: &JobCost) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO job_costs (id, job_id, description, amount, cost_date)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            cost.id,
            cost.job_id,
            cost.description,
            cost.amount,
            cost.cost_date
        ],
    )?;
    Ok(())
}

/// All operational costs, most recent first.
pub fn list_job_costs(conn: &Connection) -> Result<Vec<JobCost>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, job_id, description, amount, cost_date FROM job_costs
         ORDER BY cost_date DESC, id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(JobCost {
            id: row.get(0)?,
            job_id: row.get(1)?,
            description: row.get(2)?,
            amount: row.get(3)?,
            cost_date: row.get(4)?,
        })
    })?;
    rows.collect()
}

// ── Employee rates ─────────────────────────────────────────────────

/// Insert or update the single rate row for a user. Returns the row id.
pub fn upsert_employee_rate(
    conn: &Connection,
    user_id: &str,
    hourly_rate: f64,
) -> Result<String, rusqlite::Error> {
    let new_id = uuid::Uuid::new_v4().to_string();
    conn.query_row(
        "INSERT INTO employee_hourly_rates (id, user_id, hourly_rate)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET
           hourly_rate = excluded.hourly_rate,
           updated_at = datetime('now')
         RETURNING id",
        params![new_id, user_id, hourly_rate],
        |row| row.get(0),
    )
}

/// Cost-bearing employees joined with their rate (0 when unset).
pub fn list_employees_with_rates(conn: &Connection) -> Result<Vec<EmployeeRate>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT r.id, u.id, u.name, COALESCE(r.hourly_rate, 0)
         FROM users u
         LEFT JOIN employee_hourly_rates r ON r.user_id = u.id
         WHERE u.job_cost_employee = 1
         ORDER BY u.name, u.id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(EmployeeRate {
            rate_id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            hourly_rate: row.get(3)?,
        })
    })?;
    rows.collect()
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Status ─────────────────────────────────────────────────────────

/// Row counts for the status overview.
pub fn table_counts(conn: &Connection) -> Result<Vec<(&'static str, i64)>, rusqlite::Error> {
    let mut counts = Vec::new();
    for table in ["users", "kpis", "kpi_entries", "jobs", "job_costs", "employee_hourly_rates"] {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;
        counts.push((table, n));
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    fn user(id: &str, name: &str, role: Role, employee: bool) -> User {
        User {
            id: id.to_string(),
            name: name.to_string(),
            email: None,
            role,
            job_cost_employee: employee,
        }
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                set_config(conn, "current_user", "u1")?;
                assert_eq!(get_config(conn, "current_user")?, Some("u1".to_string()));

                set_config(conn, "current_user", "u2")?;
                assert_eq!(get_config(conn, "current_user")?, Some("u2".to_string()));

                assert_eq!(get_config(conn, "missing")?, None);
                assert_eq!(list_config(conn)?.len(), 1);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_user_round_trip_and_resolution() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let mut alice = user("u1", "Alice Smith", Role::User, true);
                alice.email = Some("alice@example.com".into());
                upsert_user(conn, &alice)?;

                let loaded = get_user(conn, "u1")?.unwrap();
                assert_eq!(loaded, alice);

                assert_eq!(resolve_user_identifier(conn, "u1")?, Some("u1".into()));
                assert_eq!(
                    resolve_user_identifier(conn, "alice@example.com")?,
                    Some("u1".into())
                );
                assert_eq!(
                    resolve_user_identifier(conn, "alice smith")?,
                    Some("u1".into())
                );
                assert_eq!(resolve_user_identifier(conn, "nobody")?, None);

                // Upsert without email keeps the stored one
                upsert_user(conn, &user("u1", "Alice S.", Role::Admin, true))?;
                let loaded = get_user(conn, "u1")?.unwrap();
                assert_eq!(loaded.name, "Alice S.");
                assert_eq!(loaded.role, Role::Admin);
                assert_eq!(loaded.email.as_deref(), Some("alice@example.com"));
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rate_upsert_keeps_one_row_per_user() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                upsert_user(conn, &user("a", "Ann", Role::User, true))?;
                upsert_user(conn, &user("b", "Bob", Role::User, true))?;
                upsert_user(conn, &user("c", "Cat", Role::User, false))?;

                let first = upsert_employee_rate(conn, "a", 20.0)?;
                let second = upsert_employee_rate(conn, "a", 22.5)?;
                assert_eq!(first, second);

                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM employee_hourly_rates WHERE user_id = 'a'",
                    [],
                    |row| row.get(0),
                )?;
                assert_eq!(count, 1);

                let employees = list_employees_with_rates(conn)?;
                // Cat is not a cost-bearing employee
                assert_eq!(employees.len(), 2);
                assert_eq!(employees[0].user_id, "a");
                assert_eq!(employees[0].hourly_rate, 22.5);
                // Bob has no rate row yet
                assert_eq!(employees[1].hourly_rate, 0.0);
                assert!(employees[1].rate_id.is_none());
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_entry_crud() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                insert_entry(
                    conn,
                    &NewEntry {
                        id: "e1".into(),
                        user_id: "u1".into(),
                        kpi_id: "calls_made".into(),
                        date: "2025-06-02".into(),
                        sector: "Prospecting".into(),
                        value: 25.0,
                    },
                )?;
                insert_entry(
                    conn,
                    &NewEntry {
                        id: "e2".into(),
                        user_id: "u1".into(),
                        kpi_id: "closes".into(),
                        date: "2025-06-02".into(),
                        sector: "Prospecting".into(),
                        value: 1.0,
                    },
                )?;

                assert_eq!(entries_for_user_date(conn, "u1", "2025-06-02")?.len(), 2);
                assert_eq!(update_entry(conn, "e1", 30.0, "Prospecting")?, 1);
                let entries = entries_for_user_date(conn, "u1", "2025-06-02")?;
                assert_eq!(entries[0].value, 30.0);

                assert_eq!(delete_entry_by_id(conn, "e2")?, 1);
                assert_eq!(delete_entries_for_user_date(conn, "u1", "2025-06-02")?, 1);
                assert!(entries_for_user_date(conn, "u1", "2025-06-02")?.is_empty());
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_catalog_for_user_honours_assignment() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                upsert_user(conn, &user("u1", "Ann", Role::User, false))?;
                assert_eq!(load_catalog_for_user(conn, "u1")?.kpis.len(), 7);

                assign_user_kpi(conn, "u1", "calls_made")?;
                assign_user_kpi(conn, "u1", "closes")?;
                assign_user_kpi(conn, "u1", "closes")?;
                let catalog = load_catalog_for_user(conn, "u1")?;
                assert_eq!(catalog.kpis.len(), 2);
                // PCL survives, Req. Close Rate does not
                assert_eq!(catalog.ratios.len(), 1);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_jobs_sorted_by_start_desc() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                for (id, date) in [("j1", "2025-01-10"), ("j2", "2025-03-05"), ("j3", "2025-02-01")] {
                    upsert_job(
                        conn,
                        &Job {
                            id: id.into(),
                            job_title: format!("Job {id}"),
                            client_id: None,
                            status: JobStatus::Open,
                            job_date: Some(date.into()),
                            start_date: None,
                            end_date: None,
                        },
                    )?;
                }
                let ids: Vec<String> = list_jobs(conn)?.into_iter().map(|j| j.id).collect();
                assert_eq!(ids, vec!["j2", "j3", "j1"]);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }
}
