use rusqlite::Connection;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::query::period::Period;
use crate::storage::Database;

/// A raw KPI entry joined with its user and KPI names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryRow {
    pub id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub kpi_id: String,
    pub kpi_name: Option<String>,
    pub sector: String,
    pub date: String,
    pub value: f64,
}

/// Builder for filtered selects over `kpi_entries`.
#[derive(Debug, Clone, Default)]
pub struct EntryQuery {
    user_id: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    sector: Option<String>,
    kpi_id: Option<String>,
    limit: Option<u32>,
    order_desc: bool,
}

impl EntryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn date_from(mut self, date: &str) -> Self {
        self.date_from = Some(date.to_string());
        self
    }

    pub fn date_to(mut self, date: &str) -> Self {
        self.date_to = Some(date.to_string());
        self
    }

    /// Restrict to the inclusive day range of a period.
    pub fn period(self, period: &Period) -> Self {
        let (from, to) = period.date_strings();
        self.date_from(&from).date_to(&to)
    }

    pub fn sector(mut self, sector: &str) -> Self {
        self.sector = Some(sector.to_string());
        self
    }

    pub fn kpi(mut self, kpi_id: &str) -> Self {
        self.kpi_id = Some(kpi_id.to_string());
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn descending(mut self) -> Self {
        self.order_desc = true;
        self
    }

    /// Run the query on a borrowed connection.
    pub fn rows(&self, conn: &Connection) -> std::result::Result<Vec<EntryRow>, rusqlite::Error> {
        let (sql, params) = self.build_sql();
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(EntryRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                user_name: row.get(2)?,
                kpi_id: row.get(3)?,
                kpi_name: row.get(4)?,
                sector: row.get(5)?,
                date: row.get(6)?,
                value: row.get(7)?,
            })
        })?;
        rows.collect()
    }

    /// Build and execute the query, returning entry rows.
    pub async fn entries(self, db: &Database) -> Result<Vec<EntryRow>> {
        let builder = self;
        db.reader()
            .call(move |conn| builder.rows(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Build and execute the query, returning results as JSON.
    pub async fn to_json(self, db: &Database) -> Result<String> {
        let rows = self.entries(db).await?;
        serde_json::to_string_pretty(&rows).map_err(|e| Error::Other(e.to_string()))
    }

    /// Build and execute the query, returning results as CSV.
    pub async fn to_csv(self, db: &Database) -> Result<String> {
        let rows = self.entries(db).await?;
        Ok(rows_to_csv(&rows))
    }

    fn build_sql(&self) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut wheres = Vec::new();
        let mut param_idx = 1;

        let select = "SELECT e.id, e.user_id, u.name AS user_name, e.kpi_id,
                k.name AS kpi_name, e.sector, e.date, e.value
            FROM kpi_entries e
            LEFT JOIN users u ON u.id = e.user_id
            LEFT JOIN kpis k ON k.id = e.kpi_id";

        if let Some(ref id) = self.user_id {
            wheres.push(format!("e.user_id = ?{param_idx}"));
            params.push(Box::new(id.clone()));
            param_idx += 1;
        }

        // Compare the day prefix so a stored timestamp still falls on its day
        if let Some(ref date) = self.date_from {
            wheres.push(format!("substr(e.date, 1, 10) >= ?{param_idx}"));
            params.push(Box::new(date.clone()));
            param_idx += 1;
        }
        if let Some(ref date) = self.date_to {
            wheres.push(format!("substr(e.date, 1, 10) <= ?{param_idx}"));
            params.push(Box::new(date.clone()));
            param_idx += 1;
        }

        if let Some(ref sector) = self.sector {
            wheres.push(format!("e.sector = ?{param_idx}"));
            params.push(Box::new(sector.clone()));
            param_idx += 1;
        }

        if let Some(ref kpi) = self.kpi_id {
            wheres.push(format!("e.kpi_id = ?{param_idx}"));
            params.push(Box::new(kpi.clone()));
            param_idx += 1;
        }

        let mut sql = select.to_string();
        if !wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&wheres.join(" AND "));
        }

        let order_dir = if self.order_desc { "DESC" } else { "ASC" };
        sql.push_str(&format!(
            " ORDER BY e.date {order_dir}, e.user_id, k.sort_order, e.kpi_id"
        ));

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT ?{param_idx}"));
            params.push(Box::new(limit));
        }

        (sql, params)
    }
}

pub fn rows_to_csv(rows: &[EntryRow]) -> String {
    let mut out = String::new();
    out.push_str("id,date,user_id,user_name,kpi_id,kpi_name,sector,value\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            csv_escape(&row.id),
            csv_escape(&row.date),
            csv_escape(&row.user_id),
            csv_escape(row.user_name.as_deref().unwrap_or("")),
            csv_escape(&row.kpi_id),
            csv_escape(row.kpi_name.as_deref().unwrap_or("")),
            csv_escape(&row.sector),
            row.value,
        ));
    }
    out
}

pub(crate) fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::{self, NewEntry};

    #[test]
    fn test_build_sql_default() {
        let (sql, params) = EntryQuery::new().build_sql();
        assert!(sql.contains("FROM kpi_entries e"));
        assert!(!sql.contains("WHERE"));
        assert!(sql.contains("ORDER BY e.date ASC"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_build_sql_filters_are_numbered() {
        let (sql, params) = EntryQuery::new()
            .user("u1")
            .date_from("2025-06-01")
            .date_to("2025-06-30")
            .kpi("closes")
            .limit(10)
            .descending()
            .build_sql();
        assert!(sql.contains("e.user_id = ?1"));
        assert!(sql.contains("substr(e.date, 1, 10) >= ?2"));
        assert!(sql.contains("substr(e.date, 1, 10) <= ?3"));
        assert!(sql.contains("e.kpi_id = ?4"));
        assert!(sql.contains("LIMIT ?5"));
        assert!(sql.contains("ORDER BY e.date DESC"));
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    async fn seeded_db() -> Database {
        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| {
                for (id, user, kpi, date, value) in [
                    ("e1", "u1", "calls_made", "2025-06-01", 10.0),
                    ("e2", "u1", "closes", "2025-06-01", 1.0),
                    ("e3", "u2", "calls_made", "2025-06-02", 7.0),
                    ("e4", "u1", "calls_made", "2025-07-01", 4.0),
                ] {
                    repository::insert_entry(
                        conn,
                        &NewEntry {
                            id: id.into(),
                            user_id: user.into(),
                            kpi_id: kpi.into(),
                            date: date.into(),
                            sector: "Prospecting".into(),
                            value,
                        },
                    )?;
                }
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_entries_filtered_by_period_and_user() {
        let db = seeded_db().await;

        let rows = EntryQuery::new()
            .period(&Period::Month(2025, 6))
            .user("u1")
            .entries(&db)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].kpi_name.as_deref(), Some("Calls Made"));
        // No users row for u1, so the join leaves the name empty
        assert!(rows[0].user_name.is_none());
    }

    #[tokio::test]
    async fn test_timestamped_entry_stays_in_its_day() {
        let db = seeded_db().await;
        db.writer()
            .call(|conn| {
                repository::insert_entry(
                    conn,
                    &NewEntry {
                        id: "e5".into(),
                        user_id: "u2".into(),
                        kpi_id: "closes".into(),
                        date: "2025-06-30T10:00:00".into(),
                        sector: "Prospecting".into(),
                        value: 2.0,
                    },
                )
            })
            .await
            .unwrap();

        let rows = EntryQuery::new()
            .period(&Period::Month(2025, 6))
            .user("u2")
            .entries(&db)
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["e3", "e5"]);

        let july = EntryQuery::new()
            .date_from("2025-07-01")
            .user("u2")
            .entries(&db)
            .await
            .unwrap();
        assert!(july.is_empty());
    }

    #[tokio::test]
    async fn test_entries_descending_with_limit() {
        let db = seeded_db().await;

        let rows = EntryQuery::new().descending().limit(2).entries(&db).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "e4");
        assert_eq!(rows[1].id, "e3");
    }

    #[tokio::test]
    async fn test_to_csv_has_header_and_rows() {
        let db = seeded_db().await;

        let csv = EntryQuery::new().kpi("closes").to_csv(&db).await.unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("id,date,user_id"));
        assert!(lines[1].starts_with("e2,2025-06-01,u1"));
    }
}
