//! Read-only access to the ETF catalog database.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Executor, Row, SqlitePool, Statement, TypeInfo, ValueRef};
use std::path::Path;

use etf_assistant_core::results::{CellValue, ResultSet};

use crate::db;

pub struct EtfDatabase {
    pool: SqlitePool,
    table: String,
}

/// Double-quote an identifier for SQLite.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl EtfDatabase {
    pub async fn open(path: &Path, table: impl Into<String>) -> Result<Self> {
        Ok(Self::new(db::connect_read_only(path).await?, table))
    }

    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Execute arbitrary SQL and return every row with column names.
    pub async fn run_query(&self, sql: &str) -> Result<ResultSet> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Query failed: {}", sql))?;

        // An empty result has no row to read names from.
        let columns: Vec<String> = match rows.first() {
            Some(r) => r.columns().iter().map(|c| c.name().to_string()).collect(),
            None => (&self.pool)
                .prepare(sql)
                .await
                .with_context(|| format!("Query failed: {}", sql))?
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        };

        let rows = rows
            .iter()
            .map(|row| (0..row.len()).map(|i| cell(row, i)).collect())
            .collect::<Result<Vec<Vec<CellValue>>>>()?;

        Ok(ResultSet { columns, rows })
    }

    /// Distinct non-NULL values of `column`, as text.
    pub async fn distinct_values(&self, column: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT CAST({col} AS TEXT) AS value FROM {table} WHERE {col} IS NOT NULL ORDER BY 1",
            col = quote_ident(column),
            table = quote_ident(&self.table),
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to read values of column {}", column))?;
        Ok(rows.iter().map(|r| r.get::<String, _>("value")).collect())
    }

    /// `CREATE TABLE` statement of the searchable table.
    pub async fn table_schema(&self) -> Result<String> {
        let row = sqlx::query(
            "SELECT sql FROM sqlite_master WHERE name = ? AND type IN ('table', 'view')",
        )
        .bind(&self.table)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(r.get::<Option<String>, _>("sql").unwrap_or_default()),
            None => anyhow::bail!("Table {} not found in catalog database", self.table),
        }
    }

    /// Human description followed by the schema, as given to query generation.
    pub async fn describe(&self, description: &str) -> Result<String> {
        let schema = self.table_schema().await?;
        Ok(format!("{}\n{}", description.trim_end(), schema))
    }
}

fn cell(row: &SqliteRow, i: usize) -> Result<CellValue> {
    let type_name = {
        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            return Ok(CellValue::Null);
        }
        raw.type_info().name().to_string()
    };
    Ok(match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => CellValue::Integer(row.try_get_unchecked(i)?),
        "REAL" => CellValue::Real(row.try_get_unchecked(i)?),
        "BLOB" => CellValue::Blob(row.try_get_unchecked(i)?),
        _ => CellValue::Text(row.try_get_unchecked(i)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn fixture(tmp: &TempDir) -> EtfDatabase {
        let pool = db::connect(&tmp.path().join("etf.sqlite3")).await.unwrap();
        sqlx::query(
            r#"CREATE TABLE etf_search_data (isin TEXT, name TEXT, "ter" REAL, age_in_years INTEGER, currency TEXT)"#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"INSERT INTO etf_search_data VALUES
                ('IE00B4L5Y983', 'World', 0.2, 14, 'USD'),
                ('IE00BK5BQT80', 'All-World', 0.22, 5, NULL)"#,
        )
        .execute(&pool)
        .await
        .unwrap();
        EtfDatabase::new(pool, "etf_search_data")
    }

    #[tokio::test]
    async fn query_returns_typed_cells() {
        let tmp = TempDir::new().unwrap();
        let db = fixture(&tmp).await;
        let rs = db
            .run_query(r#"SELECT * FROM "etf_search_data" ORDER BY "isin""#)
            .await
            .unwrap();
        assert_eq!(rs.columns, vec!["isin", "name", "ter", "age_in_years", "currency"]);
        assert_eq!(rs.rows[0][2], CellValue::Real(0.2));
        assert_eq!(rs.rows[0][3], CellValue::Integer(14));
        assert_eq!(rs.rows[1][4], CellValue::Null);
    }

    #[tokio::test]
    async fn empty_result_keeps_column_names() {
        let tmp = TempDir::new().unwrap();
        let db = fixture(&tmp).await;
        let rs = db
            .run_query("SELECT isin, name AS fund FROM etf_search_data WHERE currency = 'JPY'")
            .await
            .unwrap();
        assert_eq!(rs.columns, vec!["isin", "fund"]);
        assert!(rs.rows.is_empty());
    }

    #[tokio::test]
    async fn distinct_values_skip_null() {
        let tmp = TempDir::new().unwrap();
        let db = fixture(&tmp).await;
        assert_eq!(db.distinct_values("currency").await.unwrap(), vec!["USD"]);
    }

    #[tokio::test]
    async fn description_includes_schema() {
        let tmp = TempDir::new().unwrap();
        let db = fixture(&tmp).await;
        let d = db.describe("ETF table").await.unwrap();
        assert!(d.starts_with("ETF table\nCREATE TABLE etf_search_data"));
    }
}
