//! Document metadata and document-to-ETF associations.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `etf_docs` | one row per uploaded document: blob reference, source identity in the index, name, description, retrieval settings |
//! | `doc_to_etf` | many-to-many link between documents and ETF ISINs |

use anyhow::Result;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::migrate::migrate_docs_db;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocMetadata {
    pub id: i64,
    /// `"<bucket>/<object>"`.
    pub bucket_file: String,
    /// Source identity of the document's chunks in the vector index.
    pub source_id: String,
    pub name: String,
    pub description: Option<String>,
    pub top_k: usize,
    pub filter_sources: bool,
}

/// Fields of a document row before insertion.
#[derive(Debug, Clone)]
pub struct NewDoc<'a> {
    pub bucket_file: &'a str,
    pub source_id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub top_k: usize,
    pub filter_sources: bool,
}

pub struct DocsDatabase {
    pool: SqlitePool,
}

const DOC_COLUMNS: &str =
    "doc_id, bucket_file_id, vectorstore_id, name, description, top_k, filter_sources";

fn row_to_doc(row: &SqliteRow) -> DocMetadata {
    let top_k: i64 = row.get("top_k");
    DocMetadata {
        id: row.get("doc_id"),
        bucket_file: row.get("bucket_file_id"),
        source_id: row.get("vectorstore_id"),
        name: row.get("name"),
        description: row.get("description"),
        top_k: top_k.max(0) as usize,
        filter_sources: row.get::<i64, _>("filter_sources") != 0,
    }
}

impl DocsDatabase {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database, creating the tables when missing.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate_docs_db(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn add_new_doc(&self, doc: &NewDoc<'_>) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO etf_docs (bucket_file_id, vectorstore_id, name, description, top_k, filter_sources)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(doc.bucket_file)
        .bind(doc.source_id)
        .bind(doc.name)
        .bind(doc.description)
        .bind(doc.top_k as i64)
        .bind(doc.filter_sources)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Link a document to an ETF. An existing link is logged and yields
    /// `None`.
    pub async fn assign_doc_to_etf(&self, doc_id: i64, etf_isin: &str) -> Result<Option<i64>> {
        let existing = sqlx::query("SELECT id FROM doc_to_etf WHERE doc_id = ? AND etf_isin = ?")
            .bind(doc_id)
            .bind(etf_isin)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            tracing::error!(doc_id, etf_isin, "assignment already exists");
            return Ok(None);
        }

        let result = sqlx::query("INSERT INTO doc_to_etf (doc_id, etf_isin) VALUES (?, ?)")
            .bind(doc_id)
            .bind(etf_isin)
            .execute(&self.pool)
            .await?;
        Ok(Some(result.last_insert_rowid()))
    }

    pub async fn get_docs(&self) -> Result<Vec<DocMetadata>> {
        let rows = sqlx::query(&format!("SELECT {} FROM etf_docs ORDER BY doc_id", DOC_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_doc).collect())
    }

    pub async fn get_doc(&self, doc_id: i64) -> Result<Option<DocMetadata>> {
        let row = sqlx::query(&format!("SELECT {} FROM etf_docs WHERE doc_id = ?", DOC_COLUMNS))
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_doc))
    }

    pub async fn get_docs_by_etf(&self, etf_isin: &str) -> Result<Vec<DocMetadata>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM etf_docs WHERE doc_id IN (SELECT doc_id FROM doc_to_etf WHERE etf_isin = ?) ORDER BY doc_id",
            DOC_COLUMNS
        ))
        .bind(etf_isin)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_doc).collect())
    }

    pub async fn get_doc_etfs(&self, doc_id: i64) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT etf_isin FROM doc_to_etf WHERE doc_id = ? ORDER BY id")
            .bind(doc_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("etf_isin")).collect())
    }

    /// Delete a document row and its associations. Returns whether the
    /// document existed.
    pub async fn delete_doc(&self, doc_id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM doc_to_etf WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM etf_docs WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn unassign_doc(&self, doc_id: i64, etf_isin: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM doc_to_etf WHERE doc_id = ? AND etf_isin = ?")
            .bind(doc_id)
            .bind(etf_isin)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
