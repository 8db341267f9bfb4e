//! SQLite-backed [`VectorStore`].
//!
//! All collections share the `vector_entries` table. Vectors are stored
//! as little-endian f32 BLOBs and searched by brute-force cosine
//! similarity, which is plenty for a few thousand chunks per document
//! and a few hundred catalog values.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use etf_assistant_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use etf_assistant_core::models::{IndexedEntry, Metadata, MetadataFilter};
use etf_assistant_core::store::{rank_candidates, Candidate, VectorStore};

pub struct SqliteVectorStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }

    async fn rows(&self, filter: Option<&MetadataFilter>, with_vectors: bool) -> Result<Vec<SqliteRow>> {
        let columns = if with_vectors {
            "id, text, metadata_json, embedding"
        } else {
            "id, text, metadata_json"
        };
        let rows = match filter {
            Some(f) => {
                sqlx::query(&format!(
                    "SELECT {} FROM vector_entries \
                     WHERE collection = ? AND json_extract(metadata_json, ?) = ? \
                     ORDER BY rowid",
                    columns
                ))
                .bind(&self.collection)
                .bind(format!("$.{}", f.key))
                .bind(&f.value)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM vector_entries WHERE collection = ? ORDER BY rowid",
                    columns
                ))
                .bind(&self.collection)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<IndexedEntry> {
    let metadata_json: String = row.get("metadata_json");
    let metadata: Metadata = serde_json::from_str(&metadata_json)
        .with_context(|| format!("Corrupt metadata for entry {}", row.get::<String, _>("id")))?;
    Ok(IndexedEntry {
        id: row.get("id"),
        text: row.get("text"),
        metadata,
    })
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn add(&self, entries: &[IndexedEntry], vectors: &[Vec<f32>]) -> Result<()> {
        if entries.len() != vectors.len() {
            bail!(
                "Got {} entries but {} vectors",
                entries.len(),
                vectors.len()
            );
        }

        let mut tx = self.pool.begin().await?;
        for (entry, vector) in entries.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO vector_entries (id, collection, text, metadata_json, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.id)
            .bind(&self.collection)
            .bind(&entry.text)
            .bind(serde_json::to_string(&entry.metadata)?)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, filter: Option<&MetadataFilter>) -> Result<Vec<IndexedEntry>> {
        self.rows(filter, false).await?.iter().map(row_to_entry).collect()
    }

    async fn delete(&self, filter: &MetadataFilter) -> Result<Vec<IndexedEntry>> {
        let removed = self.get(Some(filter)).await?;

        let mut tx = self.pool.begin().await?;
        for entry in &removed {
            sqlx::query("DELETE FROM vector_entries WHERE id = ? AND collection = ?")
                .bind(&entry.id)
                .bind(&self.collection)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(removed)
    }

    async fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Candidate>> {
        let rows = self.rows(filter, true).await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            candidates.push(Candidate {
                entry: row_to_entry(row)?,
                score: cosine_similarity(query, &vector),
                vector,
            });
        }

        Ok(rank_candidates(candidates, limit))
    }

    async fn reset(&self) -> Result<()> {
        sqlx::query("DELETE FROM vector_entries WHERE collection = ?")
            .bind(&self.collection)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
