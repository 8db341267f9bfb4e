use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create every table this application owns.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let docs = db::connect(&config.paths.docs_db).await?;
    migrate_docs_db(&docs).await?;
    docs.close().await;

    let index = db::connect(&config.paths.index_db).await?;
    migrate_index_db(&index).await?;
    index.close().await;

    std::fs::create_dir_all(&config.paths.work_dir)?;

    Ok(())
}

/// Document metadata and document-to-ETF associations.
pub async fn migrate_docs_db(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS etf_docs (
            doc_id INTEGER PRIMARY KEY AUTOINCREMENT,
            bucket_file_id TEXT NOT NULL,
            vectorstore_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            top_k INTEGER NOT NULL,
            filter_sources INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS doc_to_etf (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            etf_isin TEXT NOT NULL,
            doc_id INTEGER NOT NULL,
            UNIQUE(etf_isin, doc_id),
            FOREIGN KEY (doc_id) REFERENCES etf_docs(doc_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_doc_to_etf_isin ON doc_to_etf(etf_isin)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Vector collections (document chunks and catalog values).
pub async fn migrate_index_db(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_entries (
            id TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vector_entries_collection ON vector_entries(collection)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
