//! CLI command implementations.
//!
//! Each `run_*` function backs one `etfa` subcommand and prints to
//! stdout; logging goes to stderr.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

use crate::app::Services;
use crate::blob::split_blob_ref;
use crate::docs_db::DocsDatabase;
use crate::storage::NewDocument;

/// Line-oriented prompt on stdin.
struct Repl {
    lines: Lines<BufReader<Stdin>>,
    prompt: &'static str,
}

impl Repl {
    fn new(prompt: &'static str) -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            prompt,
        }
    }

    /// Next non-empty question; `None` on EOF, `exit` or `quit`.
    async fn next_question(&mut self) -> Result<Option<String>> {
        let mut stdout = tokio::io::stdout();
        loop {
            stdout.write_all(self.prompt.as_bytes()).await?;
            stdout.flush().await?;

            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            match line.trim() {
                "" => continue,
                "exit" | "quit" => return Ok(None),
                question => return Ok(Some(question.to_string())),
            }
        }
    }
}

pub async fn run_docs_add(services: &Services, file: &Path, doc: NewDocument) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let doc_id = services.storage.add_document(&bytes, &doc).await?;
    println!("Added document {} ({})", doc_id, doc.name);
    Ok(())
}

pub async fn run_docs_list(docs_db: &DocsDatabase) -> Result<()> {
    let docs = docs_db.get_docs().await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!("{:<6} {:<32} {:<6} {:<8} ETFS", "ID", "NAME", "TOP_K", "FILTER");
    for doc in docs {
        let etfs = docs_db.get_doc_etfs(doc.id).await?;
        println!(
            "{:<6} {:<32} {:<6} {:<8} {}",
            doc.id,
            doc.name,
            doc.top_k,
            if doc.filter_sources { "yes" } else { "no" },
            etfs.join(",")
        );
    }
    Ok(())
}

pub async fn run_docs_delete(services: &Services, doc_id: i64) -> Result<()> {
    if services.storage.delete_document(doc_id).await? {
        println!("Deleted document {}", doc_id);
    } else {
        println!("Document {} not found", doc_id);
    }
    Ok(())
}

pub async fn run_docs_assign(docs_db: &DocsDatabase, doc_id: i64, isin: &str) -> Result<()> {
    if docs_db.get_doc(doc_id).await?.is_none() {
        anyhow::bail!("Document {} not found", doc_id);
    }
    match docs_db.assign_doc_to_etf(doc_id, isin).await? {
        Some(_) => println!("Assigned document {} to {}", doc_id, isin),
        None => println!("Document {} is already assigned to {}", doc_id, isin),
    }
    Ok(())
}

pub async fn run_docs_unassign(docs_db: &DocsDatabase, doc_id: i64, isin: &str) -> Result<()> {
    if docs_db.unassign_doc(doc_id, isin).await? {
        println!("Unassigned document {} from {}", doc_id, isin);
    } else {
        println!("Document {} was not assigned to {}", doc_id, isin);
    }
    Ok(())
}

pub async fn run_docs_for_etf(docs_db: &DocsDatabase, isin: &str) -> Result<()> {
    for doc in docs_db.get_docs_by_etf(isin).await? {
        println!("{:<6} {}", doc.id, doc.name);
    }
    Ok(())
}

/// Download every document of an ETF into `out`.
pub async fn run_docs_download(services: &Services, isin: &str, out: &Path) -> Result<()> {
    tokio::fs::create_dir_all(out).await?;
    for (doc, bytes) in services.storage.get_documents(isin).await? {
        let (_, object) = split_blob_ref(&doc.bucket_file)?;
        let path = out.join(format!("{}.pdf", object));
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("{:<6} {} -> {}", doc.id, doc.name, path.display());
    }
    Ok(())
}

pub async fn run_catalog_sync(services: &Services) -> Result<()> {
    if services.sync_catalog().await? {
        println!("Correction catalog rebuilt.");
    } else {
        println!("Correction catalog is up to date.");
    }
    Ok(())
}

pub async fn run_search(services: &Services) -> Result<()> {
    services.sync_catalog().await?;
    let mut chat = services.search_chat().await?;
    let max_rows = services.config.search.max_rows_to_pass;

    let mut repl = Repl::new("search> ");
    while let Some(question) = repl.next_question().await? {
        let reply = match chat.chat(&question).await {
            Ok(reply) => reply,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                continue;
            }
        };
        println!("{}", reply.answer);
        if let Some(results) = reply.results {
            if results.len() > max_rows {
                println!("\n{} rows, first {}:", results.len(), max_rows);
                println!("{}", results.render_rows(max_rows));
            }
        }
        println!();
    }
    Ok(())
}

pub async fn run_ask(services: &Services, doc_id: i64) -> Result<()> {
    let mut chat = services.document_chat(doc_id).await?;

    let mut repl = Repl::new("ask> ");
    while let Some(question) = repl.next_question().await? {
        let reply = match chat.chat(&question).await {
            Ok(reply) => reply,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                continue;
            }
        };
        println!("{}", reply.answer);
        for (source, pages) in &reply.sources {
            let pages: Vec<String> = pages.iter().map(|p| p.to_string()).collect();
            println!("  source {} pages {}", &source[..source.len().min(12)], pages.join(", "));
        }
        println!();
    }
    Ok(())
}
