//! # ETF Assistant
//!
//! Conversational access to an ETF catalog: a search chat that turns
//! questions into SQL over the catalog table, and a document chat that
//! answers questions from uploaded PDFs.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────┐   ┌────────────┐   ┌──────────────┐
//!  question ──────▶│ query gen    │──▶│ corrections│──▶│ catalog SQL  │──▶ answer gen
//!                  └──────────────┘   └────────────┘   └──────────────┘
//!
//!  PDF ──▶ blob ──▶ splitter ──▶ summaries/captions ──▶ vector index + side-store
//!                                                            │
//!  question ──▶ condense ──▶ retrieve ──▶ answer ──▶ source filter ──▶ pages
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`llm`] | Chat-completion client and message types |
//! | [`embedding`] | Embedding providers |
//! | [`splitter`] | PDF splitting by page or by layout |
//! | [`index`] | Document vector index and side-store |
//! | [`chains`] | Prompted pipeline stages |
//! | [`catalog`] | Correction catalog for filter values |
//! | [`etf_db`] | Catalog database access |
//! | [`docs_db`] | Document metadata and ETF assignments |
//! | [`blob`] | Raw document storage |
//! | [`storage`] | Document ingestion and lifecycle |
//! | [`chat`] | Search and document chat sessions |
//! | [`server`] | HTTP API |

pub mod app;
pub mod blob;
pub mod catalog;
pub mod chains;
pub mod chat;
pub mod commands;
pub mod config;
pub mod db;
pub mod digest;
pub mod docs_db;
pub mod embedding;
pub mod etf_db;
pub mod index;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod server;
pub mod splitter;
pub mod storage;
