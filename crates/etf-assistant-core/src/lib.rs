//! # ETF Assistant Core
//!
//! Runtime-free logic shared by the ETF assistant: chunk models, the
//! vector store abstraction with similarity and MMR ranking, conversation
//! memory, layout-element merging, SQL filter extraction and result-set
//! handling for the search chat.
//!
//! This crate contains no tokio, sqlx, filesystem or network code. The
//! application crate supplies storage backends, providers and I/O.

pub mod chunk;
pub mod embedding;
pub mod memory;
pub mod models;
pub mod parse;
pub mod results;
pub mod search;
pub mod sql_filter;
pub mod store;
