//! End-user chat sessions.
//!
//! | Chat | Reply |
//! |------|-------|
//! | [`EtfSearchChat`] | answer plus the rows of the executed query |
//! | [`DocumentQaChat`] | answer plus referenced pages per document |
//!
//! A session owns its conversation memory and runs one turn at a time.

pub mod docqa;
pub mod search;

pub use docqa::{DocQaReply, DocumentQaChat};
pub use search::{EtfSearchChat, SearchReply};
