//! ctxlayer — a layered conversation context engine.
//!
//! Given a long, append-only conversation history and a current query,
//! [`manager::Manager::apply`] produces a bounded-size context package for
//! the next LLM call: archived history is chunked, summarized at two
//! resolutions (abstract and overview), indexed, and retrieved at the
//! tier the query calls for, all under a strict token budget.
//!
//! This library crate re-exports its component modules so integration
//! tests (under `tests/`) and downstream callers can reach into any layer
//! directly rather than only through the manager.

pub mod config;
pub mod error;
pub mod indexer;
pub mod manager;
pub mod queue;
pub mod retriever;
pub mod storage;
pub mod summarizer;
pub mod text;
pub mod token;
pub mod types;

/// Common imports for callers wiring up the engine.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::error::{Error, Result};
    pub use crate::manager::{ApplyInput, Manager};
    pub use crate::storage::{FileStorage, Storage};
    pub use crate::summarizer::{NullSummarizer, Summarizer, TrimmingSummarizer};
    pub use crate::types::{ApplicationResult, ContentBlock, Message, MessageContent, Role};
}
