//! # toolforge-store
//!
//! Durable tool catalog for toolforge.
//!
//! Provides SQLite-backed persistence (WAL mode, versioned transactional
//! migrations), the [`Tool`] entity with bug state and execution analytics,
//! and a tunable multi-signal lexical search engine.
//!
//! ## Quick start
//!
//! ```ignore
//! use toolforge_store::{Database, ToolStore, NewTool};
//!
//! let db = Database::open_and_migrate("data/toolforge.db").await?;
//! let store = ToolStore::new(db);
//! let tool = store.create(NewTool { /* ... */ }).await?;
//! let hits = store.search("multiply two numbers", 10, None, true).await?;
//! ```

pub mod db;
pub mod error;
pub mod migration;
pub mod search;
pub mod store;
pub mod tool;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::{Database, SyncHandle};
pub use error::{StoreError, StoreResult};
pub use search::{ScoreBreakdown, SearchConfig, SearchHit, SearchWeights, default_synonyms};
pub use store::{DEFAULT_BUG_THRESHOLD, ListOptions, SyncCatalog, ToolStore};
pub use tool::{BUG_LOG_CAP, BugReport, NewTool, ParamKind, Tool, ToolParam, ToolPatch};
